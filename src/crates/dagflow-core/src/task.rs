//! A single unit of work: id, dependencies, retry/backoff/timeout policy,
//! and the `created -> pending -> running -> {succeeded | failed}` lifecycle
//! built on [`StateMachine`].
//!
//! The retry/backoff/timeout attempt loop is grounded on the teacher's
//! `pregel::executor::TaskExecutor::execute` superstep loop and
//! `retry::RetryPolicy`, with jitter and a max-interval cap dropped since
//! the governing contract here is the deterministic `backoff * 2^attempts`
//! schedule tested by S3/S4 rather than the teacher's jittered variant. The
//! `tracing::debug!/info!/warn!/error!` calls around each attempt mirror the
//! same executor's instrumentation at start, success-after-retry,
//! failure-then-retry, and exhaustion.

use crate::config::TaskConfig;
use crate::error::{DagflowError, Result};
use crate::ids::TaskId;
use crate::state_machine::{FromSpec, StateMachine, StateMachineDef, TransitionDef};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Future returned by a [`Work`] closure: the user's completion value, or an
/// opaque error value on failure.
pub type WorkFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, Value>> + Send>>;

/// A task's callable: takes the settled values of its dependencies (in
/// `reliesOn` order) and produces a `WorkFuture`.
pub type Work = Arc<dyn Fn(Vec<Value>) -> WorkFuture + Send + Sync>;

fn task_def() -> StateMachineDef {
    StateMachineDef {
        initial: "created".into(),
        transitions: vec![
            TransitionDef::new("add", FromSpec::one("created"), "pending"),
            TransitionDef::new("start", FromSpec::one("pending"), "running"),
            TransitionDef::new("succeed", FromSpec::one("running"), "succeeded"),
            TransitionDef::new("fail", FromSpec::one("running"), "failed"),
            TransitionDef::new("timeout", FromSpec::one("running"), "failed"),
            TransitionDef::new("retry", FromSpec::one("failed"), "pending"),
            TransitionDef::new("cancel", FromSpec::one("pending"), "cancelled"),
            TransitionDef::new("remove", FromSpec::many(["created", "pending", "running", "succeeded", "failed", "cancelled"]), "removed"),
        ],
    }
}

/// Structural snapshot of a [`Task`] (`spec.md` §6).
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub state: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub relies_on: Vec<String>,
    pub priority: i64,
    pub timeout: Option<u64>,
    pub backoff: u64,
    pub retry_limit: u32,
    pub attempts: u32,
}

/// A unit of work with dependencies, retry/backoff/timeout policy, and a
/// lifecycle state machine.
pub struct Task {
    id: TaskId,
    relies_on: Vec<TaskId>,
    priority: i64,
    retry_limit: u32,
    backoff: Duration,
    timeout: Option<Duration>,
    work: Work,
    attempts: AtomicU32,
    result: Mutex<Option<Value>>,
    error: Mutex<Option<DagflowError>>,
    fsm: StateMachine,
}

impl Task {
    /// Construct a task and transition it `created -> pending`, wiring the
    /// internal `start`/`cancel` after-handlers described in `spec.md` §4.5.
    pub fn new(config: TaskConfig, work: Work) -> Arc<Self> {
        let TaskConfig {
            id,
            relies_on,
            priority,
            retry_limit,
            backoff,
            timeout,
        } = config;
        let id = id.unwrap_or_default();
        let fsm_name = id.to_string();

        let task = Arc::new_cyclic(|weak: &Weak<Task>| {
            let weak_snapshot = weak.clone();
            let snapshot: Arc<dyn Fn() -> Value + Send + Sync> = Arc::new(move || {
                weak_snapshot
                    .upgrade()
                    .map(|t| t.snapshot())
                    .unwrap_or(Value::Null)
            });
            Task {
                id: id.clone(),
                relies_on,
                priority,
                retry_limit,
                backoff,
                timeout,
                work,
                attempts: AtomicU32::new(0),
                result: Mutex::new(None),
                error: Mutex::new(None),
                fsm: StateMachine::new(fsm_name, task_def(), snapshot),
            }
        });

        task.install_handlers();
        task.fsm.invoke("add").expect("created -> pending is always legal");
        task
    }

    fn install_handlers(self: &Arc<Self>) {
        let cleared = Arc::downgrade(self);
        self.fsm
            .on(
                &["start.after"],
                move |_| {
                    if let Some(task) = cleared.upgrade() {
                        *task.error.lock().unwrap() = None;
                    }
                },
                None,
            )
            .unwrap();

        let cancelled = Arc::downgrade(self);
        self.fsm
            .on(
                &["cancel.after"],
                move |_| {
                    if let Some(task) = cancelled.upgrade() {
                        *task.error.lock().unwrap() = Some(DagflowError::Cancelled);
                    }
                },
                None,
            )
            .unwrap();
    }

    /// Identity.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Dependency ids, in declared order.
    pub fn relies_on(&self) -> &[TaskId] {
        &self.relies_on
    }

    /// Tie-breaker in topological sort; higher runs first.
    pub fn priority(&self) -> i64 {
        self.priority
    }

    /// Additional attempts allowed after a failure.
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Base backoff delay.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Per-attempt wall-clock budget, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Current lifecycle state name.
    pub fn state(&self) -> String {
        self.fsm.state()
    }

    /// The stored completion value, if the task has ever succeeded.
    pub fn result(&self) -> Option<Value> {
        self.result.lock().unwrap().clone()
    }

    /// The stored error value, if any attempt has failed (or the task was
    /// cancelled/removed-before-execution).
    pub fn error(&self) -> Option<Value> {
        self.error.lock().unwrap().as_ref().map(DagflowError::to_value)
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Subscribe to this task's lifecycle events; see [`StateMachine::on`].
    pub fn on(&self, events: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static) -> Result<impl FnOnce() + '_> {
        self.fsm.on(events, cb, None)
    }

    /// Open a pull-based sequence of this task's lifecycle contexts.
    pub fn stream(&self, events: &[&str]) -> Result<crate::signaller::EventStream> {
        self.fsm.stream(events)
    }

    /// Cancel the task if it is still `pending`; a no-op otherwise (`spec.md`
    /// §8 invariant 6).
    pub fn cancel(&self) {
        if self.fsm.state() != "pending" {
            return;
        }
        let _ = self.fsm.invoke("cancel");
    }

    /// Detach the task via the `*->removed` transition; a no-op if already
    /// removed.
    pub fn remove(&self) {
        if self.fsm.state() == "removed" {
            return;
        }
        let _ = self.fsm.invoke("remove");
    }

    /// Run the execute contract of `spec.md` §4.5 against `dep_results`
    /// (dependency values in `reliesOn` order). `check_pause` is awaited at
    /// the top of every attempt and is expected to resolve immediately
    /// unless the owning workflow is paused.
    pub async fn execute<F, Fut>(&self, dep_results: Vec<Value>, check_pause: F) -> Result<Value>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        if self.fsm.state() == "cancelled" {
            let err = self
                .error
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(DagflowError::Cancelled);
            return Err(err);
        }

        self.attempts.store(0, Ordering::SeqCst);
        loop {
            check_pause().await;

            if self.fsm.state() == "removed" {
                let err = DagflowError::RemovedBeforeExecution;
                *self.error.lock().unwrap() = Some(err.clone());
                return Err(err);
            }

            self.fsm.invoke("start")?;
            let attempt = self.attempts.load(Ordering::SeqCst);
            tracing::debug!(task = ?self.id, attempt, retry_limit = self.retry_limit, "starting task attempt");

            match self.run_attempt(&dep_results).await {
                Ok(value) => {
                    *self.result.lock().unwrap() = Some(value.clone());
                    self.fsm.invoke("succeed")?;
                    if attempt > 0 {
                        tracing::info!(task = ?self.id, attempts = attempt + 1, "task succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    *self.error.lock().unwrap() = Some(err.clone());
                    if self.fsm.state() == "running" {
                        self.fsm.invoke("fail")?;
                    }

                    let attempts = self.attempts.load(Ordering::SeqCst);
                    if attempts == self.retry_limit {
                        tracing::error!(task = ?self.id, attempts = attempts + 1, error = ?err, "task failed after all retry attempts");
                        return Err(err);
                    }

                    self.fsm.invoke("retry")?;
                    let delay = self.backoff * 2u32.saturating_pow(attempts);
                    tracing::warn!(
                        task = ?self.id,
                        attempt = attempts,
                        retry_limit = self.retry_limit,
                        delay_ms = delay.as_millis(),
                        error = ?err,
                        "task failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    self.attempts.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    async fn run_attempt(&self, dep_results: &[Value]) -> std::result::Result<Value, DagflowError> {
        let fut = (self.work)(dep_results.to_vec());
        match self.timeout {
            Some(budget) => match tokio::time::timeout(budget, fut).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(value)) => Err(DagflowError::work_failed(value)),
                Err(_) => {
                    let err = DagflowError::TimedOut {
                        duration_ms: budget.as_millis() as u64,
                    };
                    tracing::warn!(task = ?self.id, timeout_ms = budget.as_millis(), "task attempt timed out");
                    let _ = self.fsm.invoke("timeout");
                    Err(err)
                }
            },
            None => fut.await.map_err(DagflowError::work_failed),
        }
    }

    /// Structural snapshot (`spec.md` §6).
    pub fn snapshot(&self) -> Value {
        let snap = TaskSnapshot {
            id: self.id.to_string(),
            state: self.state(),
            result: self.result(),
            error: self.error.lock().unwrap().as_ref().map(|e| e.to_string()),
            relies_on: self.relies_on.iter().map(|id| id.to_string()).collect(),
            priority: self.priority,
            timeout: self.timeout.map(|d| d.as_millis() as u64),
            backoff: self.backoff.as_millis() as u64,
            retry_limit: self.retry_limit,
            attempts: self.attempts(),
        };
        serde_json::to_value(snap).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32 as Counter;

    fn ok_work(value: Value) -> Work {
        Arc::new(move |_deps| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    fn noop_pause() -> impl Fn() -> std::future::Ready<()> {
        || std::future::ready(())
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let task = Task::new(TaskConfig::default(), ok_work(json!(7)));
        let result = task.execute(vec![], noop_pause()).await.unwrap();
        assert_eq!(result, json!(7));
        assert_eq!(task.state(), "succeeded");
        assert_eq!(task.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_succeed() {
        let failures = Arc::new(Counter::new(0));
        let work: Work = {
            let failures = failures.clone();
            Arc::new(move |_deps| {
                let failures = failures.clone();
                Box::pin(async move {
                    let n = failures.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(json!("not yet"))
                    } else {
                        Ok(json!(7))
                    }
                })
            })
        };
        let config = TaskConfig {
            retry_limit: 2,
            backoff: Duration::from_millis(10),
            ..TaskConfig::default()
        };
        let task = Task::new(config, work);

        let start = tokio::time::Instant::now();
        let result = task.execute(vec![], noop_pause()).await.unwrap();
        assert_eq!(result, json!(7));
        assert_eq!(task.state(), "succeeded");
        assert_eq!(task.attempts(), 2);
        assert!(start.elapsed() >= Duration::from_millis(10 + 20));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_fails() {
        let work: Work = Arc::new(|_deps| Box::pin(async { Err(json!("boom")) }));
        let config = TaskConfig {
            retry_limit: 1,
            backoff: Duration::from_millis(5),
            ..TaskConfig::default()
        };
        let task = Task::new(config, work);

        let err = task.execute(vec![], noop_pause()).await.unwrap_err();
        assert_eq!(err.to_value(), json!("boom"));
        assert_eq!(task.state(), "failed");
        assert_eq!(task.attempts(), 1);
    }

    #[tokio::test]
    async fn cancelled_task_fails_without_running_work() {
        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked2 = invoked.clone();
        let work: Work = Arc::new(move |_deps| {
            invoked2.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(json!(1)) })
        });
        let task = Task::new(TaskConfig::default(), work);
        task.cancel();
        assert_eq!(task.state(), "cancelled");

        let err = task.execute(vec![], noop_pause()).await.unwrap_err();
        assert!(matches!(err, DagflowError::Cancelled));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn removed_before_execution_fails() {
        let task = Task::new(TaskConfig::default(), ok_work(json!(1)));
        task.remove();
        let err = task.execute(vec![], noop_pause()).await.unwrap_err();
        assert!(matches!(err, DagflowError::RemovedBeforeExecution));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_participates_in_retry_loop() {
        let work: Work = Arc::new(|_deps| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!(1))
            })
        });
        let config = TaskConfig {
            timeout: Some(Duration::from_millis(5)),
            retry_limit: 0,
            ..TaskConfig::default()
        };
        let task = Task::new(config, work);
        let err = task.execute(vec![], noop_pause()).await.unwrap_err();
        assert!(matches!(err, DagflowError::TimedOut { duration_ms: 5 }));
        assert_eq!(task.state(), "failed");
    }

    #[tokio::test]
    async fn cancel_after_running_is_a_no_op() {
        let task = Task::new(TaskConfig::default(), ok_work(json!(1)));
        let _ = task.execute(vec![], noop_pause()).await;
        assert_eq!(task.state(), "succeeded");
        task.cancel();
        assert_eq!(task.state(), "succeeded");
    }
}
