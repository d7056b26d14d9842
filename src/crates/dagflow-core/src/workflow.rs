//! The task container, scheduler, and the three iteration modes over a
//! running workflow.
//!
//! The recursive, memoized `run(id)` submission and the topological
//! scheduling loop are grounded on the teacher's `pregel::loop_impl`
//! superstep driver, adapted from "all vertices tick together" supersteps to
//! "each vertex's future is requested on demand and memoized" via
//! `futures::future::Shared`, matching this system's pull-by-dependency
//! model instead of Pregel's push-by-superstep one.
//!
//! One deliberate substitution from `spec.md` §4.6's "pause gate" latch: a
//! `tokio::sync::watch` channel stands in for a one-shot `Notify`-based
//! gate. A fresh `Notify` recreated on every pause cycle is vulnerable to
//! the classic lost-wakeup race (a waiter can register after `notify_waiters`
//! already fired); `watch`'s version-counted receiver makes
//! `check_pause`'s "is it still paused" check and "wait for the next change"
//! wait atomic with respect to concurrent `resume()` calls.
//!
//! `tracing::info!`/`warn!` calls around scheduler start/end and abort mirror
//! the teacher's `pregel::executor::TaskExecutor` instrumentation, one level
//! up: where the task's own attempt loop logs per-attempt detail, the
//! workflow logs the scheduler-wide decisions (how many tasks were launched,
//! how many were cancelled on abort).

use crate::config::{TaskConfig, WorkflowConfig};
use crate::dag::Dag;
use crate::error::{DagflowError, Result};
use crate::ids::{TaskId, WorkflowId};
use crate::semaphore::{Semaphore, SharedSemaphore};
use crate::state_machine::{FromSpec, StateMachine, StateMachineDef, TransitionDef};
use crate::task::{Task, Work};
use futures::future::Shared;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

/// Settled outcome of a task's run: its completion value, or the opaque
/// error value produced by its failure, cancellation, or removal.
pub type Outcome = std::result::Result<Value, Value>;

type TaskFuture = Shared<Pin<Box<dyn Future<Output = Outcome> + Send>>>;

fn workflow_def() -> StateMachineDef {
    StateMachineDef {
        initial: "idle".into(),
        transitions: vec![
            TransitionDef::new("begin", FromSpec::one("idle"), "executing"),
            TransitionDef::new("pause", FromSpec::one("executing"), "paused"),
            TransitionDef::new("resume", FromSpec::one("paused"), "executing"),
            TransitionDef::new("end", FromSpec::many(["executing", "paused"]), "done"),
            TransitionDef::new("abort", FromSpec::many(["executing", "paused"]), "aborted"),
        ],
    }
}

/// Which terminal tasks [`Workflow::stream`] yields.
#[derive(Clone)]
pub struct StreamFilter {
    /// State names to match, or `"*"` for any.
    pub states: Vec<String>,
    /// Extra predicate a task must satisfy.
    pub predicate: Option<Arc<dyn Fn(&Task) -> bool + Send + Sync>>,
}

impl Default for StreamFilter {
    fn default() -> Self {
        Self {
            states: vec!["succeeded".into()],
            predicate: None,
        }
    }
}

impl StreamFilter {
    /// Match any terminal state.
    pub fn any_state() -> Self {
        Self {
            states: vec!["*".into()],
            predicate: None,
        }
    }

    fn matches(&self, task: &Task) -> bool {
        let state_ok = self.states.iter().any(|s| s == "*" || *s == task.state());
        let pred_ok = self.predicate.as_ref().map(|p| p(task)).unwrap_or(true);
        state_ok && pred_ok
    }
}

/// Structural snapshot of a [`Workflow`] (`spec.md` §6).
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub id: String,
    pub state: String,
    pub tasks: Vec<Value>,
}

/// The DAG of tasks, its scheduler, and the concurrency/pause/abort controls
/// around it.
pub struct Workflow {
    id: WorkflowId,
    dag: Mutex<Dag<Arc<Task>>>,
    fsm: StateMachine,
    semaphore: SharedSemaphore,
    processed: Mutex<HashMap<TaskId, TaskFuture>>,
    pending_removal: Mutex<HashSet<TaskId>>,
    paused: watch::Sender<bool>,
}

impl Workflow {
    /// Construct a workflow in state `idle`, wiring the internal
    /// pause/abort/deferred-removal handlers described in `spec.md` §4.6.
    pub fn new(config: WorkflowConfig) -> Arc<Self> {
        let id = config.id.unwrap_or_default();
        let max_concurrent = config.max_concurrent;
        let (paused_tx, _paused_rx) = watch::channel(false);

        let workflow = Arc::new_cyclic(|weak: &Weak<Workflow>| {
            let weak_snapshot = weak.clone();
            let snapshot: Arc<dyn Fn() -> Value + Send + Sync> = Arc::new(move || {
                weak_snapshot
                    .upgrade()
                    .map(|w| w.snapshot())
                    .unwrap_or(Value::Null)
            });
            Workflow {
                id: id.clone(),
                dag: Mutex::new(Dag::new()),
                fsm: StateMachine::new(id.to_string(), workflow_def(), snapshot),
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                processed: Mutex::new(HashMap::new()),
                pending_removal: Mutex::new(HashSet::new()),
                paused: paused_tx,
            }
        });

        workflow.install_handlers();
        workflow
    }

    fn install_handlers(self: &Arc<Self>) {
        let paused_tx = self.paused.clone();
        self.fsm
            .on(&["paused.enter"], move |_| {
                let _ = paused_tx.send(true);
            }, None)
            .unwrap();

        let paused_tx = self.paused.clone();
        self.fsm
            .on(&["paused.leave"], move |_| {
                let _ = paused_tx.send(false);
            }, None)
            .unwrap();

        let aborting = Arc::downgrade(self);
        self.fsm
            .on(&["aborted.enter"], move |_| {
                if let Some(workflow) = aborting.upgrade() {
                    let dag = workflow.dag.lock().unwrap();
                    let mut cancelled = 0u32;
                    for id in dag.topo_order(None) {
                        if let Some(task) = dag.get(&id) {
                            if task.state() == "pending" {
                                task.cancel();
                                cancelled += 1;
                            }
                        }
                    }
                    tracing::warn!(workflow = ?workflow.id, cancelled, "workflow aborted, cancelling pending tasks");
                }
            }, None)
            .unwrap();

        let draining = Arc::downgrade(self);
        self.fsm
            .on(&["end.before", "abort.before"], move |_| {
                if let Some(workflow) = draining.upgrade() {
                    workflow.drain_deferred_removal();
                }
            }, None)
            .unwrap();
    }

    fn drain_deferred_removal(&self) {
        let ids: Vec<TaskId> = {
            let mut set = self.pending_removal.lock().unwrap();
            std::mem::take(&mut *set).into_iter().collect()
        };
        let mut dag = self.dag.lock().unwrap();
        let mut processed = self.processed.lock().unwrap();
        for id in ids {
            dag.remove_vertex(&id);
            processed.remove(&id);
        }
    }

    /// Identity.
    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    /// Current lifecycle state name.
    pub fn state(&self) -> String {
        self.fsm.state()
    }

    /// Permits currently held by running tasks.
    pub fn active(&self) -> usize {
        self.semaphore.active()
    }

    /// Look up a task by id.
    pub fn get(&self, id: &TaskId) -> Option<Arc<Task>> {
        self.dag.lock().unwrap().get(id).cloned()
    }

    /// Create a task and insert it into the DAG. The vertex's outgoing edges
    /// are `config.relies_on`; duplicate id errors bubble up unchanged.
    pub fn add(self: &Arc<Self>, work: Work, config: TaskConfig) -> Result<Arc<Task>> {
        let relies_on = config.relies_on.clone();
        let task = Task::new(config, work);
        let mut dag = self.dag.lock().unwrap();
        dag.add_vertex(task.id().clone(), task.clone(), relies_on)?;
        Ok(task)
    }

    /// Remove a task. While `executing`/`paused`, detachment is deferred to
    /// the next `end`/`abort` (`spec.md` §3's "deferred removal"); the
    /// task's own `remove` transition still fires immediately.
    pub fn remove(&self, id: &TaskId) -> Option<Arc<Task>> {
        let state = self.fsm.state();
        if state == "executing" || state == "paused" {
            let task = self.dag.lock().unwrap().get(id).cloned();
            if let Some(task) = &task {
                self.pending_removal.lock().unwrap().insert(id.clone());
                task.remove();
            }
            task
        } else {
            let removed = self.dag.lock().unwrap().remove_vertex(id);
            if let Some(task) = &removed {
                task.remove();
            }
            self.processed.lock().unwrap().remove(id);
            removed
        }
    }

    /// Pause; a no-op unless currently `executing`.
    pub fn pause(&self) {
        if self.fsm.state() == "executing" {
            let _ = self.fsm.invoke("pause");
        }
    }

    /// Resume; a no-op unless currently `paused`.
    pub fn resume(&self) {
        if self.fsm.state() == "paused" {
            let _ = self.fsm.invoke("resume");
        }
    }

    /// Abort; a no-op unless currently `executing` or `paused`. Cancels
    /// every `pending` task as a side effect of entering `aborted`.
    pub fn abort(&self) {
        let state = self.fsm.state();
        if state == "executing" || state == "paused" {
            let _ = self.fsm.invoke("abort");
        }
    }

    async fn check_pause(&self) {
        let mut rx = self.paused.subscribe();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Recursive, memoized task submission: the first call for a given id
    /// launches its future; subsequent calls return the same
    /// [`Shared`](futures::future::Shared) future.
    pub fn run(self: &Arc<Self>, id: TaskId) -> TaskFuture {
        let mut processed = self.processed.lock().unwrap();
        if let Some(fut) = processed.get(&id) {
            return fut.clone();
        }
        let this = self.clone();
        let fut: Pin<Box<dyn Future<Output = Outcome> + Send>> =
            Box::pin(async move { this.run_inner(id.clone()).await });
        let shared = fut.shared();
        processed.insert(id.clone(), shared.clone());
        shared
    }

    async fn run_inner(self: Arc<Self>, id: TaskId) -> Outcome {
        let _permit = self.semaphore.acquire().await;

        let relies_on: Vec<TaskId> = {
            let dag = self.dag.lock().unwrap();
            dag.get(&id).map(|t| t.relies_on().to_vec()).unwrap_or_default()
        };

        let mut dep_outcomes = Vec::with_capacity(relies_on.len());
        for dep_id in relies_on {
            dep_outcomes.push(self.run(dep_id).await);
        }

        let task = {
            let dag = self.dag.lock().unwrap();
            dag.get(&id).cloned()
        };
        let Some(task) = task else {
            return Err(json!("task removed before execution"));
        };

        if dep_outcomes.iter().any(|o| o.is_err()) {
            task.cancel();
        }

        let dep_values: Vec<Value> = dep_outcomes
            .into_iter()
            .map(|o| match o {
                Ok(v) => v,
                Err(e) => e,
            })
            .collect();

        let this = self.clone();
        let result = task
            .execute(dep_values, move || {
                let this = this.clone();
                async move { this.check_pause().await }
            })
            .await;

        result.map_err(|e| e.to_value())
    }

    /// Run the scheduler exactly once: `begin`, await the pause gate, launch
    /// every task in topological (higher-priority-first) order, await all of
    /// them, then `end`.
    pub async fn process(self: &Arc<Self>) {
        if self.fsm.state() != "idle" {
            return;
        }
        self.fsm.invoke("begin").expect("idle -> executing is always legal");
        if self.fsm.state() == "aborted" {
            return;
        }
        self.check_pause().await;

        let order: Vec<TaskId> = {
            let dag = self.dag.lock().unwrap();
            let cmp = |a: &TaskId, b: &TaskId| {
                let pa = dag.get(a).map(|t| t.priority()).unwrap_or(0);
                let pb = dag.get(b).map(|t| t.priority()).unwrap_or(0);
                pb.cmp(&pa)
            };
            dag.topo_order(Some(&cmp))
        };
        tracing::info!(workflow = ?self.id, tasks = order.len(), max_concurrent = self.semaphore.max(), "workflow scheduler starting");

        let mut handles = Vec::with_capacity(order.len());
        for id in order {
            if self.processed.lock().unwrap().contains_key(&id) {
                continue;
            }
            handles.push(self.run(id));
        }
        futures::future::join_all(handles).await;

        let state = self.fsm.state();
        if state == "executing" || state == "paused" {
            let _ = self.fsm.invoke("end");
            tracing::info!(workflow = ?self.id, "workflow scheduler done");
        }
    }

    /// Default async iteration: yields each task exactly once, when it
    /// reaches a terminal lifecycle outcome (success, exhausted failure,
    /// cancellation, or removal). Starts the scheduler on first pull if
    /// `idle`; replays the cached order immediately if already
    /// `done`/`aborted`.
    pub fn iter(self: &Arc<Self>) -> impl Stream<Item = Arc<Task>> {
        let this = self.clone();
        async_stream::stream! {
            let state = this.fsm.state();
            let ids: Vec<TaskId> = {
                let dag = this.dag.lock().unwrap();
                dag.topo_order(None)
            };

            if state == "done" || state == "aborted" {
                let dag = this.dag.lock().unwrap();
                let tasks: Vec<Arc<Task>> = ids.iter().filter_map(|id| dag.get(id).cloned()).collect();
                drop(dag);
                for task in tasks {
                    yield task;
                }
                return;
            }

            if state == "idle" {
                let driver = this.clone();
                tokio::spawn(async move { driver.process().await; });
            }

            let mut pending: FuturesUnordered<_> = ids
                .into_iter()
                .filter_map(|id| {
                    let task = this.dag.lock().unwrap().get(&id).cloned()?;
                    let fut = this.run(id);
                    Some(async move {
                        let _ = fut.await;
                        task
                    })
                })
                .collect();

            while let Some(task) = pending.next().await {
                yield task;
            }

            let state = this.fsm.state();
            if state == "executing" || state == "paused" {
                let _ = this.fsm.invoke("end");
            }
        }
    }

    /// Wraps [`Workflow::iter`], yielding only terminal (DAG sense) tasks
    /// matching `filter`.
    pub fn stream(self: &Arc<Self>, filter: StreamFilter) -> impl Stream<Item = Arc<Task>> {
        let this = self.clone();
        async_stream::stream! {
            let mut inner = Box::pin(this.iter());
            while let Some(task) = inner.next().await {
                let terminal = this.dag.lock().unwrap().is_terminal(task.id());
                if terminal && filter.matches(&task) {
                    yield task;
                }
            }
        }
    }

    /// Yields task results with fail-fast semantics: on the first task whose
    /// final state is `failed`, aborts the workflow and yields its error as
    /// the last item.
    pub fn try_stream(self: &Arc<Self>) -> impl Stream<Item = Result<Value>> {
        let this = self.clone();
        async_stream::stream! {
            let mut inner = Box::pin(this.iter());
            while let Some(task) = inner.next().await {
                if task.state() == "failed" {
                    this.abort();
                    let err = task
                        .error()
                        .map(DagflowError::work_failed)
                        .unwrap_or(DagflowError::Cancelled);
                    yield Err(err);
                    return;
                }
                if let Some(result) = task.result() {
                    yield Ok(result);
                }
            }
        }
    }

    /// Structural snapshot (`spec.md` §6).
    pub fn snapshot(&self) -> Value {
        let dag = self.dag.lock().unwrap();
        let ids = dag.topo_order(None);
        let tasks: Vec<Value> = ids.iter().filter_map(|id| dag.get(id)).map(|t| t.snapshot()).collect();
        let snap = WorkflowSnapshot {
            id: self.id.to_string(),
            state: self.state(),
            tasks,
        };
        serde_json::to_value(snap).unwrap_or(Value::Null)
    }
}
