//! End-to-end scheduler scenarios, one per `spec.md` §8 scenario not already
//! covered by `workflow.rs`'s inline unit tests (S1, S2, S5, S6, S7 live
//! there; S3, S4, and S8 live here since they need real wall-clock/paused
//! virtual-time control and a mid-run `remove`).

use dagflow_core::config::{TaskConfig, WorkflowConfig};
use dagflow_core::error::DagflowError;
use dagflow_core::task::Work;
use dagflow_core::workflow::Workflow;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn s3_retry_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let work: Work = {
        let attempts = attempts.clone();
        Arc::new(move |_deps| {
            let attempts = attempts.clone();
            Box::pin(async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(json!("not yet"))
                } else {
                    Ok(json!(7))
                }
            })
        })
    };

    let wf = Workflow::new(WorkflowConfig::default());
    let t = wf
        .add(
            work,
            TaskConfig {
                retry_limit: 2,
                backoff: Duration::from_millis(10),
                ..TaskConfig::default()
            },
        )
        .unwrap();

    let start = tokio::time::Instant::now();
    wf.process().await;

    assert_eq!(t.state(), "succeeded");
    assert_eq!(t.result(), Some(json!(7)));
    assert_eq!(t.attempts(), 2);
    assert!(start.elapsed() >= Duration::from_millis(10 + 20));
}

#[tokio::test(start_paused = true)]
async fn s4_retry_exhaustion() {
    let work: Work = Arc::new(|_deps| Box::pin(async { Err(json!("E")) }));

    let wf = Workflow::new(WorkflowConfig::default());
    let t = wf
        .add(
            work,
            TaskConfig {
                retry_limit: 1,
                backoff: Duration::from_millis(5),
                ..TaskConfig::default()
            },
        )
        .unwrap();

    wf.process().await;

    assert_eq!(t.state(), "failed");
    assert_eq!(t.error(), Some(json!("E")));
    assert_eq!(t.attempts(), 1);
}

#[tokio::test]
async fn s8_deferred_removal() {
    // A slow dependency holds the workflow in `executing` long enough for us
    // to call `remove` mid-run; the vertex should detach only once the
    // workflow reaches `done`.
    let wf = Workflow::new(WorkflowConfig::with_max_concurrent(2));
    let slow: Work = Arc::new(|_deps| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!(1))
        })
    });
    let _keep_busy = wf.add(slow, TaskConfig::default()).unwrap();

    let doomed = wf
        .add(Arc::new(|_deps| Box::pin(async { Ok(json!(2)) })), TaskConfig::default())
        .unwrap();
    let doomed_id = doomed.id().clone();

    let driver = wf.clone();
    let handle = tokio::spawn(async move { driver.process().await });

    tokio::task::yield_now().await;
    let removed = wf.remove(&doomed_id);
    assert!(removed.is_some());
    assert_eq!(doomed.state(), "removed");

    handle.await.unwrap();

    assert_eq!(wf.state(), "done");
    assert!(wf.get(&doomed_id).is_none());
}

#[tokio::test]
async fn pause_suspends_task_start() {
    let wf = Workflow::new(WorkflowConfig::default());
    wf.pause();
    assert_eq!(wf.state(), "idle");

    let wf2 = Workflow::new(WorkflowConfig::default());
    let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let started2 = started.clone();
    let t = wf2
        .add(
            Arc::new(move |_deps| {
                started2.store(true, Ordering::SeqCst);
                Box::pin(async { Ok(json!(1)) })
            }),
            TaskConfig::default(),
        )
        .unwrap();

    // begin, then immediately pause before the scheduler gets to run tasks.
    let driver = wf2.clone();
    let handle = tokio::spawn(async move { driver.process().await });
    tokio::task::yield_now().await;
    wf2.pause();

    tokio::time::sleep(Duration::from_millis(10)).await;
    if wf2.state() == "paused" {
        assert!(!started.load(Ordering::SeqCst));
        wf2.resume();
    }
    handle.await.unwrap();
    assert_eq!(t.state(), "succeeded");
}

#[tokio::test]
async fn cancellation_error_is_stable() {
    let err = DagflowError::Cancelled;
    assert_eq!(err.to_value(), json!("task was cancelled"));
}
