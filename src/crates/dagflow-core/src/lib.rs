//! # dagflow-core — embedded DAG task orchestration
//!
//! `dagflow-core` runs a dependency graph of asynchronous tasks to
//! completion: each task declares the task ids it depends on, an optional
//! priority, and a retry/backoff/timeout policy; the workflow schedules them
//! in topological order under a bounded-concurrency semaphore and exposes
//! their progress through a declarative event plane.
//!
//! ## Building blocks
//!
//! - [`signaller::Signaller`] — a closed-vocabulary pub/sub emitter: `on`,
//!   `once`, `off`, `clear`, `emit`, and a pull-based `stream`.
//! - [`state_machine::StateMachine`] — a `{state, transition} -> state`
//!   dispatch table built on top of a `Signaller`, emitting the
//!   `before`/`leave`/`enter`/`after` event quartet for every transition.
//! - [`dag::Dag`] — the acyclic dependency graph with cycle-safe
//!   `add_edge`/`add_vertex` and a cached topological sort.
//! - [`semaphore::Semaphore`] — a counting gate with a live `active` count.
//! - [`task::Task`] — one unit of work: id, dependencies, retry/backoff/
//!   timeout policy, and its own lifecycle state machine.
//! - [`workflow::Workflow`] — owns the DAG of tasks, runs the scheduler, and
//!   exposes the default async iterator plus `stream`/`try_stream`.
//!
//! ## Example
//!
//! ```
//! use dagflow_core::config::{TaskConfig, WorkflowConfig};
//! use dagflow_core::workflow::Workflow;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let wf = Workflow::new(WorkflowConfig::default());
//!
//! let a = wf
//!     .add(
//!         Arc::new(|_deps| Box::pin(async { Ok(json!(1)) })),
//!         TaskConfig::default(),
//!     )
//!     .unwrap();
//!
//! let b = wf
//!     .add(
//!         Arc::new(|deps: Vec<serde_json::Value>| {
//!             Box::pin(async move { Ok(json!(deps[0].as_i64().unwrap() + 1)) })
//!         }),
//!         TaskConfig::relying_on(vec![a.id().clone()]),
//!     )
//!     .unwrap();
//!
//! wf.process().await;
//! assert_eq!(b.result(), Some(json!(2)));
//! # }
//! ```

pub mod config;
pub mod dag;
pub mod error;
pub mod ids;
pub mod semaphore;
pub mod signaller;
pub mod state_machine;
pub mod task;
pub mod workflow;

pub use config::{TaskConfig, WorkflowConfig};
pub use dag::Dag;
pub use error::{DagflowError, Result};
pub use ids::{TaskId, WorkflowId};
pub use semaphore::{Permit, Semaphore, SharedSemaphore};
pub use signaller::{CancelToken, EventStream, Signaller};
pub use state_machine::{FromSpec, StateMachine, StateMachineDef, TransitionDef};
pub use task::{Task, TaskSnapshot, Work, WorkFuture};
pub use workflow::{Outcome, StreamFilter, Workflow, WorkflowSnapshot};
