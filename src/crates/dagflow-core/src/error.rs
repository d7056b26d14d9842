//! Error types for the orchestration core.
//!
//! Every error the core can raise is a variant of [`DagflowError`]. The
//! taxonomy separates two audiences:
//!
//! - **Programmer errors** ([`DagflowError::DuplicateId`],
//!   [`DagflowError::CycleDetected`], [`DagflowError::UnknownEvent`],
//!   [`DagflowError::InvalidTransition`]) are raised synchronously from the
//!   call that misused the API (`add`, `addEdge`, `on`, `invoke`, ...) and are
//!   expected to escape straight to the caller.
//! - **Task-runtime errors** ([`DagflowError::TimedOut`],
//!   [`DagflowError::Cancelled`], [`DagflowError::RemovedBeforeExecution`],
//!   [`DagflowError::WorkFailed`]) are captured on the task itself,
//!   participate in the retry loop, and only escape the workflow through
//!   `try()` iteration or by inspection of `task.error()`.
//!
//! # Examples
//!
//! ```
//! use dagflow_core::error::DagflowError;
//!
//! let err = DagflowError::TimedOut { duration_ms: 5_000 };
//! assert_eq!(err.to_string(), "task timed out after 5000ms");
//! ```

use serde_json::Value;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DagflowError>;

/// The full error taxonomy raised by the dependency graph, state machine,
/// semaphore, task, and workflow components.
#[derive(Debug, Error, Clone)]
pub enum DagflowError {
    /// A vertex id was already present in the graph.
    ///
    /// **Cause**: `Dag::add_vertex` (via `Workflow::add`) was called twice
    /// with the same id. **Recovery**: pick a distinct id, or let the
    /// workflow mint one.
    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    /// Adding an edge would have introduced a cycle, or the edge was a
    /// self-loop.
    ///
    /// **Cause**: `Dag::add_edge(from, to)` where `from` is already
    /// reachable from `to`. **Recovery**: restructure dependencies; the
    /// graph is left unchanged when this error is returned.
    #[error("adding dependency {from} -> {to} would create a cycle")]
    CycleDetected {
        /// The dependent vertex.
        from: String,
        /// The vertex it would have depended on.
        to: String,
    },

    /// A caller subscribed to, emitted, or invoked an event/transition name
    /// that is not part of the machine's declared set.
    #[error("unknown event or transition: {0}")]
    UnknownEvent(String),

    /// `invoke` was called for a transition whose `from` set does not
    /// contain the current state.
    ///
    /// **Recovery**: treat as a no-op for idempotent calls (see
    /// `spec.md` §8 invariant 6), or fix the caller's assumed state.
    #[error("invalid transition '{transition}' from state '{from}'")]
    InvalidTransition {
        /// The transition that was attempted.
        transition: String,
        /// The state it was attempted from.
        from: String,
    },

    /// A task was removed from the workflow between being scheduled and
    /// reaching its first attempt.
    #[error("task was removed before execution")]
    RemovedBeforeExecution,

    /// A task attempt exceeded its configured `timeout`.
    #[error("task timed out after {duration_ms}ms")]
    TimedOut {
        /// The configured per-attempt timeout that was exceeded.
        duration_ms: u64,
    },

    /// A task was cancelled while still `pending` and never ran.
    #[error("task was cancelled")]
    Cancelled,

    /// The user-supplied `work` closure returned an error, or a dependency's
    /// captured error was forwarded as this task's own error (see the
    /// "task-as-dependency-value" semantics in `spec.md` §4.6).
    ///
    /// The payload is opaque JSON: the core places no constraints on the
    /// shape of errors produced by `work`.
    #[error("work failed: {0}")]
    WorkFailed(Value),
}

impl DagflowError {
    /// Build a [`DagflowError::CycleDetected`] for an attempted `from -> to`
    /// edge.
    pub fn cycle(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::CycleDetected {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Build a [`DagflowError::InvalidTransition`] for `transition` attempted
    /// from `from`.
    pub fn invalid_transition(transition: impl Into<String>, from: impl Into<String>) -> Self {
        Self::InvalidTransition {
            transition: transition.into(),
            from: from.into(),
        }
    }

    /// Wrap a user-supplied error value as a [`DagflowError::WorkFailed`].
    pub fn work_failed(value: impl Into<Value>) -> Self {
        Self::WorkFailed(value.into())
    }

    /// Render this error as the JSON value stored in a task's `error` field
    /// and forwarded to dependents under "task-as-dependency-value"
    /// semantics.
    pub fn to_value(&self) -> Value {
        match self {
            Self::WorkFailed(v) => v.clone(),
            other => Value::String(other.to_string()),
        }
    }

    /// True for errors that represent a task never having executed at all
    /// (cancelled, removed) rather than having executed and failed.
    pub fn is_non_execution(&self) -> bool {
        matches!(self, Self::Cancelled | Self::RemovedBeforeExecution)
    }
}
