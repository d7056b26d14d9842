//! Construction options for [`crate::workflow::Workflow`] and
//! [`crate::task::Task`].
//!
//! Mirrors the teacher's builder-style config structs: plain `pub` fields
//! with a `Default` impl carrying the documented defaults, rather than a
//! fluent `with_*` chain, since every field here is optional and flat.

use crate::ids::{TaskId, WorkflowId};
use std::time::Duration;

/// Workflow construction options (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Capacity of the workflow's semaphore. `0` means unbounded.
    pub max_concurrent: usize,
    /// Workflow identity. Defaults to a fresh opaque id.
    pub id: Option<WorkflowId>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            id: None,
        }
    }
}

impl WorkflowConfig {
    /// A config with `max_concurrent` permits.
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Self::default()
        }
    }
}

/// Task construction options (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Task identity. Defaults to a fresh opaque id, unique within the
    /// workflow.
    pub id: Option<TaskId>,
    /// Task ids this task depends on; becomes the vertex's outgoing edges.
    pub relies_on: Vec<TaskId>,
    /// Tie-breaker in topological sort; higher runs first among otherwise
    /// equal candidates.
    pub priority: i64,
    /// Additional attempts allowed after a failure.
    pub retry_limit: u32,
    /// Base delay between attempts; actual delay is `backoff * 2^attempts`.
    pub backoff: Duration,
    /// Per-attempt wall-clock budget. `None` means no timeout.
    pub timeout: Option<Duration>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            id: None,
            relies_on: Vec::new(),
            priority: 0,
            retry_limit: 0,
            backoff: Duration::from_millis(200),
            timeout: None,
        }
    }
}

impl TaskConfig {
    /// A config depending on `relies_on`, all other fields defaulted.
    pub fn relying_on(relies_on: Vec<TaskId>) -> Self {
        Self {
            relies_on,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let wc = WorkflowConfig::default();
        assert_eq!(wc.max_concurrent, 1);
        assert!(wc.id.is_none());

        let tc = TaskConfig::default();
        assert_eq!(tc.priority, 0);
        assert_eq!(tc.retry_limit, 0);
        assert_eq!(tc.backoff, Duration::from_millis(200));
        assert!(tc.timeout.is_none());
        assert!(tc.relies_on.is_empty());
    }
}
