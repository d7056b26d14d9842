//! Opaque identifiers for tasks and workflows.
//!
//! Both id types are thin newtypes over `String` rather than `Uuid` directly
//! so that a host can supply human-readable ids (useful for logs, per
//! `spec.md` §6's "identity, useful for logs") while still getting a fresh
//! unique id for free when none is supplied.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, unique id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Wrap a caller-supplied id verbatim.
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }
    };
}

opaque_id!(TaskId, "Identity of a [`crate::task::Task`] within a workflow's DAG.");
opaque_id!(WorkflowId, "Identity of a [`crate::workflow::Workflow`].");
