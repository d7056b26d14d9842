//! Declarative finite-state machine: states, transitions, and the
//! `before`/`leave`/`enter`/`after` event quartet.
//!
//! A [`StateMachine`] is built from a [`StateMachineDef`] — an initial state
//! plus a table of named transitions, each naming the states it is legal
//! `from` and the single state it leads `to`. `"*"` as a `from` matches any
//! current state. This is the language-neutral `{state, transition} ->
//! state` dispatch table the spec's design notes call for (`spec.md` §9):
//! both the task lifecycle and the workflow lifecycle are built from the same
//! engine with two different [`StateMachineDef`]s, composition rather than a
//! closed Rust enum per machine.

use crate::error::{DagflowError, Result};
use crate::signaller::{CancelToken, EventStream, Signaller};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// `from` side of a [`TransitionDef`]: either a fixed set of states, or `Any`
/// (the `"*"` wildcard described in `spec.md` §4.2).
#[derive(Debug, Clone)]
pub enum FromSpec {
    /// Matches any current state.
    Any,
    /// Matches only the listed states.
    States(Vec<String>),
}

impl FromSpec {
    /// One fixed source state.
    pub fn one(state: impl Into<String>) -> Self {
        Self::States(vec![state.into()])
    }

    /// Several fixed source states.
    pub fn many(states: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::States(states.into_iter().map(Into::into).collect())
    }

    fn matches(&self, state: &str) -> bool {
        match self {
            Self::Any => true,
            Self::States(states) => states.iter().any(|s| s == state),
        }
    }
}

/// One named transition: legal source states and the state it assigns.
#[derive(Debug, Clone)]
pub struct TransitionDef {
    /// Transition name, e.g. `"start"`, `"succeed"`, `"retry"`.
    pub name: String,
    /// States `invoke` may be called from.
    pub from: FromSpec,
    /// State assigned on success.
    pub to: String,
}

impl TransitionDef {
    /// Construct a transition definition.
    pub fn new(name: impl Into<String>, from: FromSpec, to: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from,
            to: to.into(),
        }
    }
}

/// A complete machine definition: initial state, declared transitions, and
/// the set of state names that appear anywhere in them.
#[derive(Debug, Clone)]
pub struct StateMachineDef {
    /// State the machine starts in.
    pub initial: String,
    /// Declared transitions.
    pub transitions: Vec<TransitionDef>,
}

impl StateMachineDef {
    fn all_states(&self) -> Vec<String> {
        let mut states = vec![self.initial.clone()];
        for t in &self.transitions {
            if let FromSpec::States(from) = &t.from {
                states.extend(from.iter().cloned());
            }
            states.push(t.to.clone());
        }
        states.sort();
        states.dedup();
        states
    }

    fn legal_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self
            .all_states()
            .iter()
            .flat_map(|s| vec![format!("{s}.enter"), format!("{s}.leave")])
            .collect();
        events.extend(self.transitions.iter().flat_map(|t| vec![format!("{}.before", t.name), format!("{}.after", t.name)]));
        events
    }
}

/// A running instance of a [`StateMachineDef`]: current state plus the
/// [`Signaller`] that multiplexes its lifecycle events.
pub struct StateMachine {
    def: StateMachineDef,
    current: Mutex<String>,
    signaller: Signaller,
    /// Lazily invoked to produce the `payload` field of each emitted
    /// context, e.g. a [`crate::task::Task`]'s or
    /// [`crate::workflow::Workflow`]'s structural snapshot.
    snapshot: Arc<dyn Fn() -> Value + Send + Sync>,
    id: String,
}

impl StateMachine {
    /// Build a machine from `def`, starting in its declared initial state.
    /// `id` identifies the owning entity in emitted contexts; `snapshot`
    /// produces that entity's `payload` value on demand.
    pub fn new(id: impl Into<String>, def: StateMachineDef, snapshot: Arc<dyn Fn() -> Value + Send + Sync>) -> Self {
        let signaller = Signaller::new(def.legal_events());
        let current = Mutex::new(def.initial.clone());
        Self {
            def,
            current,
            signaller,
            snapshot,
            id: id.into(),
        }
    }

    /// The machine's current state.
    pub fn state(&self) -> String {
        self.current.lock().unwrap().clone()
    }

    fn find_transition(&self, name: &str) -> Option<&TransitionDef> {
        self.def.transitions.iter().find(|t| t.name == name)
    }

    /// Atomically apply `transition`: validates the current state is legal,
    /// then emits `{transition}.before`, `{from}.leave`, `{to}.enter`,
    /// `{transition}.after` in that order with an identical context value
    /// `{ id, payload, from, to, transition }`. A handler that panics aborts
    /// the remaining chain for this invocation (Rust unwind, matching "a
    /// handler that throws aborts the remaining chain").
    pub fn invoke(&self, transition: &str) -> Result<String> {
        let def = self
            .find_transition(transition)
            .ok_or_else(|| DagflowError::UnknownEvent(transition.to_string()))?
            .clone();

        let mut current = self.current.lock().unwrap();
        if !def.from.matches(&current) {
            return Err(DagflowError::invalid_transition(transition, current.clone()));
        }
        let from = current.clone();
        let to = def.to.clone();

        let ctx = json!({
            "id": self.id,
            "payload": (self.snapshot)(),
            "from": from,
            "to": to,
            "transition": transition,
        });

        self.signaller.emit(&format!("{transition}.before"), &ctx)?;
        self.signaller.emit(&format!("{from}.leave"), &ctx)?;
        *current = to.clone();
        drop(current);
        self.signaller.emit(&format!("{to}.enter"), &ctx)?;
        self.signaller.emit(&format!("{transition}.after"), &ctx)?;
        Ok(to)
    }

    /// Subscribe to any of `events` (transition or state names, or `"*"`)
    /// exactly as named — i.e. `"start.before"`, `"running.enter"`, etc.
    pub fn on(&self, events: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static, cancel: Option<CancelToken>) -> Result<impl FnOnce() + '_> {
        self.signaller.on(events, cb, cancel)
    }

    /// Subscribe to `{name}.before` for each transition name in `names`.
    pub fn on_before(&self, names: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static) -> Result<()> {
        let events: Vec<String> = names.iter().map(|n| format!("{n}.before")).collect();
        let refs: Vec<&str> = events.iter().map(|s| s.as_str()).collect();
        self.signaller.once_or_on(&refs, cb)
    }

    /// Subscribe to `{name}.after` for each transition name in `names`.
    pub fn on_after(&self, names: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static) -> Result<()> {
        let events: Vec<String> = names.iter().map(|n| format!("{n}.after")).collect();
        let refs: Vec<&str> = events.iter().map(|s| s.as_str()).collect();
        self.signaller.once_or_on(&refs, cb)
    }

    /// Subscribe to `{name}.enter` for each state name in `names`.
    pub fn on_enter(&self, names: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static) -> Result<()> {
        let events: Vec<String> = names.iter().map(|n| format!("{n}.enter")).collect();
        let refs: Vec<&str> = events.iter().map(|s| s.as_str()).collect();
        self.signaller.once_or_on(&refs, cb)
    }

    /// Subscribe to `{name}.leave` for each state name in `names`.
    pub fn on_leave(&self, names: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static) -> Result<()> {
        let events: Vec<String> = names.iter().map(|n| format!("{n}.leave")).collect();
        let refs: Vec<&str> = events.iter().map(|s| s.as_str()).collect();
        self.signaller.once_or_on(&refs, cb)
    }

    /// Open a pull-based sequence of contexts for `events` (see
    /// [`Signaller::stream`]).
    pub fn stream(&self, events: &[&str]) -> Result<EventStream> {
        self.signaller.stream(events)
    }
}

impl Signaller {
    /// Internal helper: subscribe and discard the unsubscribe handle, for
    /// the `on_before`/`on_after`/`on_enter`/`on_leave` convenience wrappers
    /// that don't need to unsubscribe individually.
    fn once_or_on(&self, events: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static) -> Result<()> {
        let _unsub = self.on(events, cb, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task_def() -> StateMachineDef {
        StateMachineDef {
            initial: "created".into(),
            transitions: vec![
                TransitionDef::new("add", FromSpec::one("created"), "pending"),
                TransitionDef::new("start", FromSpec::one("pending"), "running"),
                TransitionDef::new("succeed", FromSpec::one("running"), "succeeded"),
                TransitionDef::new("fail", FromSpec::one("running"), "failed"),
                TransitionDef::new("retry", FromSpec::one("failed"), "pending"),
                TransitionDef::new("cancel", FromSpec::one("pending"), "cancelled"),
                TransitionDef::new("remove", FromSpec::Any, "removed"),
            ],
        }
    }

    fn machine() -> StateMachine {
        StateMachine::new("t1", task_def(), Arc::new(|| json!({"id": "t1"})))
    }

    #[test]
    fn invalid_transition_rejected() {
        let m = machine();
        let err = m.invoke("start").unwrap_err();
        assert!(matches!(err, DagflowError::InvalidTransition { .. }));
    }

    #[test]
    fn event_order_is_before_leave_enter_after() {
        let m = machine();
        m.invoke("add").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for event in ["start.before", "pending.leave", "running.enter", "start.after"] {
            let order = order.clone();
            let tag = event.to_string();
            let _unsub = m.on(&[event], move |_| order.lock().unwrap().push(tag.clone()), None).unwrap();
        }
        m.invoke("start").unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["start.before", "pending.leave", "running.enter", "start.after"]
        );
    }

    #[test]
    fn wildcard_from_matches_any_state() {
        let m = machine();
        m.invoke("add").unwrap();
        m.invoke("start").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        m.on(&["removed.enter"], move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }, None)
        .unwrap();
        m.invoke("remove").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(m.state(), "removed");
    }
}
