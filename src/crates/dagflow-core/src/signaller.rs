//! Typed multi-event pub/sub with wildcard, one-shot, and pull-based stream
//! readers.
//!
//! A [`Signaller`] is constructed against a closed set of legal event names;
//! subscribing or emitting an unlisted name fails with
//! [`DagflowError::UnknownEvent`]. [`crate::state_machine::StateMachine`] and
//! [`crate::workflow::Workflow`] each own one to multiplex their lifecycle
//! events, mirroring the teacher's `StreamMultiplexer` / `StreamChunk` /
//! `mpsc::channel` pipeline in `stream.rs`, generalized here to named
//! (non-streaming) handlers as well as pull-based streams.
//!
//! `Signaller` is a cheap `Clone`-able handle over shared interior state, the
//! same "handle into shared state" shape the teacher uses for its
//! `CompiledGraph` / `Runtime` handles.

use crate::error::{DagflowError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// A handler registered via [`Signaller::on`] or [`Signaller::once`].
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;
/// A wildcard handler registered for the `*` event, receiving the event name
/// alongside its data.
pub type WildcardHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Opaque handle identifying one subscription, returned by [`Signaller::on`]
/// so a caller can later [`Signaller::off`] it. The core's reference
/// semantics subscribe/unsubscribe by callback identity; Rust closures have
/// no stable identity to compare by, so this crate uses a monotonic handle
/// instead (documented as a deliberate adaptation in `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A token that, when [`cancel`](CancelToken::cancel)led, auto-unsubscribes
/// any subscription it was passed to.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<tokio::sync::Notify>);

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self(Arc::new(tokio::sync::Notify::new()))
    }

    /// Cancel the token, unsubscribing everything it is attached to.
    pub fn cancel(&self) {
        self.0.notify_waiters();
    }

    async fn cancelled(&self) {
        self.0.notified().await;
    }
}

struct Entry {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

struct WildcardEntry {
    id: SubscriptionId,
    handler: WildcardHandler,
    once: bool,
}

struct StreamSubscriber {
    events: Vec<String>,
    tx: mpsc::UnboundedSender<Value>,
}

struct Inner {
    legal_events: Vec<String>,
    handlers: HashMap<String, Vec<Entry>>,
    wildcard: Vec<WildcardEntry>,
    streams: Vec<StreamSubscriber>,
}

/// Typed multi-event emitter. See the module docs for the overall contract.
#[derive(Clone)]
pub struct Signaller {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl Signaller {
    /// Construct a signaller whose legal event set is exactly
    /// `legal_events` (plus the implicit wildcard `*`).
    pub fn new(legal_events: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                legal_events,
                handlers: HashMap::new(),
                wildcard: Vec::new(),
                streams: Vec::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn fresh_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn check_known(inner: &Inner, event: &str) -> Result<()> {
        if event == "*" || inner.legal_events.iter().any(|e| e == event) {
            Ok(())
        } else {
            Err(DagflowError::UnknownEvent(event.to_string()))
        }
    }

    fn subscribe(&self, events: &[&str], cb: Handler, once: bool, cancel: Option<CancelToken>) -> Result<SubscriptionId> {
        let id = self.fresh_id();
        {
            let mut inner = self.inner.lock().unwrap();
            for &event in events {
                Self::check_known(&inner, event)?;
                if event == "*" {
                    let wh: WildcardHandler = {
                        let cb = cb.clone();
                        Arc::new(move |_name: &str, data: &Value| (cb)(data))
                    };
                    inner.wildcard.push(WildcardEntry { id, handler: wh, once });
                } else {
                    inner
                        .handlers
                        .entry(event.to_string())
                        .or_default()
                        .push(Entry { id, handler: cb.clone(), once });
                }
            }
        }
        if let Some(token) = cancel {
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                token.cancelled().await;
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock().unwrap();
                    Self::remove_id(&mut inner, id);
                }
            });
        }
        Ok(id)
    }

    fn remove_id(inner: &mut Inner, id: SubscriptionId) {
        for list in inner.handlers.values_mut() {
            list.retain(|e| e.id != id);
        }
        inner.wildcard.retain(|e| e.id != id);
    }

    /// Subscribe `cb` to each of `events`. Subscribing to `"*"` registers a
    /// wildcard receiver invoked with `(event_name, data)` for every
    /// emission. Returns an unsubscribe closure; subscribing to an unknown
    /// name fails with [`DagflowError::UnknownEvent`] and leaves no
    /// subscription behind.
    pub fn on(
        &self,
        events: &[&str],
        cb: impl Fn(&Value) + Send + Sync + 'static,
        cancel: Option<CancelToken>,
    ) -> Result<impl FnOnce() + '_> {
        let id = self.subscribe(events, Arc::new(cb), false, cancel)?;
        Ok(move || {
            let mut inner = self.inner.lock().unwrap();
            Self::remove_id(&mut inner, id);
        })
    }

    /// Like [`Signaller::on`], but the handler is removed after its first
    /// invocation across any of the subscribed events.
    pub fn once(&self, events: &[&str], cb: impl Fn(&Value) + Send + Sync + 'static) -> Result<SubscriptionId> {
        self.subscribe(events, Arc::new(cb), true, None)
    }

    /// Unsubscribe the subscription identified by `id` from `events`.
    /// Idempotent: unsubscribing an id more than once, or from events it was
    /// never attached to, has no effect.
    pub fn off(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap();
        Self::remove_id(&mut inner, id);
    }

    /// Remove every subscriber on `events`. Pass `&["*"]` to clear every
    /// named handler, wildcard receiver, and pull stream.
    pub fn clear(&self, events: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        if events.contains(&"*") {
            inner.handlers.clear();
            inner.wildcard.clear();
            inner.streams.clear();
            return;
        }
        for &event in events {
            inner.handlers.remove(event);
        }
    }

    /// Synchronously emit `data` for `event`: wildcard receivers first (in
    /// subscription order), then registered handlers for `event` (in
    /// subscription order), then pull-stream buffers subscribed to `event`
    /// or `"*"`. A handler that panics propagates to the caller of `emit` —
    /// the signaller does not isolate handler failures.
    pub fn emit(&self, event: &str, data: &Value) -> Result<()> {
        let (wildcard, named, stream_txs) = {
            let mut inner = self.inner.lock().unwrap();
            Self::check_known(&inner, event)?;

            let wildcard: Vec<_> = inner.wildcard.iter().map(|e| (e.id, e.handler.clone(), e.once)).collect();
            let named: Vec<_> = inner
                .handlers
                .get(event)
                .map(|v| v.iter().map(|e| (e.id, e.handler.clone(), e.once)).collect())
                .unwrap_or_default();

            inner.streams.retain(|s| !s.tx.is_closed());
            let stream_txs: Vec<_> = inner
                .streams
                .iter()
                .filter(|s| s.events.iter().any(|e| e == event || e == "*"))
                .map(|s| s.tx.clone())
                .collect();

            let once_ids: Vec<SubscriptionId> = wildcard
                .iter()
                .filter(|(_, _, once)| *once)
                .map(|(id, _, _)| *id)
                .chain(named.iter().filter(|(_, _, once)| *once).map(|(id, _, _)| *id))
                .collect();
            for id in once_ids {
                Self::remove_id(&mut inner, id);
            }

            (wildcard, named, stream_txs)
        };

        for (_, handler, _) in &wildcard {
            (handler)(event, data);
        }
        for (_, handler, _) in &named {
            (handler)(data);
        }
        for tx in stream_txs {
            let _ = tx.send(data.clone());
        }
        Ok(())
    }

    /// Open a pull-based, order-preserving sequence of `data` values
    /// enqueued from `events`. The sequence buffers events that arrive while
    /// no consumer is polling and is finite only when
    /// [`cancel`](EventStream::cancel)led or dropped.
    pub fn stream(&self, events: &[&str]) -> Result<EventStream> {
        {
            let inner = self.inner.lock().unwrap();
            for &event in events {
                Self::check_known(&inner, event)?;
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().streams.push(StreamSubscriber {
            events: events.iter().map(|s| s.to_string()).collect(),
            tx,
        });
        Ok(EventStream {
            inner: UnboundedReceiverStream::new(rx),
        })
    }
}

/// A pull-based lazy sequence of event payloads returned by
/// [`Signaller::stream`]. Implements [`Stream`]; dropping it (or calling
/// [`cancel`](EventStream::cancel)) unsubscribes it from further emissions.
pub struct EventStream {
    inner: UnboundedReceiverStream<Value>,
}

impl EventStream {
    /// Stop receiving further events. Already-buffered events already
    /// delivered to the underlying channel are still drained by polling.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Stream for EventStream {
    type Item = Value;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_next(cx)
    }
}
