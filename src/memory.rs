//! In-memory relay.
//!
//! Answers queries from a local event set the way a relay would: newest first,
//! limit applied, then EOSE. In manual mode it answers nothing and hands the
//! open subscriptions to the caller instead, which is how tests drive
//! interleavings.

use crate::event::{Reference, Tag, TagScope, ThreadEvent};
use crate::transport::{Query, RelayItem, Subscription, Transport};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Answer from stored events and send EOSE right away
    #[default]
    Auto,
    /// Keep subscriptions open for the caller to answer
    Manual,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<ThreadEvent>,
    queries: Vec<Query>,
    open: Vec<(Query, UnboundedSender<RelayItem>)>,
    mode: Mode,
    failure: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<Inner>>,
}

/// Does `event` match `query` the way a relay filter would? Tag filters
/// (`#e`, `#a`) only look at lowercase tags.
pub fn matches(query: &Query, event: &ThreadEvent) -> bool {
    if !query.kinds.is_empty() && !query.kinds.contains(&event.kind) {
        return false;
    }

    match &query.reference {
        Reference::Event(id) => event.tags.iter().any(|tag| {
            matches!(tag, Tag::EventRef(r) if r.scope == TagScope::Parent && &r.id == id)
        }),
        Reference::Coordinate(wanted) => event.tags.iter().any(|tag| {
            matches!(
                tag,
                Tag::CoordinateRef { coordinate, scope: TagScope::Parent } if coordinate == wanted
            )
        }),
        Reference::Author(pk) => &event.author == pk,
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manual() -> Self {
        let relay = Self::default();
        relay.set_mode(Mode::Manual);
        relay
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner.lock().mode = mode;
    }

    /// Every subscription fails with `err` until cleared
    pub fn set_failure(&self, err: Option<&str>) {
        self.inner.lock().failure = err.map(str::to_owned);
    }

    pub fn publish(&self, event: ThreadEvent) {
        self.inner.lock().events.push(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = ThreadEvent>) {
        self.inner.lock().events.extend(events);
    }

    /// Every query issued so far, in order
    pub fn queries(&self) -> Vec<Query> {
        self.inner.lock().queries.clone()
    }

    /// Subscriptions issued in manual mode, oldest first. The senders stay
    /// usable after the engine gave up on the query, sends just fail.
    pub fn open_subscriptions(&self) -> Vec<(Query, UnboundedSender<RelayItem>)> {
        self.inner.lock().open.clone()
    }

    fn stored(&self, query: &Query) -> Vec<ThreadEvent> {
        let inner = self.inner.lock();
        let mut found: Vec<ThreadEvent> = inner
            .events
            .iter()
            .filter(|ev| matches(query, ev))
            .cloned()
            .collect();
        found.sort_by_key(|ev| Reverse(ev.created_at));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        found
    }
}

impl Transport for MemoryRelay {
    fn subscribe(&self, query: Query) -> Subscription {
        trace!("memory relay query: {}", query);
        let (tx, sub) = Subscription::channel();

        let (mode, failure) = {
            let mut inner = self.inner.lock();
            inner.queries.push(query.clone());
            (inner.mode, inner.failure.clone())
        };

        if let Some(err) = failure {
            let _ = tx.send(RelayItem::Error(err));
            return sub;
        }

        match mode {
            Mode::Auto => {
                for ev in self.stored(&query) {
                    let _ = tx.send(RelayItem::Event(ev));
                }
                let _ = tx.send(RelayItem::Eose);
            }
            Mode::Manual => {
                self.inner.lock().open.push((query, tx));
            }
        }

        sub
    }
}
