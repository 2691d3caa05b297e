//! The boundary to whatever actually talks to relays.

use crate::event::{
    Reference, ThreadEvent, COMMENT, GENERIC_REPOST, HIGHLIGHT, METADATA, REPOST, TEXT_NOTE,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Duration;

/// Kinds that can show up in a comment thread
pub const REPLY_KINDS: &[u16] = &[TEXT_NOTE, REPOST, GENERIC_REPOST, COMMENT, HIGHLIGHT];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub kinds: Vec<u16>,
    pub reference: Reference,
    pub limit: Option<usize>,
}

impl Query {
    pub fn replies(reference: Reference, kinds: &[u16], limit: Option<usize>) -> Self {
        Self {
            kinds: kinds.to_vec(),
            reference,
            limit,
        }
    }

    pub fn profile(author: impl Into<String>) -> Self {
        Self {
            kinds: vec![METADATA],
            reference: Reference::Author(author.into()),
            limit: Some(1),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kinds={:?} {}", self.kinds, self.reference)?;
        if let Some(limit) = self.limit {
            write!(f, " limit={}", limit)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayItem {
    Event(ThreadEvent),
    /// No more stored events will arrive
    Eose,
    Error(String),
}

/// Receiving end of one upstream query. Closing or dropping it releases the
/// upstream subscription.
#[derive(Debug)]
pub struct Subscription {
    items: mpsc::UnboundedReceiver<RelayItem>,
    handle: Option<AbortHandle>,
}

impl Subscription {
    pub fn channel() -> (mpsc::UnboundedSender<RelayItem>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                items: rx,
                handle: None,
            },
        )
    }

    /// Abort `handle` when this subscription is closed
    pub fn with_handle(mut self, handle: AbortHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub async fn recv(&mut self) -> Option<RelayItem> {
        self.items.recv().await
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.items.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

pub trait Transport: Send + Sync + 'static {
    fn subscribe(&self, query: Query) -> Subscription;
}

impl<T: Transport> Transport for Arc<T> {
    fn subscribe(&self, query: Query) -> Subscription {
        self.as_ref().subscribe(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEnd {
    Eose,
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    Item(ThreadEvent),
    End(QueryEnd),
}

/// Race `sub` against a timer, handing everything to `emit`. Whichever of
/// EOSE, error or the timer comes first ends the query, and the subscription
/// is released either way. `emit` returns false once nobody is listening.
pub async fn forward<F>(mut sub: Subscription, timeout: Duration, mut emit: F)
where
    F: FnMut(QueryEvent) -> bool,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let end = loop {
        tokio::select! {
            _ = &mut deadline => break QueryEnd::TimedOut,
            item = sub.recv() => match item {
                Some(RelayItem::Event(ev)) => {
                    if !emit(QueryEvent::Item(ev)) {
                        return;
                    }
                }
                Some(RelayItem::Eose) | None => break QueryEnd::Eose,
                Some(RelayItem::Error(err)) => break QueryEnd::Failed(err),
            },
        }
    };

    sub.close();
    emit(QueryEvent::End(end));
}
