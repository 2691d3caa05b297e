//! Working set of events for one viewed target.

use crate::event::{Reference, ThreadEvent};
use crate::nip19::Target;
use crate::resolve::KnownEvents;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Accepted,
    /// Same id already in the working set
    Duplicate,
    /// Relay handed us something that doesn't reference what we asked for
    Unrelated,
}

#[derive(Debug)]
pub struct Ingest {
    target: Target,
    events: KnownEvents,
    /// ids in arrival order
    order: Vec<String>,
}

impl Ingest {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            events: KnownEvents::new(),
            order: Vec::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Add `event` if it references one of `anchors` and is new. Anchors are
    /// what the producing query asked about: the target's references for the
    /// initial query, a discovered event for discovery queries.
    pub fn accept(&mut self, event: ThreadEvent, anchors: &[Reference]) -> Ingested {
        let outcome = self.classify(&event, anchors);

        match outcome {
            Ingested::Accepted => {
                trace!("accepted {} (kind {})", event.id, event.kind);
                metrics::counter!("threadcrumbs_events_accepted_total", 1);
                self.order.push(event.id.clone());
                self.events.insert(event.id.clone(), Arc::new(event));
            }
            Ingested::Duplicate => {
                metrics::counter!("threadcrumbs_events_duplicate_total", 1);
            }
            Ingested::Unrelated => {
                debug!("dropping {}: no reference to {}", event.id, self.target);
                metrics::counter!("threadcrumbs_events_unrelated_total", 1);
            }
        }

        outcome
    }

    fn classify(&self, event: &ThreadEvent, anchors: &[Reference]) -> Ingested {
        if self.target.id() == Some(event.id.as_str()) {
            return Ingested::Unrelated;
        }

        if self.events.contains_key(&event.id) {
            return Ingested::Duplicate;
        }

        if anchors.iter().any(|anchor| event.references(anchor)) {
            Ingested::Accepted
        } else {
            Ingested::Unrelated
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ThreadEvent>> {
        self.events.get(id)
    }

    pub fn events(&self) -> &KnownEvents {
        &self.events
    }

    /// Accepted events in the order they arrived
    pub fn snapshot(&self) -> Vec<Arc<ThreadEvent>> {
        self.order
            .iter()
            .filter_map(|id| self.events.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
