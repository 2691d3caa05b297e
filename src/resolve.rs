//! Parent resolution for one event against the set of events we know about.
//!
//! Each threading convention gets its own rule:
//!
//! * plain replies (kind 1) and everything that is not a scoped comment: the
//!   *last* known `e` tag is the immediate parent, earlier ones are the
//!   thread root or mentions.
//! * scoped comments (kind 1111): `a` coordinates first, then `e` tags in
//!   tag order.
//!
//! `p` tags never take part. Unknown ids and malformed coordinates are
//! skipped, so an event with nothing resolvable is a root.

use crate::event::{Coordinate, ThreadEvent, COMMENT};
use std::collections::HashMap;
use std::sync::Arc;

pub type KnownEvents = HashMap<String, Arc<ThreadEvent>>;

/// Lookup tables for resolving parents against one event set. Build it once
/// per rebuild; resolving an event is then proportional to its tag count.
pub struct ParentIndex<'a> {
    known: &'a KnownEvents,
    /// Address of every addressable or replaceable known event. Several
    /// versions may share one; the newest wins, ties go to the smallest id.
    addresses: HashMap<Coordinate, &'a ThreadEvent>,
}

impl<'a> ParentIndex<'a> {
    pub fn new(known: &'a KnownEvents) -> Self {
        let mut addresses: HashMap<Coordinate, &'a ThreadEvent> = HashMap::new();

        for ev in known.values() {
            let Some(address) = ev.address() else {
                continue;
            };
            addresses
                .entry(address)
                .and_modify(|current| {
                    let newer = ev.created_at > current.created_at
                        || (ev.created_at == current.created_at && ev.id < current.id);
                    if newer {
                        *current = ev.as_ref();
                    }
                })
                .or_insert(ev.as_ref());
        }

        Self { known, addresses }
    }

    /// Find the id of `event`'s parent. `None` means root.
    pub fn parent_of(&self, event: &ThreadEvent) -> Option<&'a str> {
        match event.kind {
            COMMENT => self.coordinate_parent(event).or_else(|| {
                event
                    .parent_event_refs()
                    .find_map(|r| self.known_id(event, &r.id))
            }),
            _ => event
                .parent_event_refs()
                .rev()
                .find_map(|r| self.known_id(event, &r.id)),
        }
    }

    fn known_id(&self, event: &ThreadEvent, id: &str) -> Option<&'a str> {
        if id == event.id {
            return None;
        }

        self.known.get_key_value(id).map(|(id, _)| id.as_str())
    }

    fn coordinate_parent(&self, event: &ThreadEvent) -> Option<&'a str> {
        event.parent_coordinate_refs().find_map(|coord| {
            self.addresses
                .get(coord)
                .map(|ev| ev.id.as_str())
                .filter(|id| *id != event.id)
        })
    }
}
