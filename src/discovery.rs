//! Recursive reply discovery.
//!
//! Relays only answer "events referencing X", so replies more than one level
//! below the target are found by asking again for every event we learn about.
//! Requests go through a worklist; every reference is asked about at most
//! once, which also keeps cross-referencing events from looping forever.

use crate::event::{Reference, ThreadEvent};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Waiting in the worklist
    Idle,
    Querying,
    Done,
}

#[derive(Debug)]
pub struct Discovery {
    seen: HashMap<Reference, DiscoveryState>,
    worklist: VecDeque<Reference>,
    in_flight: usize,
    max_in_flight: usize,
    started: bool,
}

impl Discovery {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            seen: HashMap::new(),
            worklist: VecDeque::new(),
            in_flight: 0,
            max_in_flight: max_in_flight.max(1),
            started: false,
        }
    }

    /// Queue the replies-to-`event` lookups: one by id and, for addressable
    /// events, one by coordinate. Returns how many were new.
    pub fn discover(&mut self, event: &ThreadEvent) -> usize {
        let mut added = 0;

        let mut requests = vec![Reference::Event(event.id.clone())];
        if let Some(coord) = event.coordinate() {
            requests.push(Reference::Coordinate(coord));
        }

        for reference in requests {
            if self.seen.contains_key(&reference) {
                continue;
            }
            trace!("queueing discovery for {}", reference);
            self.seen.insert(reference.clone(), DiscoveryState::Idle);
            self.worklist.push_back(reference);
            added += 1;
        }

        added
    }

    /// Allow requests to go out. Discovery waits for the initial ingest.
    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Next request to issue, if one is waiting and there is room for it
    pub fn next_request(&mut self) -> Option<Reference> {
        if !self.started || self.in_flight >= self.max_in_flight {
            return None;
        }

        let reference = self.worklist.pop_front()?;
        self.seen.insert(reference.clone(), DiscoveryState::Querying);
        self.in_flight += 1;
        Some(reference)
    }

    /// The query for `reference` ended, by EOSE, error or timeout
    pub fn finish(&mut self, reference: &Reference) {
        if let Some(state) = self.seen.get_mut(reference) {
            if *state == DiscoveryState::Querying {
                *state = DiscoveryState::Done;
                self.in_flight -= 1;
            }
        }
    }

    pub fn state(&self, reference: &Reference) -> Option<DiscoveryState> {
        self.seen.get(reference).copied()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn pending(&self) -> usize {
        self.worklist.len()
    }

    /// Nothing queued and nothing outstanding
    pub fn is_settled(&self) -> bool {
        self.in_flight == 0 && self.worklist.is_empty()
    }
}
