//! Thread reconciliation for one viewed target at a time.
//!
//! All state lives on the task that owns the [`ThreadEngine`]. Upstream
//! queries run as small forwarding tasks that only push [`Inbound`] messages
//! into one channel; the owner pulls them with [`ThreadEngine::next_inbound`]
//! and applies them with [`ThreadEngine::handle`]. Rebuilds happen inside
//! `handle` with no await points, so every rebuild sees a whole snapshot.
//!
//! Every message carries the generation it was issued under. Switching
//! targets bumps the generation and aborts outstanding queries, so anything
//! still in flight for the old target is dropped before it touches state.

use crate::config::Config;
use crate::discovery::{Discovery, DiscoveryState};
use crate::event::{Reference, ThreadEvent};
use crate::ingest::{Ingest, Ingested};
use crate::nip19::Target;
use crate::profiles::{Lookup, ProfileCache};
use crate::transport::{forward, Query, QueryEnd, QueryEvent, Transport};
use crate::tree::{build_thread, Thread};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

pub type QueryId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Purpose {
    Initial,
    Discovery(Reference),
    Profile(String),
}

struct ActiveQuery {
    purpose: Purpose,
    /// What accepted events must reference
    anchors: Vec<Reference>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub enum Inbound {
    Query {
        generation: u64,
        id: QueryId,
        event: QueryEvent,
    },
    Retry {
        generation: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No target
    Idle,
    Loading,
    Ready,
    /// Nothing references the target, retries included
    Empty,
    /// The initial query failed. Whatever arrived before stays in the thread.
    Failed(String),
}

/// What the presentation layer gets after every change
#[derive(Debug, Clone)]
pub struct ThreadView {
    pub revision: u64,
    pub target: Option<Target>,
    pub status: SessionStatus,
    pub thread: Arc<Thread>,
}

impl Default for ThreadView {
    fn default() -> Self {
        Self {
            revision: 0,
            target: None,
            status: SessionStatus::Idle,
            thread: Arc::default(),
        }
    }
}

struct Session {
    ingest: Ingest,
    discovery: Discovery,
    retries: u32,
    initial_pending: usize,
    initial_error: Option<String>,
}

pub struct ThreadEngine<T> {
    transport: T,
    config: Config,
    profiles: ProfileCache,
    generation: u64,
    session: Option<Session>,
    queries: HashMap<QueryId, ActiveQuery>,
    next_query: QueryId,
    retry_task: Option<JoinHandle<()>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    status: SessionStatus,
    thread: Arc<Thread>,
    revision: u64,
    updates: watch::Sender<ThreadView>,
}

impl<T: Transport> ThreadEngine<T> {
    pub fn new(transport: T, config: Config) -> Self {
        Self::with_profiles(transport, config, ProfileCache::new())
    }

    /// Use a profile cache shared with other engines or the UI
    pub fn with_profiles(transport: T, config: Config, profiles: ProfileCache) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (updates, _) = watch::channel(ThreadView::default());

        Self {
            transport,
            config,
            profiles,
            generation: 0,
            session: None,
            queries: HashMap::new(),
            next_query: 0,
            retry_task: None,
            inbound_tx,
            inbound_rx,
            status: SessionStatus::Idle,
            thread: Arc::default(),
            revision: 0,
            updates,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.profiles
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn target(&self) -> Option<&Target> {
        self.session.as_ref().map(|s| s.ingest.target())
    }

    pub fn thread(&self) -> Arc<Thread> {
        Arc::clone(&self.thread)
    }

    /// Accepted events in arrival order
    pub fn events(&self) -> Vec<Arc<ThreadEvent>> {
        self.session
            .as_ref()
            .map(|s| s.ingest.snapshot())
            .unwrap_or_default()
    }

    pub fn discovery_state(&self, reference: &Reference) -> Option<DiscoveryState> {
        self.session.as_ref()?.discovery.state(reference)
    }

    pub fn updates(&self) -> watch::Receiver<ThreadView> {
        self.updates.subscribe()
    }

    /// Nothing outstanding: no queries and no pending retry
    pub fn is_idle(&self) -> bool {
        self.queries.is_empty() && self.retry_task.is_none()
    }

    /// Open a session for `target`, tearing down the previous one first.
    /// Must be called from within a tokio runtime.
    pub fn view(&mut self, target: Target) {
        self.cancel();
        info!("threading replies to {}", target);

        self.session = Some(Session {
            ingest: Ingest::new(target),
            discovery: Discovery::new(self.config.max_in_flight_discovery),
            retries: 0,
            initial_pending: 0,
            initial_error: None,
        });
        self.status = SessionStatus::Loading;
        self.issue_initial();
        self.publish();
    }

    /// Tear down the current session
    pub fn close(&mut self) {
        self.cancel();
        self.publish();
    }

    fn cancel(&mut self) {
        self.generation += 1;

        for (id, query) in self.queries.drain() {
            trace!("aborting query {}", id);
            query.task.abort();
            if let Purpose::Profile(author) = query.purpose {
                self.profiles.abandon(&author);
            }
        }

        if let Some(task) = self.retry_task.take() {
            task.abort();
        }

        self.session = None;
        self.status = SessionStatus::Idle;
        self.thread = Arc::default();
    }

    pub async fn next_inbound(&mut self) -> Option<Inbound> {
        self.inbound_rx.recv().await
    }

    /// Drive the engine until nothing is outstanding
    pub async fn run_until_idle(&mut self) -> SessionStatus {
        while !self.is_idle() {
            match self.inbound_rx.recv().await {
                Some(inbound) => {
                    self.handle(inbound);
                }
                None => break,
            }
        }

        self.status.clone()
    }

    /// Apply one message. Returns whether the published view changed.
    pub fn handle(&mut self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Retry { generation } => {
                if generation != self.generation {
                    trace!("dropping stale retry");
                    return false;
                }
                self.retry_task = None;
                if let Some(session) = self.session.as_mut() {
                    session.initial_error = None;
                }
                self.issue_initial();
                false
            }

            Inbound::Query {
                generation,
                id,
                event,
            } => {
                if generation != self.generation {
                    trace!("dropping stale message for query {}", id);
                    return false;
                }

                match event {
                    QueryEvent::Item(ev) => self.on_event(id, ev),
                    QueryEvent::End(end) => self.on_end(id, end),
                }
            }
        }
    }

    fn issue(
        &mut self,
        query: Query,
        purpose: Purpose,
        anchors: Vec<Reference>,
        timeout: Duration,
    ) -> QueryId {
        let id = self.next_query;
        self.next_query += 1;

        debug!("query {} {:?}: {}", id, purpose, query);
        let sub = self.transport.subscribe(query);
        let tx = self.inbound_tx.clone();
        let generation = self.generation;
        let task = tokio::spawn(forward(sub, timeout, move |event| {
            tx.send(Inbound::Query {
                generation,
                id,
                event,
            })
            .is_ok()
        }));

        self.queries.insert(
            id,
            ActiveQuery {
                purpose,
                anchors,
                task,
            },
        );
        id
    }

    fn issue_initial(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let anchors = session.ingest.target().references();
        session.initial_pending += anchors.len();

        for reference in anchors.iter().cloned() {
            let query = Query::replies(reference, &self.config.reply_kinds, None);
            self.issue(
                query,
                Purpose::Initial,
                anchors.clone(),
                self.config.ingest_timeout,
            );
        }
    }

    fn pump_discovery(&mut self) {
        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let Some(reference) = session.discovery.next_request() else {
                return;
            };

            metrics::counter!("threadcrumbs_discovery_queries_total", 1);
            let query = Query::replies(
                reference.clone(),
                &self.config.reply_kinds,
                self.config.discovery_limit,
            );
            self.issue(
                query,
                Purpose::Discovery(reference.clone()),
                vec![reference],
                self.config.discovery_timeout,
            );
        }
    }

    fn fetch_profile(&mut self, author: &str) {
        if self.profiles.get_or_fetch(author) != Lookup::Fetch {
            return;
        }

        self.issue(
            Query::profile(author),
            Purpose::Profile(author.to_owned()),
            vec![Reference::Author(author.to_owned())],
            self.config.profile_timeout,
        );
    }

    fn on_event(&mut self, id: QueryId, ev: ThreadEvent) -> bool {
        let Some(query) = self.queries.get(&id) else {
            return false;
        };

        if let Purpose::Profile(author) = &query.purpose {
            if ev.author != *author {
                return false;
            }
            let changed = self.profiles.store(&ev);
            if changed {
                self.rebuild();
            }
            return changed;
        }

        let anchors = query.anchors.clone();
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let event_id = ev.id.clone();
        if session.ingest.accept(ev, &anchors) != Ingested::Accepted {
            return false;
        }

        let Some(event) = session.ingest.get(&event_id).cloned() else {
            return false;
        };
        session.discovery.discover(&event);

        self.fetch_profile(&event.author);
        self.pump_discovery();
        self.rebuild();
        true
    }

    fn on_end(&mut self, id: QueryId, end: QueryEnd) -> bool {
        let Some(query) = self.queries.remove(&id) else {
            return false;
        };

        match query.purpose {
            Purpose::Profile(author) => {
                if let QueryEnd::Failed(err) = &end {
                    debug!("profile lookup for {} failed: {}", author, err);
                }
                self.profiles.mark_missing(&author);
                false
            }

            Purpose::Discovery(reference) => {
                match &end {
                    QueryEnd::Failed(err) => warn!("discovery for {} failed: {}", reference, err),
                    QueryEnd::TimedOut => debug!("discovery for {} timed out", reference),
                    QueryEnd::Eose => {}
                }
                if let Some(session) = self.session.as_mut() {
                    session.discovery.finish(&reference);
                }
                self.pump_discovery();
                self.settle()
            }

            Purpose::Initial => self.on_initial_end(end),
        }
    }

    fn on_initial_end(&mut self, end: QueryEnd) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        session.initial_pending = session.initial_pending.saturating_sub(1);
        match end {
            QueryEnd::Failed(err) => {
                warn!("query for {} failed: {}", session.ingest.target(), err);
                session.initial_error = Some(err);
            }
            QueryEnd::TimedOut => debug!("query for {} timed out", session.ingest.target()),
            QueryEnd::Eose => {}
        }

        if session.initial_pending > 0 {
            return false;
        }

        if let Some(err) = session.initial_error.take() {
            session.discovery.start();
            self.status = SessionStatus::Failed(err);
            self.pump_discovery();
            self.publish();
            return true;
        }

        if session.ingest.is_empty() {
            if session.retries < self.config.max_retries {
                session.retries += 1;
                let attempt = session.retries;
                self.schedule_retry(attempt);
                return false;
            }

            info!("no replies to {}", session.ingest.target());
            self.status = SessionStatus::Empty;
            self.publish();
            return true;
        }

        session.discovery.start();
        self.pump_discovery();
        self.settle()
    }

    fn schedule_retry(&mut self, attempt: u32) {
        let backoff = self.config.retry_backoff;
        debug!("empty result, retry {} in {:?}", attempt, backoff);

        let tx = self.inbound_tx.clone();
        let generation = self.generation;
        self.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = tx.send(Inbound::Retry { generation });
        }));
    }

    /// Mark the session ready once the initial query and discovery are done
    fn settle(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };

        if self.status != SessionStatus::Loading
            || session.initial_pending > 0
            || !session.discovery.is_started()
            || !session.discovery.is_settled()
        {
            return false;
        }

        info!(
            "thread for {} settled with {} events",
            session.ingest.target(),
            session.ingest.len()
        );
        self.status = SessionStatus::Ready;
        self.publish();
        true
    }

    /// Rebuild the forest from the full working set and publish it
    fn rebuild(&mut self) {
        let thread = match &self.session {
            Some(session) => build_thread(session.ingest.events()),
            None => Thread::default(),
        };
        self.thread = Arc::new(thread);
        self.publish();
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.updates.send_replace(ThreadView {
            revision: self.revision,
            target: self.target().cloned(),
            status: self.status.clone(),
            thread: Arc::clone(&self.thread),
        });
    }
}

impl<T> Drop for ThreadEngine<T> {
    fn drop(&mut self) {
        for (_, query) in self.queries.drain() {
            query.task.abort();
        }
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }
}
