use crate::event::{Reference, ThreadEvent};
use crate::transport::{Query, RelayItem, Subscription, Transport};
use crate::Error;
use nostr::prelude::RelayUrl;
use nostr_sdk::async_utility::futures_util::StreamExt;
use nostr_sdk::prelude::{Alphabet, Client, Filter, Keys, Kind, PublicKey, SingleLetterTag};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, trace, warn};

/// Persistent relay pool responsible for maintaining long-lived connections.
#[derive(Clone)]
pub struct RelayPool {
    client: Client,
    known_relays: Arc<Mutex<HashSet<String>>>,
    default_relays: Arc<[RelayUrl]>,
    connect_timeout: Duration,
    /// Upper bound for one relay stream. The engine usually gives up sooner.
    stream_timeout: Duration,
}

impl RelayPool {
    pub async fn new<S: AsRef<str>>(
        keys: Keys,
        default_relays: &[S],
        connect_timeout: Duration,
        stream_timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder().signer(keys).build();
        let parsed_defaults: Vec<RelayUrl> = default_relays
            .iter()
            .map(AsRef::as_ref)
            .filter_map(|url| match RelayUrl::parse(url) {
                Ok(relay) => Some(relay),
                Err(err) => {
                    warn!("failed to parse default relay {url}: {err}");
                    None
                }
            })
            .collect();

        let default_relays = Arc::<[RelayUrl]>::from(parsed_defaults);
        let pool = Self {
            client,
            known_relays: Arc::new(Mutex::new(HashSet::new())),
            default_relays,
            connect_timeout,
            stream_timeout,
        };

        pool.ensure_relays(pool.default_relays().iter().cloned())
            .await?;

        Ok(pool)
    }

    pub fn default_relays(&self) -> &[RelayUrl] {
        self.default_relays.as_ref()
    }

    /// Add relays we haven't seen yet, e.g. hints from a bech32 entity
    pub async fn ensure_relays<I>(&self, relays: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        let mut new_relays = Vec::new();
        {
            let mut guard = self.known_relays.lock().await;
            for relay in relays {
                if guard.insert(relay.to_string()) {
                    new_relays.push(relay);
                }
            }
        }

        if new_relays.is_empty() {
            return Ok(());
        }

        for relay in new_relays {
            debug!("adding relay {}", relay);
            self.client
                .add_relay(relay.clone())
                .await
                .map_err(|err| Error::Generic(format!("failed to add relay {relay}: {err}")))?;
        }

        if tokio::time::timeout(self.connect_timeout, self.client.connect())
            .await
            .is_err()
        {
            warn!("relays still connecting after {:?}", self.connect_timeout);
        }

        Ok(())
    }
}

/// Relay filter for a query. References become `#e`/`#a` tag filters or an
/// author filter.
pub fn query_filter(query: &Query) -> Result<Filter, Error> {
    let mut filter = Filter::new().kinds(query.kinds.iter().map(|k| Kind::from(*k)));

    filter = match &query.reference {
        Reference::Event(id) => {
            filter.custom_tag(SingleLetterTag::lowercase(Alphabet::E), id.clone())
        }
        Reference::Coordinate(coord) => {
            filter.custom_tag(SingleLetterTag::lowercase(Alphabet::A), coord.to_string())
        }
        Reference::Author(pk) => {
            let pubkey = PublicKey::parse(pk)
                .map_err(|err| Error::Generic(format!("bad author {pk}: {err}")))?;
            filter.author(pubkey)
        }
    };

    if let Some(limit) = query.limit {
        filter = filter.limit(limit);
    }

    Ok(filter)
}

impl Transport for RelayPool {
    fn subscribe(&self, query: Query) -> Subscription {
        let (tx, sub) = Subscription::channel();

        let filter = match query_filter(&query) {
            Ok(filter) => filter,
            Err(err) => {
                let _ = tx.send(RelayItem::Error(err.to_string()));
                return sub;
            }
        };

        let client = self.client.clone();
        let timeout = self.stream_timeout;
        let task = tokio::spawn(async move {
            trace!("streaming {}", query);
            let mut events = match client.stream_events(filter, timeout).await {
                Ok(events) => events,
                Err(err) => {
                    let _ = tx.send(RelayItem::Error(err.to_string()));
                    return;
                }
            };

            // forward as they arrive so a timeout upstream keeps what we got
            while let Some(event) = events.next().await {
                if tx.send(RelayItem::Event(ThreadEvent::from(&event))).is_err() {
                    return;
                }
            }
            let _ = tx.send(RelayItem::Eose);
        });

        sub.with_handle(task.abort_handle())
    }
}
