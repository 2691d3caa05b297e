use crate::transport::REPLY_KINDS;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://nos.lol", "wss://nostr.wine"];

#[derive(Debug, Clone)]
pub struct Config {
    /// How long the initial query for a target may run
    pub ingest_timeout: Duration,
    /// Per query limit for recursive discovery
    pub discovery_timeout: Duration,
    pub profile_timeout: Duration,
    pub connect_timeout: Duration,
    /// Re-issues of an initial query that came back empty
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_in_flight_discovery: usize,
    pub discovery_limit: Option<usize>,
    pub reply_kinds: Vec<u16>,
    pub max_indent: usize,
    pub relays: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingest_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(5),
            profile_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_millis(800),
            max_retries: 2,
            retry_backoff: Duration::from_secs(2),
            max_in_flight_discovery: 8,
            discovery_limit: Some(500),
            reply_kinds: REPLY_KINDS.to_vec(),
            max_indent: crate::tree::MAX_INDENT,
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env_parse(name).map(Duration::from_millis).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring unparseable {name}={value}");
            None
        }
    }
}

fn parse_relays(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned)
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let relays = std::env::var("THREADCRUMBS_RELAYS")
            .map(|v| parse_relays(&v))
            .ok()
            .filter(|relays| !relays.is_empty())
            .unwrap_or(defaults.relays);

        Self {
            ingest_timeout: env_millis("THREADCRUMBS_TIMEOUT_MS", defaults.ingest_timeout),
            discovery_timeout: env_millis(
                "THREADCRUMBS_DISCOVERY_TIMEOUT_MS",
                defaults.discovery_timeout,
            ),
            max_retries: env_parse("THREADCRUMBS_RETRIES").unwrap_or(defaults.max_retries),
            retry_backoff: env_millis("THREADCRUMBS_RETRY_BACKOFF_MS", defaults.retry_backoff),
            relays,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ingest_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
        assert_eq!(config.max_indent, 5);
        assert_eq!(config.relays.len(), 3);
    }

    #[test]
    fn test_parse_relays() {
        assert_eq!(
            parse_relays(" wss://a.com ,,wss://b.com"),
            vec!["wss://a.com".to_string(), "wss://b.com".to_string()]
        );
        assert!(parse_relays(" , ").is_empty());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("THREADCRUMBS_TEST_ONLY_MS", "250");
        assert_eq!(
            env_millis("THREADCRUMBS_TEST_ONLY_MS", Duration::from_secs(1)),
            Duration::from_millis(250)
        );

        std::env::set_var("THREADCRUMBS_TEST_ONLY_MS", "soon");
        assert_eq!(
            env_millis("THREADCRUMBS_TEST_ONLY_MS", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
        std::env::remove_var("THREADCRUMBS_TEST_ONLY_MS");
    }
}
