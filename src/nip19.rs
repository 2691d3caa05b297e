use crate::error::{Error, Result};
use crate::event::{Coordinate, Reference};
use nostr::nips::nip19::Nip19;
use nostr_sdk::prelude::*;
use std::fmt;

/// The thing a comment panel is open on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Event {
        id: String,
    },
    /// Addressable events are referenced by coordinate, and optionally by the
    /// id of the version we happen to know about.
    Address {
        coordinate: Coordinate,
        id: Option<String>,
    },
}

impl Target {
    pub fn event(id: impl Into<String>) -> Self {
        Target::Event { id: id.into() }
    }

    pub fn address(coordinate: Coordinate) -> Self {
        Target::Address {
            coordinate,
            id: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Target::Event { id } => Some(id),
            Target::Address { id, .. } => id.as_deref(),
        }
    }

    /// Every reference an event may use to point at this target
    pub fn references(&self) -> Vec<Reference> {
        match self {
            Target::Event { id } => vec![Reference::Event(id.clone())],
            Target::Address { coordinate, id } => {
                let mut refs = vec![Reference::Coordinate(coordinate.clone())];
                if let Some(id) = id {
                    refs.push(Reference::Event(id.clone()));
                }
                refs
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Event { id } => write!(f, "{}", id),
            Target::Address { coordinate, .. } => write!(f, "{}", coordinate),
        }
    }
}

pub fn nip19_target(nip19: &Nip19) -> Result<Target> {
    match nip19 {
        Nip19::EventId(evid) => Ok(Target::event(evid.to_hex())),
        Nip19::Event(ev) => Ok(Target::event(ev.event_id.to_hex())),
        Nip19::Coordinate(naddr) => {
            let coord = &naddr.coordinate;
            Ok(Target::address(Coordinate::new(
                coord.kind.as_u16(),
                coord.public_key.to_hex(),
                coord.identifier.clone(),
            )))
        }
        _ => Err(Error::NotThreadable),
    }
}

pub fn parse_target(bech32: &str) -> Result<(Target, Vec<RelayUrl>)> {
    let bech32 = bech32.trim().trim_start_matches("nostr:");
    let nip19 = Nip19::from_bech32(bech32)?;
    Ok((nip19_target(&nip19)?, nip19_relays(&nip19)))
}

/// Do we have relays for this request? If so we can use these when
/// looking for replies
pub fn nip19_relays(nip19: &Nip19) -> Vec<RelayUrl> {
    match nip19 {
        Nip19::Event(ev) => ev.relays.clone(),
        Nip19::Coordinate(naddr) => naddr.relays.clone(),
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_target_references() {
        let target = Target::event("abc");
        assert_eq!(target.id(), Some("abc"));
        assert_eq!(target.references(), vec![Reference::Event("abc".to_string())]);
        assert_eq!(target.to_string(), "abc");
    }

    #[test]
    fn test_address_target_references() {
        let coord = Coordinate::new(30023, "abc123", "my-article");
        let target = Target::Address {
            coordinate: coord.clone(),
            id: Some("v1".to_string()),
        };
        assert_eq!(
            target.references(),
            vec![
                Reference::Coordinate(coord),
                Reference::Event("v1".to_string())
            ]
        );
        assert_eq!(target.to_string(), "30023:abc123:my-article");
        assert_eq!(Target::address(Coordinate::new(1, "a", "b")).id(), None);
    }

    #[test]
    fn test_note_bech32_target() {
        let id = EventId::all_zeros();
        let note = id.to_bech32().unwrap();
        let (target, relays) = parse_target(&format!("nostr:{note}")).unwrap();
        assert_eq!(target, Target::event(id.to_hex()));
        assert!(relays.is_empty());
    }

    #[test]
    fn test_npub_not_threadable() {
        let keys = Keys::generate();
        let npub = keys.public_key().to_bech32().unwrap();
        assert!(matches!(parse_target(&npub), Err(Error::NotThreadable)));
    }

    #[test]
    fn test_garbage_is_nip19_error() {
        assert!(matches!(parse_target("nevent1garbage"), Err(Error::Nip19(_))));
    }
}
