//! Decoded protocol events.
//!
//! Raw tag arrays are decoded once, when an event enters the engine. Everything
//! downstream (reference checks, parent resolution, discovery) pattern-matches on
//! [`Tag`] instead of re-reading string arrays.

use std::fmt;

pub const METADATA: u16 = 0;
pub const TEXT_NOTE: u16 = 1;
pub const REPOST: u16 = 6;
pub const GENERIC_REPOST: u16 = 16;
pub const COMMENT: u16 = 1111;
pub const HIGHLIGHT: u16 = 9802;
pub const LONG_FORM: u16 = 30023;

pub fn is_addressable(kind: u16) -> bool {
    (30000..40000).contains(&kind)
}

/// Replaceable kinds that are addressed with an empty discriminator
fn is_replaceable(kind: u16) -> bool {
    kind == METADATA || kind == 3 || (10000..20000).contains(&kind)
}

/// Lowercase reference tags point at the immediate parent, uppercase ones
/// (NIP-22) at the root of the conversation scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagScope {
    Root,
    Parent,
}

impl TagScope {
    fn of(name: &str) -> Self {
        if name.chars().all(|c| c.is_ascii_uppercase()) {
            TagScope::Root
        } else {
            TagScope::Parent
        }
    }
}

/// `kind:author:discriminator` key of an addressable event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub kind: u16,
    pub author: String,
    pub discriminator: String,
}

impl Coordinate {
    pub fn new(kind: u16, author: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            kind,
            author: author.into(),
            discriminator: discriminator.into(),
        }
    }

    /// Parse a coordinate string. The discriminator is everything after the
    /// second colon, so it may itself contain colons.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let kind = parts.next()?.parse::<u16>().ok()?;
        let author = parts.next()?;
        let discriminator = parts.next()?;

        if author.is_empty() {
            return None;
        }

        Some(Self::new(kind, author, discriminator))
    }

    /// Does `event` live at this coordinate?
    pub fn matches(&self, event: &ThreadEvent) -> bool {
        event.address().as_ref() == Some(self)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.author, self.discriminator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub id: String,
    pub relay: Option<String>,
    /// NIP-10 marker (`root`, `reply`, `mention`). Kept for display only.
    pub marker: Option<String>,
    pub scope: TagScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    EventRef(EventRef),
    CoordinateRef {
        coordinate: Coordinate,
        scope: TagScope,
    },
    ParticipantRef {
        id: String,
        role: Option<String>,
    },
    Discriminator(String),
    Other {
        name: String,
        values: Vec<String>,
    },
}

impl Tag {
    /// Decode a raw tag. Anything malformed ends up as [`Tag::Other`].
    pub fn decode<S: AsRef<str>>(raw: &[S]) -> Self {
        let Some((name, values)) = raw.split_first() else {
            return Tag::Other {
                name: String::new(),
                values: vec![],
            };
        };
        let name = name.as_ref();
        let value_at = |i: usize| {
            values
                .get(i)
                .map(|v| v.as_ref())
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        match name {
            "e" | "E" => {
                if let Some(id) = value_at(0) {
                    return Tag::EventRef(EventRef {
                        id,
                        relay: value_at(1),
                        marker: value_at(2),
                        scope: TagScope::of(name),
                    });
                }
            }
            "a" | "A" => {
                if let Some(coordinate) = value_at(0).as_deref().and_then(Coordinate::parse) {
                    return Tag::CoordinateRef {
                        coordinate,
                        scope: TagScope::of(name),
                    };
                }
            }
            "p" => {
                if let Some(id) = value_at(0) {
                    return Tag::ParticipantRef {
                        id,
                        role: value_at(2),
                    };
                }
            }
            "d" => {
                if let Some(d) = values.first() {
                    return Tag::Discriminator(d.as_ref().to_owned());
                }
            }
            _ => {}
        }

        Tag::Other {
            name: name.to_owned(),
            values: values.iter().map(|v| v.as_ref().to_owned()).collect(),
        }
    }
}

/// Something an event can point at. Used both to check that relay results
/// really answer a query and to describe what a query asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Event(String),
    Coordinate(Coordinate),
    Author(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Event(id) => write!(f, "#e:{}", id),
            Reference::Coordinate(c) => write!(f, "#a:{}", c),
            Reference::Author(pk) => write!(f, "author:{}", pk),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEvent {
    pub id: String,
    pub author: String,
    pub kind: u16,
    pub created_at: u64,
    pub content: String,
    pub tags: Vec<Tag>,
}

impl ThreadEvent {
    pub fn from_raw<I, T, S>(
        id: impl Into<String>,
        author: impl Into<String>,
        kind: u16,
        created_at: u64,
        content: impl Into<String>,
        tags: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[S]>,
        S: AsRef<str>,
    {
        Self {
            id: id.into(),
            author: author.into(),
            kind,
            created_at,
            content: content.into(),
            tags: tags.into_iter().map(|t| Tag::decode(t.as_ref())).collect(),
        }
    }

    /// `e` tags pointing at a parent, in tag order
    pub fn parent_event_refs(&self) -> impl DoubleEndedIterator<Item = &EventRef> {
        self.tags.iter().filter_map(|tag| match tag {
            Tag::EventRef(r) if r.scope == TagScope::Parent => Some(r),
            _ => None,
        })
    }

    /// `a` tags pointing at a parent, in tag order
    pub fn parent_coordinate_refs(&self) -> impl Iterator<Item = &Coordinate> {
        self.tags.iter().filter_map(|tag| match tag {
            Tag::CoordinateRef {
                coordinate,
                scope: TagScope::Parent,
            } => Some(coordinate),
            _ => None,
        })
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|tag| match tag {
            Tag::ParticipantRef { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn discriminator(&self) -> Option<&str> {
        self.tags.iter().find_map(|tag| match tag {
            Tag::Discriminator(d) => Some(d.as_str()),
            _ => None,
        })
    }

    /// The coordinate of this event, if it carries a discriminator
    pub fn coordinate(&self) -> Option<Coordinate> {
        self.discriminator()
            .map(|d| Coordinate::new(self.kind, self.author.clone(), d))
    }

    /// Where this event can be addressed: its `d` coordinate, or the empty
    /// discriminator for replaceable kinds without one
    pub fn address(&self) -> Option<Coordinate> {
        self.coordinate().or_else(|| {
            is_replaceable(self.kind).then(|| Coordinate::new(self.kind, self.author.clone(), ""))
        })
    }

    /// Does this event point at `reference`? Root and parent scoped tags
    /// both count.
    pub fn references(&self, reference: &Reference) -> bool {
        match reference {
            Reference::Event(id) => self.tags.iter().any(|tag| match tag {
                Tag::EventRef(r) => &r.id == id,
                _ => false,
            }),
            Reference::Coordinate(wanted) => self.tags.iter().any(|tag| match tag {
                Tag::CoordinateRef { coordinate, .. } => coordinate == wanted,
                _ => false,
            }),
            Reference::Author(pk) => &self.author == pk,
        }
    }
}

impl From<&nostr::Event> for ThreadEvent {
    fn from(event: &nostr::Event) -> Self {
        ThreadEvent::from_raw(
            event.id.to_hex(),
            event.pubkey.to_hex(),
            event.kind.as_u16(),
            event.created_at.as_secs(),
            event.content.clone(),
            event.tags.iter().map(|tag| tag.as_slice()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_parse() {
        let c = Coordinate::parse("30023:abc123:my-article").unwrap();
        assert_eq!(c, Coordinate::new(30023, "abc123", "my-article"));
        assert_eq!(c.to_string(), "30023:abc123:my-article");

        // discriminators may contain colons
        let c = Coordinate::parse("30023:abc:a:b:c").unwrap();
        assert_eq!(c.discriminator, "a:b:c");

        // empty discriminator is fine
        assert_eq!(Coordinate::parse("10002:abc:").unwrap().discriminator, "");
    }

    #[test]
    fn test_coordinate_parse_malformed() {
        assert!(Coordinate::parse("30023:abc").is_none());
        assert!(Coordinate::parse("article:abc:d").is_none());
        assert!(Coordinate::parse("30023::d").is_none());
        assert!(Coordinate::parse("").is_none());
        assert!(Coordinate::parse("99999999:abc:d").is_none());
    }

    #[test]
    fn test_decode_tags() {
        assert_eq!(
            Tag::decode(&["e", "abc", "wss://relay.damus.io", "reply"]),
            Tag::EventRef(EventRef {
                id: "abc".to_string(),
                relay: Some("wss://relay.damus.io".to_string()),
                marker: Some("reply".to_string()),
                scope: TagScope::Parent,
            })
        );

        assert_eq!(
            Tag::decode(&["E", "root", "", "x"]),
            Tag::EventRef(EventRef {
                id: "root".to_string(),
                relay: None,
                marker: Some("x".to_string()),
                scope: TagScope::Root,
            })
        );

        assert_eq!(
            Tag::decode(&["A", "30023:abc:d"]),
            Tag::CoordinateRef {
                coordinate: Coordinate::new(30023, "abc", "d"),
                scope: TagScope::Root,
            }
        );

        assert_eq!(
            Tag::decode(&["p", "pk", "", "author"]),
            Tag::ParticipantRef {
                id: "pk".to_string(),
                role: Some("author".to_string()),
            }
        );

        assert_eq!(Tag::decode(&["d", ""]), Tag::Discriminator(String::new()));
    }

    #[test]
    fn test_decode_malformed_tags_become_other() {
        assert!(matches!(Tag::decode(&["e"]), Tag::Other { .. }));
        assert!(matches!(Tag::decode(&["e", ""]), Tag::Other { .. }));
        assert!(matches!(Tag::decode(&["a", "nope"]), Tag::Other { .. }));
        assert!(matches!(Tag::decode(&["d"]), Tag::Other { .. }));
        assert!(matches!(Tag::decode::<&str>(&[]), Tag::Other { .. }));
        assert_eq!(
            Tag::decode(&["t", "nostr"]),
            Tag::Other {
                name: "t".to_string(),
                values: vec!["nostr".to_string()],
            }
        );
    }

    #[test]
    fn test_references_both_scopes() {
        let ev = ThreadEvent::from_raw(
            "c1",
            "alice",
            COMMENT,
            10,
            "hi",
            vec![vec!["E", "root"], vec!["a", "30023:bob:post"]],
        );

        assert!(ev.references(&Reference::Event("root".to_string())));
        assert!(ev.references(&Reference::Coordinate(Coordinate::new(
            30023, "bob", "post"
        ))));
        assert!(!ev.references(&Reference::Event("other".to_string())));
        assert!(ev.references(&Reference::Author("alice".to_string())));

        // root scoped tags are not parent candidates
        assert_eq!(ev.parent_event_refs().count(), 0);
        assert_eq!(ev.parent_coordinate_refs().count(), 1);
    }

    #[test]
    fn test_coordinate_matches() {
        let article = ThreadEvent::from_raw(
            "art",
            "abc123",
            LONG_FORM,
            1,
            "",
            vec![vec!["d", "my-article"]],
        );
        assert_eq!(
            article.coordinate(),
            Some(Coordinate::new(LONG_FORM, "abc123", "my-article"))
        );
        assert!(Coordinate::new(LONG_FORM, "abc123", "my-article").matches(&article));
        assert!(!Coordinate::new(LONG_FORM, "abc123", "other").matches(&article));
        assert!(!Coordinate::new(LONG_FORM, "zzz", "my-article").matches(&article));
        assert!(!Coordinate::new(30024, "abc123", "my-article").matches(&article));

        let note = ThreadEvent::from_raw("n", "abc123", TEXT_NOTE, 1, "", Vec::<Vec<&str>>::new());
        assert!(!Coordinate::new(TEXT_NOTE, "abc123", "").matches(&note));
        assert_eq!(note.address(), None);

        let meta = ThreadEvent::from_raw("m", "abc123", METADATA, 1, "{}", Vec::<Vec<&str>>::new());
        assert_eq!(meta.address(), Some(Coordinate::new(METADATA, "abc123", "")));
        assert!(Coordinate::new(METADATA, "abc123", "").matches(&meta));
    }

    #[test]
    fn test_from_nostr_event() {
        use nostr_sdk::prelude::{EventBuilder, EventId, Keys, Kind, Tag as NostrTag};

        let keys = Keys::generate();
        let parent = EventId::all_zeros();
        let signed = EventBuilder::new(Kind::TextNote, "hello")
            .tags([NostrTag::event(parent)])
            .sign_with_keys(&keys)
            .unwrap();

        let ev = ThreadEvent::from(&signed);
        assert_eq!(ev.id, signed.id.to_hex());
        assert_eq!(ev.author, keys.public_key().to_hex());
        assert_eq!(ev.kind, TEXT_NOTE);
        assert_eq!(ev.content, "hello");
        assert_eq!(
            ev.parent_event_refs().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec![parent.to_hex()]
        );
    }
}
