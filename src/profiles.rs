//! Author metadata cache.
//!
//! Cheap to clone and safe to share between engines (and with whatever draws
//! the thread). Lookups never block thread construction: an author without
//! metadata is labelled with a placeholder until their profile shows up.

use crate::abbrev::placeholder_name;
use crate::error::{Error, Result};
use crate::event::{ThreadEvent, METADATA};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub picture: Option<String>,
    pub nip05: Option<String>,
    pub created_at: u64,
}

impl Profile {
    /// Parse kind-0 content
    pub fn from_metadata(content: &str, created_at: u64) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Generic("metadata is not an object".to_string()))?;

        let field = |key: &str| {
            obj.get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        Ok(Profile {
            name: field("name"),
            display_name: field("display_name").or_else(|| field("displayName")),
            picture: field("picture"),
            nip05: field("nip05"),
            created_at,
        })
    }

    pub fn best_name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEntry {
    Pending,
    Loaded(Profile),
    Missing,
}

/// What the caller of [`ProfileCache::get_or_fetch`] should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Cached(Profile),
    /// Nobody asked yet, the caller now owns the fetch
    Fetch,
    /// Someone else is already fetching
    Waiting,
    /// Already looked, nothing usable
    Unavailable,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileCache {
    entries: Arc<DashMap<String, ProfileEntry>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_fetch(&self, author: &str) -> Lookup {
        match self.entries.entry(author.to_owned()) {
            Entry::Occupied(entry) => match entry.get() {
                ProfileEntry::Pending => Lookup::Waiting,
                ProfileEntry::Loaded(profile) => Lookup::Cached(profile.clone()),
                ProfileEntry::Missing => Lookup::Unavailable,
            },
            Entry::Vacant(entry) => {
                entry.insert(ProfileEntry::Pending);
                Lookup::Fetch
            }
        }
    }

    /// Record a metadata event. Older metadata never replaces newer.
    /// Returns whether the cached profile changed.
    pub fn store(&self, event: &ThreadEvent) -> bool {
        if event.kind != METADATA {
            return false;
        }

        let profile = match Profile::from_metadata(&event.content, event.created_at) {
            Ok(profile) => profile,
            Err(err) => {
                debug!("unusable metadata for {}: {}", event.author, err);
                self.mark_missing(&event.author);
                return false;
            }
        };

        let mut entry = self
            .entries
            .entry(event.author.clone())
            .or_insert(ProfileEntry::Pending);

        if let ProfileEntry::Loaded(existing) = entry.value() {
            if existing.created_at >= profile.created_at {
                return false;
            }
        }

        *entry.value_mut() = ProfileEntry::Loaded(profile);
        true
    }

    /// The lookup finished without a profile
    pub fn mark_missing(&self, author: &str) {
        if let Some(mut entry) = self.entries.get_mut(author) {
            if *entry.value() == ProfileEntry::Pending {
                *entry.value_mut() = ProfileEntry::Missing;
            }
        }
    }

    /// Forget an unfinished lookup so the next caller fetches again
    pub fn abandon(&self, author: &str) {
        self.entries
            .remove_if(author, |_, entry| *entry == ProfileEntry::Pending);
    }

    pub fn get(&self, author: &str) -> Option<Profile> {
        match self.entries.get(author)?.value() {
            ProfileEntry::Loaded(profile) => Some(profile.clone()),
            _ => None,
        }
    }

    pub fn entry(&self, author: &str) -> Option<ProfileEntry> {
        self.entries.get(author).map(|e| e.value().clone())
    }

    /// Display label for an author, falling back to a placeholder derived
    /// from the identity itself
    pub fn label(&self, author: &str) -> String {
        self.get(author)
            .and_then(|p| p.best_name().map(str::to_owned))
            .unwrap_or_else(|| placeholder_name(author))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
