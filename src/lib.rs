//! Comment threading for Nostr events.
//!
//! Given a target event or address, [`ThreadEngine`] gathers every reply it
//! can find through a [`Transport`], resolves who replies to whom and keeps a
//! render-ready [`Thread`] up to date as results trickle in.

pub mod abbrev;
pub mod config;
pub mod discovery;
pub mod engine;
mod error;
pub mod event;
pub mod ingest;
pub mod memory;
pub mod nip19;
pub mod profiles;
pub mod relay_pool;
pub mod render;
pub mod resolve;
pub mod transport;
pub mod tree;

pub use config::Config;
pub use engine::{Inbound, SessionStatus, ThreadEngine, ThreadView};
pub use error::{Error, Result};
pub use event::{Coordinate, Reference, Tag, ThreadEvent};
pub use memory::MemoryRelay;
pub use nip19::{parse_target, Target};
pub use profiles::ProfileCache;
pub use relay_pool::RelayPool;
pub use render::render_thread;
pub use transport::{Query, RelayItem, Subscription, Transport};
pub use tree::{build_thread, Thread, ThreadNode};
