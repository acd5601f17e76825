//! Peer coordination layer.
//!
//! Nodes announce themselves on a shared pub/sub topic, keep a registry of
//! the peers they hear from, maintain a latency-ranked list of circuit
//! relays, and exchange encrypted private messages with ACK-driven retries.
//!
//! Transport, durable log and crypto are collaborators behind traits; the
//! in-memory implementations in [`memory`] back tests and simulations.
//!
//! Wire format: JSON.
//! Crypto: ed25519 identities, X25519 sealed boxes with XChaCha20-Poly1305.

pub mod access;
pub mod config;
pub mod crypto;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod events;
pub mod memory;
pub mod messenger;
pub mod node;
pub mod registry;
pub mod relays;
pub mod runtime;
pub mod scheduler;
pub mod schema;
pub mod stats;
pub mod transport;
pub mod types;

pub use access::AccessControl;
pub use config::{CoordConfig, SchedulerIntervals};
pub use crypto::SealedBoxCrypto;
pub use dedup::DedupCache;
pub use envelope::Envelope;
pub use error::CoordError;
pub use events::{CoordEvent, DeliveredMessage};
pub use memory::{MemoryHub, MemoryLog, MemoryTransport};
pub use messenger::{EntrySource, Messenger, PendingDelivery};
pub use node::SelfRecord;
pub use registry::{is_fresh_peer, PeerRecord, PeerRegistry};
pub use relays::{remove_duplicates, sort_relays, LatencyRing, RelayManager, RelayRecord};
pub use runtime::{CoordHandle, CoordNodeBuilder, RuntimeChannels};
pub use schema::{AboutRequest, AboutResponse, Announcement, InboundAnnouncement};
pub use stats::CoordStats;
pub use transport::{Connection, Crypto, DurableLog, Identity, LogHandle, TopicMessage, Transport};
pub use types::{NodeClass, PeerId};
