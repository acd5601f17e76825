/// Collaborator interfaces the coordination layer runs on.
///
/// In production these wrap a real P2P stack, a replicated append-only log
/// store and a crypto provider. The [`memory`](crate::memory) module and
/// [`SealedBoxCrypto`](crate::crypto::SealedBoxCrypto) provide in-process
/// implementations for tests and simulation.
use std::sync::Arc;

use crate::error::CoordError;
use crate::types::PeerId;

/// One message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    pub topic: String,
    pub from: PeerId,
    pub data: Vec<u8>,
}

/// A live transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub peer_id: PeerId,
    pub dial_addr: String,
}

/// Callback invoked for each message on a subscribed topic.
///
/// Must not block: implementations call it from their delivery path.
pub type TopicHandler = Arc<dyn Fn(TopicMessage) + Send + Sync>;

/// Callback invoked with the log id whenever a durable log replicates new entries.
pub type ReplicateHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Broadcast-style P2P transport: pub/sub topics plus dialable addresses.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Our own transport identity.
    fn local_peer_id(&self) -> PeerId;

    /// Addresses other nodes can dial us on.
    async fn listen_addrs(&self) -> Vec<String>;

    async fn subscribe(&self, topic: &str, handler: TopicHandler) -> Result<(), CoordError>;

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), CoordError>;

    /// Dial `addr`. Returns whether a connection is now established.
    async fn connect(&self, addr: &str) -> bool;

    /// Hang up on a peer id or dial address.
    async fn disconnect(&self, peer_or_addr: &str) -> bool;

    async fn list_connected(&self) -> Vec<Connection>;
}

/// Handle to an opened durable log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHandle {
    pub id: String,
}

/// Replicated append-only per-peer log, used as a fallback message channel.
#[async_trait::async_trait]
pub trait DurableLog: Send + Sync {
    /// Open (create) a fresh log owned by `owner`.
    async fn open(&self, owner: &str) -> Result<LogHandle, CoordError>;

    async fn append(&self, log_id: &str, entry: Vec<u8>) -> Result<(), CoordError>;

    /// The last `n` entries, oldest first.
    async fn tail(&self, log_id: &str, n: usize) -> Result<Vec<Vec<u8>>, CoordError>;

    async fn on_replicate(&self, log_id: &str, handler: ReplicateHandler)
        -> Result<(), CoordError>;
}

/// A node's cryptographic identity.
#[derive(Clone)]
pub struct Identity {
    /// Identity-derived address advertised as `cryptoAddresses`.
    pub dial_id: String,
    /// Hex public encryption key, advertised as `encryptPubKey`.
    pub public_key: String,
    pub secret: [u8; 32],
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("dial_id", &self.dial_id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Identity generation and public-key encryption.
pub trait Crypto: Send + Sync {
    fn generate_identity(&self) -> Result<Identity, CoordError>;

    /// Encrypt for the holder of hex `public_key`.
    fn encrypt(&self, public_key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CoordError>;

    fn decrypt(&self, secret: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, CoordError>;
}
