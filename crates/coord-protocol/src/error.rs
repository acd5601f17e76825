/// Errors surfaced by the coordination layer.
///
/// Most network-facing failures are absorbed and logged by the component that
/// hit them; these variants are what crosses an API boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("durable log error: {0}")]
    DurableLog(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("unknown peer: {peer_id}")]
    UnknownPeer { peer_id: String },

    #[error("no public key announced by {peer_id}")]
    MissingPublicKey { peer_id: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("relay list fetch failed: {0}")]
    RelayList(String),

    #[error("node is shutting down")]
    Shutdown,
}

impl From<serde_json::Error> for CoordError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            CoordError::Deserialization(e.to_string())
        } else {
            CoordError::Serialization(e.to_string())
        }
    }
}

impl From<reqwest::Error> for CoordError {
    fn from(e: reqwest::Error) -> Self {
        CoordError::RelayList(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_missing_collaborator() {
        let err = CoordError::MissingCollaborator("durable log");
        assert_eq!(err.to_string(), "missing collaborator: durable log");
    }

    #[test]
    fn test_display_missing_public_key() {
        let err = CoordError::MissingPublicKey {
            peer_id: "QmPeer".into(),
        };
        assert_eq!(err.to_string(), "no public key announced by QmPeer");
    }

    #[test]
    fn test_display_unknown_peer() {
        let err = CoordError::UnknownPeer {
            peer_id: "QmGhost".into(),
        };
        assert_eq!(err.to_string(), "unknown peer: QmGhost");
    }

    #[test]
    fn malformed_json_maps_to_deserialization() {
        let err: CoordError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, CoordError::Deserialization(_)), "{err:?}");
    }

    #[test]
    fn test_display_shutdown() {
        assert_eq!(CoordError::Shutdown.to_string(), "node is shutting down");
    }
}
