// ── Engine error taxonomy ──
//
// Every failure in the engine is one of these categories -- lower-layer
// errors (panel API, SSH, SQLite) never escape uncategorized. The
// `From<xprov_api::Error>` impl translates transport-layer errors into
// the matching category; the shell-path editors construct them directly
// with the write stage they had reached.

use thiserror::Error;

use crate::model::WriteStage;

/// Unified error type for the provisioning engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Discovery ────────────────────────────────────────────────────
    /// No reachable endpoint, config path, or store path could be found.
    #[error("Discovery failed for {what}: {detail}")]
    Discovery { what: String, detail: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Targeting ────────────────────────────────────────────────────
    /// The target inbound does not exist on the backend.
    #[error("Inbound not found: {inbound}")]
    InboundNotFound { inbound: String },

    // ── Key encoding ─────────────────────────────────────────────────
    /// A required protocol parameter is missing -- key issuance is
    /// aborted rather than emitting a URI that cannot connect.
    #[error("Protocol validation failed: {message}")]
    ProtocolValidation { message: String },

    // ── Write outcomes ───────────────────────────────────────────────
    /// One state surface was updated while a sibling surface failed.
    /// `stage` is the furthest stage the write reached.
    #[error("Partial write (reached {stage}): {detail}")]
    PartialWrite { stage: WriteStage, detail: String },

    /// The post-restart check did not find the client.
    #[error("Verification failed: {detail}")]
    Verification { detail: String },

    /// The restart could not be triggered. Non-fatal for writes -- the
    /// caller may still consider the write successful.
    #[error("Restart failed: {detail}")]
    Restart { detail: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn discovery(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Discovery {
            what: what.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ProtocolValidation {
            message: message.into(),
        }
    }

    /// Returns `true` when a retry with the same inputs could succeed
    /// (transient transport conditions, not validation or targeting).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Discovery { .. } | Self::Restart { .. } | Self::Verification { .. }
        )
    }
}

// ── Conversion from the panel API layer ──────────────────────────────

impl From<xprov_api::Error> for EngineError {
    fn from(err: xprov_api::Error) -> Self {
        match err {
            xprov_api::Error::Authentication { message } => Self::Authentication { message },
            xprov_api::Error::SessionExpired => Self::Authentication {
                message: "panel session expired".into(),
            },
            xprov_api::Error::Discovery { what, tried } => Self::Discovery {
                what: what.to_owned(),
                detail: format!("tried {}", tried.join(", ")),
            },
            xprov_api::Error::InboundNotFound { inbound_id } => Self::InboundNotFound {
                inbound: format!("id {inbound_id}"),
            },
            xprov_api::Error::Panel { message } => Self::Internal(format!("panel: {message}")),
            xprov_api::Error::Transport(e) => Self::Discovery {
                what: "panel".into(),
                detail: e.to_string(),
            },
            xprov_api::Error::InvalidUrl(e) => Self::Config {
                message: format!("invalid panel URL: {e}"),
            },
            xprov_api::Error::Tls(message) => Self::Config {
                message: format!("TLS setup: {message}"),
            },
            xprov_api::Error::Deserialization { message, .. } => {
                Self::Internal(format!("panel response: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_auth_errors_map_to_authentication() {
        let err: EngineError = xprov_api::Error::SessionExpired.into();
        assert!(matches!(err, EngineError::Authentication { .. }));
    }

    #[test]
    fn api_discovery_keeps_tried_paths() {
        let err: EngineError = xprov_api::Error::Discovery {
            what: "restart",
            tried: vec!["/a".into(), "/b".into()],
        }
        .into();
        match err {
            EngineError::Discovery { what, detail } => {
                assert_eq!(what, "restart");
                assert!(detail.contains("/a") && detail.contains("/b"));
            }
            other => panic!("expected Discovery, got {other:?}"),
        }
    }
}
