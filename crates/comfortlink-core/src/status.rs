// ── Connection status ──

use std::fmt;

/// Why the connection is offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    /// Credentials rejected; retrying on the normal interval won't help.
    ConfigurationError,
    /// Portal unreachable or answering with errors.
    CommunicationError,
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationError => f.write_str("configuration error"),
            Self::CommunicationError => f.write_str("communication error"),
        }
    }
}

/// Account connection status observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No cycle has classified the connection yet.
    #[default]
    Unknown,
    Online,
    Offline {
        reason: OfflineReason,
        message: String,
    },
}

impl ConnectionStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    pub(crate) fn offline(reason: OfflineReason, message: impl Into<String>) -> Self {
        Self::Offline {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Online => f.write_str("online"),
            Self::Offline { reason, message } => write!(f, "offline ({reason}): {message}"),
        }
    }
}
