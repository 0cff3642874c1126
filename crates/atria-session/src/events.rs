//! Session lifecycle events.

use serde::{Deserialize, Serialize};

/// Why a forced logout happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// The backend definitively reported no session after the monitor
    /// had seen one.
    SessionMissing,

    /// The session's expiry (minus the safety buffer) passed.
    SessionExpired,

    /// No user activity within the inactivity threshold.
    Inactivity,

    /// Another instance forced a logout.
    Remote,
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogoutReason::SessionMissing => write!(f, "session_missing"),
            LogoutReason::SessionExpired => write!(f, "session_expired"),
            LogoutReason::Inactivity => write!(f, "inactivity"),
            LogoutReason::Remote => write!(f, "remote"),
        }
    }
}

impl LogoutReason {
    /// Parse a reason carried in a cross-instance logout signal. Unknown
    /// strings map to [`LogoutReason::Remote`].
    pub fn from_signal(signal: &str) -> Self {
        match signal {
            "session_missing" => LogoutReason::SessionMissing,
            "session_expired" => LogoutReason::SessionExpired,
            "inactivity" => LogoutReason::Inactivity,
            _ => LogoutReason::Remote,
        }
    }
}

/// Events emitted by the session monitor.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The token was proactively refreshed; cached data may be stale and
    /// consumers should revalidate.
    TokenRefreshed,

    /// A validation attempt failed transiently. Informational only;
    /// never escalates to logout by itself.
    ValidationError { message: String },

    /// The session ended; all local state was cleared.
    ForcedLogout { reason: LogoutReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trips_through_signal() {
        for reason in [
            LogoutReason::SessionMissing,
            LogoutReason::SessionExpired,
            LogoutReason::Inactivity,
        ] {
            assert_eq!(LogoutReason::from_signal(&reason.to_string()), reason);
        }
    }

    #[test]
    fn test_unknown_signal_maps_to_remote() {
        assert_eq!(LogoutReason::from_signal("???"), LogoutReason::Remote);
    }
}
