use serde::{Deserialize, Serialize};
use std::fmt;

/// State transitions of the session between a broker and the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The connection dropped; the session may still be alive on the server.
    ConnectionLost,
    /// The connection came back within the session timeout.
    Reconnected,
    /// The session expired; ephemeral state owned by it is gone.
    SessionLost,
    /// A new session was established after expiry.
    SessionReestablished,
}

impl SessionEvent {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionEvent::Reconnected | SessionEvent::SessionReestablished
        )
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::ConnectionLost => "connection_lost",
            SessionEvent::Reconnected => "reconnected",
            SessionEvent::SessionLost => "session_lost",
            SessionEvent::SessionReestablished => "session_reestablished",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_states() {
        assert!(SessionEvent::Reconnected.is_connected());
        assert!(SessionEvent::SessionReestablished.is_connected());
        assert!(!SessionEvent::ConnectionLost.is_connected());
        assert!(!SessionEvent::SessionLost.is_connected());
    }
}
