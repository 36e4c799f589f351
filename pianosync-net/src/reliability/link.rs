//! Connection lifecycle states.

use serde::{Deserialize, Serialize};

/// `Connecting -> Connected -> (Reconnecting | Disconnected)`, and
/// `Reconnecting -> Connected | Disconnected`. `Disconnected` reached after
/// reconnects are exhausted (or on the server side) is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl LinkState {
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connected)
                | (Reconnecting, Reconnecting)
                | (Reconnecting, Disconnected)
        )
    }

    pub fn is_live(self) -> bool {
        self == LinkState::Connected
    }
}
