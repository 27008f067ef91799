//! The current connection stage of a [`Shard`].
//!
//! [`Shard`]: crate::Shard

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Current stage of a shard's connection to the gateway.
///
/// Stages generally progress as:
///
/// `Disconnected` → `Connecting` → `AwaitingHello` → (`Identifying` or
/// `Resuming`) → `Ready` → (`Reconnecting` or `ClosedFatal`)
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// No websocket connection is open.
    Disconnected,
    /// A websocket handshake with the gateway is in progress.
    Connecting,
    /// The handshake completed and the shard is waiting for the gateway's
    /// `HELLO` payload.
    AwaitingHello,
    /// `HELLO` was received and the shard sent `IDENTIFY` to start a new
    /// session.
    Identifying,
    /// `HELLO` was received and the shard sent `RESUME` to continue an
    /// existing session.
    Resuming,
    /// The session is fully established; `READY` (or `RESUMED`) has been
    /// received.
    Ready,
    /// The connection dropped and the shard is about to reconnect.
    Reconnecting,
    /// The shard closed permanently due to an unrecoverable error, such as an
    /// invalid token or disallowed intents.
    ClosedFatal,
}

impl Stage {
    /// Whether the shard believes it has an active, usable session with the
    /// gateway.
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether the shard has permanently stopped and will not reconnect.
    pub const fn is_fatally_closed(self) -> bool {
        matches!(self, Self::ClosedFatal)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::AwaitingHello => "AwaitingHello",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
            Self::Ready => "Ready",
            Self::Reconnecting => "Reconnecting",
            Self::ClosedFatal => "ClosedFatal",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Stage;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Stage: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn default_is_disconnected() {
        assert_eq!(Stage::Disconnected, Stage::default());
    }

    #[test]
    fn formatting() {
        assert_eq!("Disconnected", Stage::Disconnected.to_string());
        assert_eq!("AwaitingHello", Stage::AwaitingHello.to_string());
        assert_eq!("ClosedFatal", Stage::ClosedFatal.to_string());
    }

    #[test]
    fn predicates() {
        assert!(Stage::Ready.is_ready());
        assert!(!Stage::Identifying.is_ready());
        assert!(Stage::ClosedFatal.is_fatally_closed());
        assert!(!Stage::Reconnecting.is_fatally_closed());
    }
}
