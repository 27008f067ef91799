//! Errors that can occur while running a [`Shard`] or [`ShardManager`].
//!
//! [`Shard`]: crate::Shard
//! [`ShardManager`]: crate::ShardManager

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// A result alias with the error type being the gateway's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that occurred while running a shard or the shard manager.
#[derive(Debug)]
pub struct Error {
    pub(crate) kind: ErrorType,
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorType) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source(
        kind: ErrorType,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::Establishing => {
                f.write_str("establishing the websocket connection to the gateway failed")
            }
            ErrorType::Sending => f.write_str("sending a message over the websocket failed"),
            ErrorType::Decompressing => {
                f.write_str("a frame could not be decompressed, it may be invalid")
            }
            ErrorType::Deserializing => {
                f.write_str("payload received from the gateway could not be deserialized")
            }
            ErrorType::SessionInactive => {
                f.write_str("the shard does not have an active session to resume")
            }
            ErrorType::Closed { code } => {
                write!(f, "shard was closed by the gateway with code {code}")
            }
            ErrorType::Authentication => {
                f.write_str("the provided authorization token is invalid")
            }
            ErrorType::Sharding { code } => write!(
                f,
                "the shard configuration was rejected by the gateway (close code {code})"
            ),
            ErrorType::Intents { code } => write!(
                f,
                "at least one requested intent is invalid or disallowed for this bot (close code {code})"
            ),
            ErrorType::NoCapacity => {
                f.write_str("session start limit has no identifies remaining")
            }
            ErrorType::RetrievingGatewayInfo => {
                f.write_str("retrieving gateway connection info via GET /gateway/bot failed")
            }
            ErrorType::RescaleInProgress => {
                f.write_str("a rescale is already in progress")
            }
            ErrorType::NotStarted => {
                f.write_str("the shard manager has not been started")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// Establishing the websocket connection with the gateway failed, such as
    /// due to a network or TLS error.
    Establishing,
    /// A message could not be sent over the websocket connection.
    ///
    /// This indicates the shard is either mid-reconnect or has been closed.
    Sending,
    /// A received frame could not be decompressed.
    Decompressing,
    /// A received payload could not be deserialized.
    Deserializing,
    /// A resume was attempted without an active session.
    SessionInactive,
    /// The gateway closed the connection with a non-fatal code that this
    /// shard did not know how to recover from.
    Closed {
        /// Close code sent by the gateway.
        code: u16,
    },
    /// The provided authorization token was rejected by the gateway (close
    /// code 4004).
    Authentication,
    /// The shard's configuration (ID, total count) was rejected, either
    /// because it's invalid (4010) or because sharding is now required for
    /// this bot (4011).
    Sharding {
        /// Close code sent by the gateway.
        code: u16,
    },
    /// At least one requested intent is invalid (4013) or the bot isn't
    /// allowed to use it (4014).
    Intents {
        /// Close code sent by the gateway.
        code: u16,
    },
    /// The session start limit has been exhausted; no more shards may
    /// identify until it resets.
    NoCapacity,
    /// The shard manager could not retrieve `GET /gateway/bot` to learn the
    /// recommended shard count and identify concurrency.
    RetrievingGatewayInfo,
    /// [`ShardManager::rescale`] was called while a previous rescale was
    /// still in progress.
    ///
    /// [`ShardManager::rescale`]: crate::ShardManager::rescale
    RescaleInProgress,
    /// An operation requiring [`ShardManager::start`] to have succeeded was
    /// attempted before it ran.
    ///
    /// [`ShardManager::start`]: crate::ShardManager::start
    NotStarted,
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorType};
    use static_assertions::assert_impl_all;
    use std::{error::Error as StdError, fmt::Debug};

    assert_impl_all!(ErrorType: Debug, Send, Sync);
    assert_impl_all!(Error: StdError, Send, Sync);

    #[test]
    fn display_includes_close_code() {
        let error = Error::new(ErrorType::Sharding { code: 4011 });
        assert!(error.to_string().contains("4011"));
    }
}
