//! Event types dispatched by a [`Shard`] and relayed by the [`ShardManager`].
//!
//! A shard carries two [`EventDispatcher`]s: one keyed by raw gateway
//! [`OpCode`], and one keyed by dispatch name (the payload's `t` field) plus
//! a handful of synthetic keys (`connect`, `disconnect`, `error`) for
//! lifecycle notifications that aren't themselves gateway dispatches.
//!
//! [`Shard`]: crate::Shard
//! [`ShardManager`]: crate::ShardManager

use crate::{dispatcher::DispatchKey, error::Error};
use serde_json::Value;
use std::sync::Arc;

/// Gateway opcode, as sent in the payload's `op` field.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum OpCode {
    /// An event was dispatched (`t`/`d`/`s` are all present).
    Dispatch,
    /// Fired periodically by the client to keep the connection alive, or by
    /// the gateway requesting an immediate heartbeat.
    Heartbeat,
    /// Start a new session during the initial handshake.
    Identify,
    /// Acknowledges a client's heartbeat was received.
    HeartbeatAck,
    /// Resume a previous session that was disconnected.
    Resume,
    /// The gateway is asking the client to reconnect and resume.
    Reconnect,
    /// The session has been invalidated; a new session must be started.
    InvalidSession,
    /// Sent immediately after connecting; contains the heartbeat interval.
    Hello,
}

impl OpCode {
    /// Convert a raw integer opcode received from the gateway.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }
}

impl DispatchKey for OpCode {}

/// Payload of an opcode-level gateway event.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum GatewayEvent {
    /// A named event was dispatched with sequence number `sequence`.
    Dispatch {
        /// Sequence number of the dispatch, used for heartbeating and resume.
        sequence: u64,
        /// Name of the dispatched event, e.g. `"READY"` or `"MESSAGE_CREATE"`.
        name: Box<str>,
        /// Raw `d` payload.
        data: Value,
    },
    /// The gateway is requesting an immediate heartbeat.
    Heartbeat {
        /// Sequence number the gateway last observed.
        sequence: u64,
    },
    /// A previously sent heartbeat was acknowledged.
    HeartbeatAck,
    /// First payload sent by the gateway after connecting.
    Hello {
        /// Interval, in milliseconds, at which the client must heartbeat.
        heartbeat_interval: u64,
    },
    /// The session is invalid. The boolean indicates whether it may be
    /// resumed (`true`) or a fresh session is required (`false`).
    InvalidSession(bool),
    /// The gateway is asking the client to reconnect and resume.
    Reconnect,
}

/// Key under which named (dispatch-name keyed) shard events are registered.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum NamedEventKey {
    /// A gateway dispatch event with this name, e.g. `"MESSAGE_CREATE"`.
    Dispatch(Box<str>),
    /// Any gateway dispatch event, regardless of name.
    AnyDispatch,
    /// The shard (re)established a websocket connection.
    Connected,
    /// The shard's connection dropped.
    Disconnected,
    /// The shard stopped permanently due to a fatal error.
    Error,
}

impl DispatchKey for NamedEventKey {
    fn ancestors(&self) -> Vec<Self> {
        match self {
            Self::Dispatch(_) => vec![self.clone(), Self::AnyDispatch],
            other => vec![other.clone()],
        }
    }
}

/// Value dispatched under a [`NamedEventKey`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum NamedEvent {
    /// A named dispatch event and its raw payload.
    Dispatch {
        /// Name of the dispatched event.
        name: Box<str>,
        /// Raw `d` payload.
        data: Value,
    },
    /// The shard (re)established a websocket connection.
    Connected,
    /// The shard's connection dropped; it may attempt to reconnect.
    Disconnected,
    /// The shard stopped permanently.
    Error(Arc<Error>),
}
