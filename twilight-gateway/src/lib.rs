//! Gateway shard and shard manager implementation for the Twilight
//! ecosystem.
//!
//! This crate speaks Discord's gateway protocol: the HELLO/IDENTIFY/RESUME
//! handshake, heartbeat liveness, zlib-stream compressed JSON framing, and
//! close-code-driven reconnection. [`Shard`] is a single connection's state
//! machine; [`ShardManager`] bootstraps and supervises however many shards a
//! bot runs, respecting the server-advertised identify concurrency window.
//!
//! This crate does not model Discord's domain objects (guilds, channels,
//! messages); dispatch payloads are handed to callers as raw JSON through
//! [`event::NamedEvent::Dispatch`] for them to deserialize.

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod heartbeat;
mod inflate;
pub mod manager;
pub mod shard;
pub mod stage;

pub use crate::{
    config::{Config, ConfigBuilder, Session, ShardId},
    error::{Error, ErrorType, Result},
    manager::{ShardManager, ShardManagerBuilder},
    shard::Shard,
    stage::Stage,
};

pub use twilight_gateway_queue::{IdentifyQueue, Queue};
pub use twilight_model::intents::Intents;
