//! Shared data types for the Twilight Discord client crates.
//!
//! This crate intentionally does not model Discord's domain objects (guilds,
//! messages, users, and so on). It only carries the handful of types that the
//! REST and gateway layers need to agree on: authentication headers, gateway
//! intents, and JSON codec selection.

#![deny(unsafe_code)]

pub mod auth;
pub mod intents;
pub mod json;
