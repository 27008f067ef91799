//! Discord REST API client: request dispatch gated by a dynamic,
//! server-discovered ratelimit bucket cache.
//!
//! This crate does not model Discord's domain objects (guilds, channels,
//! messages, and so on); callers build a [`routing::Route`], dispatch it
//! through [`Client::request`], and deserialize the returned
//! [`response::Response`] themselves.

#![deny(unsafe_code)]

pub mod api_error;
pub mod client;
pub mod error;
pub mod response;
pub mod routing;

pub use crate::{client::Client, error::Error, response::Response};
