//! Concurrency primitives and bookkeeping that implement Discord's REST
//! ratelimiting scheme.
//!
//! This crate has no network code: it owns the [`TimedLock`], the
//! [`WindowLimiter`], ratelimit header parsing ([`headers`]), and the
//! [`Bucket`] state machine that the REST client drives from response
//! headers. Everything here is runtime-agnostic beyond depending on
//! `tokio::time` for timers.

#![deny(unsafe_code)]

pub mod bucket;
pub mod error;
pub mod headers;
pub mod timed_lock;
pub mod window_limiter;

pub use bucket::Bucket;
pub use timed_lock::TimedLock;
pub use window_limiter::WindowLimiter;
