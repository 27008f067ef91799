//! Crate-level error re-exports.
//!
//! The only fallible operation in this crate is parsing ratelimit headers;
//! [`TimedLock`](crate::TimedLock), [`WindowLimiter`](crate::WindowLimiter),
//! and [`Bucket`](crate::Bucket) are infallible by construction.

pub use crate::headers::{HeaderParsingError, HeaderParsingErrorType};
