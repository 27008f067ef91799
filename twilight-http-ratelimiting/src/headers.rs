//! Parse typed ratelimit headers from a response.

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::{self, Utf8Error},
};

/// A ratelimit header failed to parse.
#[derive(Debug)]
pub struct HeaderParsingError {
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
    pub(crate) kind: HeaderParsingErrorType,
}

impl HeaderParsingError {
    /// Immutable reference to the type of error that occurred.
    pub const fn kind(&self) -> &HeaderParsingErrorType {
        &self.kind
    }

    pub(crate) fn not_utf8(name: HeaderName, value: Vec<u8>, source: Utf8Error) -> Self {
        Self {
            kind: HeaderParsingErrorType::NotUtf8 { name, value },
            source: Some(Box::new(source)),
        }
    }
}

impl Display for HeaderParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            HeaderParsingErrorType::NotUtf8 { name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' contains invalid UTF-8: ")?;
                Debug::fmt(value, f)
            }
            HeaderParsingErrorType::Parsing { kind, name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' can not be parsed as a ")?;
                f.write_str(kind.name())?;
                f.write_str(": '")?;
                f.write_str(value)?;
                f.write_str("'")
            }
        }
    }
}

impl Error for HeaderParsingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`HeaderParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum HeaderParsingErrorType {
    /// Header value is not UTF-8 valid.
    NotUtf8 {
        /// Name of the header.
        name: HeaderName,
        /// Raw value of the header.
        value: Vec<u8>,
    },
    /// Header value is not of the expected type.
    Parsing {
        /// Type of header value expected.
        kind: HeaderType,
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: String,
    },
}

/// Typed name of a ratelimit header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderName {
    /// Hashed identity of the ratelimit bucket.
    Bucket,
    /// Whether the ratelimit applies to every bucket.
    Global,
    /// Maximum requests allotted in the bucket.
    Limit,
    /// Remaining requests allotted in the bucket.
    Remaining,
    /// How long until the bucket resets, in seconds.
    ResetAfter,
    /// When the bucket resets, as a Unix timestamp in seconds.
    Reset,
    /// How long until a 429'd request can be retried, in seconds.
    RetryAfter,
}

impl HeaderName {
    /// Lowercased name for the bucket header.
    pub const BUCKET: &'static str = "x-ratelimit-bucket";
    /// Lowercased name for the global header.
    pub const GLOBAL: &'static str = "x-ratelimit-global";
    /// Lowercased name for the limit header.
    pub const LIMIT: &'static str = "x-ratelimit-limit";
    /// Lowercased name for the remaining header.
    pub const REMAINING: &'static str = "x-ratelimit-remaining";
    /// Lowercased name for the reset-after header.
    pub const RESET_AFTER: &'static str = "x-ratelimit-reset-after";
    /// Lowercased name for the reset header.
    pub const RESET: &'static str = "x-ratelimit-reset";
    // Correct for this to lack the `x-ratelimit-` prefix; Discord does not
    // namespace it like the others.
    /// Lowercased name for the retry-after header.
    pub const RETRY_AFTER: &'static str = "retry-after";

    /// Lowercased name of the header.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bucket => Self::BUCKET,
            Self::Global => Self::GLOBAL,
            Self::Limit => Self::LIMIT,
            Self::Remaining => Self::REMAINING,
            Self::ResetAfter => Self::RESET_AFTER,
            Self::Reset => Self::RESET,
            Self::RetryAfter => Self::RETRY_AFTER,
        }
    }
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Expected type of a header value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderType {
    /// Value is a float.
    Float,
    /// Value is an integer.
    Integer,
}

impl HeaderType {
    const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
        }
    }
}

impl Display for HeaderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Ratelimit bucket fields present on a response, when any were present.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Present {
    /// Hashed bucket ID.
    pub bucket: Option<Box<str>>,
    /// Total number of tickets allotted to the bucket.
    pub limit: u64,
    /// Remaining number of tickets.
    pub remaining: u64,
    /// Seconds until the bucket resets.
    pub reset_after: f64,
    /// When the bucket resets, as a Unix timestamp in seconds.
    pub reset: f64,
}

/// Parsed ratelimit headers.
///
/// A response may indicate a global ratelimit, a bucketed ratelimit, or no
/// ratelimit at all.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum RatelimitHeaders {
    /// The caller is globally ratelimited; retry after this many seconds.
    GlobalLimited {
        /// Seconds to wait before retrying.
        retry_after: f64,
    },
    /// No ratelimit headers were present at all.
    None,
    /// Bucket ratelimit information is present.
    Present(Present),
}

impl RatelimitHeaders {
    /// Parse headers from an iterator of lowercased name/value pairs.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderParsingError`] if a recognized header's value
    /// cannot be parsed as its expected type.
    pub fn from_pairs<'a>(
        headers: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self, HeaderParsingError> {
        let mut bucket = None;
        let mut global = false;
        let mut limit = None;
        let mut remaining = None;
        let mut reset = None;
        let mut reset_after = None;
        let mut retry_after = None;

        for (name, value) in headers {
            match name {
                HeaderName::BUCKET => {
                    bucket = Some(header_str(HeaderName::Bucket, value)?.to_owned());
                }
                HeaderName::GLOBAL => {
                    global = header_bool(value);

                    if global {
                        if let Some(retry_after) = retry_after {
                            return Ok(Self::GlobalLimited { retry_after });
                        }
                    }
                }
                HeaderName::LIMIT => {
                    limit = Some(header_int(HeaderName::Limit, value)?);
                }
                HeaderName::REMAINING => {
                    remaining = Some(header_int(HeaderName::Remaining, value)?);
                }
                HeaderName::RESET => {
                    reset = Some(header_float(HeaderName::Reset, value)?);
                }
                HeaderName::RESET_AFTER => {
                    reset_after = Some(header_float(HeaderName::ResetAfter, value)?);
                }
                HeaderName::RETRY_AFTER => {
                    let value = header_float(HeaderName::RetryAfter, value)?;

                    if global {
                        return Ok(Self::GlobalLimited { retry_after: value });
                    }

                    retry_after = Some(value);
                }
                _ => continue,
            }
        }

        if bucket.is_none()
            && limit.is_none()
            && remaining.is_none()
            && reset.is_none()
            && reset_after.is_none()
        {
            return Ok(Self::None);
        }

        Ok(Self::Present(Present {
            bucket: bucket.map(Into::into),
            limit: limit.unwrap_or(1),
            remaining: remaining.unwrap_or(1),
            reset_after: reset_after.unwrap_or(0.0),
            reset: reset.unwrap_or(0.0),
        }))
    }
}

fn header_bool(value: &[u8]) -> bool {
    value == b"true"
}

fn header_float(name: HeaderName, value: &[u8]) -> Result<f64, HeaderParsingError> {
    let text = str::from_utf8(value)
        .map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Float,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_int(name: HeaderName, value: &[u8]) -> Result<u64, HeaderParsingError> {
    let text = str::from_utf8(value)
        .map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Integer,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_str(name: HeaderName, value: &[u8]) -> Result<&str, HeaderParsingError> {
    str::from_utf8(value).map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))
}

#[cfg(test)]
mod tests {
    use super::{HeaderName, HeaderParsingError, HeaderType, Present, RatelimitHeaders};
    use static_assertions::assert_impl_all;
    use std::{error::Error, fmt::Debug};

    assert_impl_all!(HeaderName: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(HeaderParsingError: Error, Send, Sync);
    assert_impl_all!(HeaderType: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Present: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(RatelimitHeaders: Clone, Debug, PartialEq, Send, Sync);

    #[test]
    fn global_short_circuits_regardless_of_order() {
        let pairs = [
            ("x-ratelimit-global", "true".as_bytes()),
            ("retry-after", "65".as_bytes()),
        ];
        let headers = RatelimitHeaders::from_pairs(pairs.into_iter()).unwrap();
        assert_eq!(headers, RatelimitHeaders::GlobalLimited { retry_after: 65.0 });

        let pairs = [
            ("retry-after", "65".as_bytes()),
            ("x-ratelimit-global", "true".as_bytes()),
        ];
        let headers = RatelimitHeaders::from_pairs(pairs.into_iter()).unwrap();
        assert_eq!(headers, RatelimitHeaders::GlobalLimited { retry_after: 65.0 });
    }

    #[test]
    fn present_bucket() {
        let pairs = [
            ("x-ratelimit-bucket", "abcd".as_bytes()),
            ("x-ratelimit-limit", "5".as_bytes()),
            ("x-ratelimit-remaining", "4".as_bytes()),
            ("x-ratelimit-reset", "1573795260.333".as_bytes()),
            ("x-ratelimit-reset-after", "10.000".as_bytes()),
        ];
        let headers = RatelimitHeaders::from_pairs(pairs.into_iter()).unwrap();
        match headers {
            RatelimitHeaders::Present(p) => {
                assert_eq!(Some("abcd".into()), p.bucket);
                assert_eq!(5, p.limit);
                assert_eq!(4, p.remaining);
            }
            other => panic!("expected Present, got {other:?}"),
        }
    }

    #[test]
    fn no_ratelimit_headers_is_none() {
        let headers = RatelimitHeaders::from_pairs(std::iter::empty()).unwrap();
        assert_eq!(RatelimitHeaders::None, headers);
    }

    #[test]
    fn names() {
        assert_eq!("x-ratelimit-bucket", HeaderName::BUCKET);
        assert_eq!("retry-after", HeaderName::RETRY_AFTER);
    }
}
