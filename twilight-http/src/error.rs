//! Error types returned by the REST client.

use crate::api_error::ApiError;
use hyper::StatusCode;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};
use twilight_model::json::JsonError;

/// Result alias defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = StdResult<T, E>;

/// An error that occurred while dispatching a REST request.
#[derive(Debug)]
pub struct Error {
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) kind: ErrorType,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning its source.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning its kind and source.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn new(kind: ErrorType) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source(kind: ErrorType, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }
}

fn fmt_api_error(f: &mut Formatter<'_>, status: StatusCode, error: &ApiError) -> FmtResult {
    write!(f, "status code {status}")?;

    if !error.message.is_empty() {
        write!(f, ": {}", error.message)?;
    }

    if error.code != 0 {
        write!(f, " (discord code: {})", error.code)?;
    }

    for (path, message) in error.flatten_errors() {
        write!(f, "\nin {path}: {message}")?;
    }

    Ok(())
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::BuildingRequest => f.write_str("failed to build the request"),
            ErrorType::GetWithBody => f.write_str("a GET request cannot carry a body"),
            ErrorType::AuthorizationInHeaders => f.write_str(
                "`Authorization` was set in per-call headers; use the `auth` parameter instead",
            ),
            ErrorType::Json => f.write_str("the request or response body could not be (de)serialized"),
            ErrorType::RequestError => f.write_str("sending the request failed"),
            ErrorType::Unauthorized { status, error, .. } => {
                f.write_str("unauthorized: ")?;
                fmt_api_error(f, *status, error)
            }
            ErrorType::Forbidden { status, error, .. } => {
                f.write_str("forbidden: ")?;
                fmt_api_error(f, *status, error)
            }
            ErrorType::NotFound { status, error, .. } => {
                f.write_str("not found: ")?;
                fmt_api_error(f, *status, error)
            }
            ErrorType::Response { status, error, .. } => {
                f.write_str("response error: ")?;
                fmt_api_error(f, *status, error)
            }
            ErrorType::ServerError { status } => {
                write!(f, "server error (status code {status}) after exhausting retries")
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

/// The type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// Failed to build the outgoing HTTP request.
    BuildingRequest,
    /// Caller passed a body alongside a `GET` request.
    GetWithBody,
    /// Caller set `Authorization` in per-call headers instead of using `auth`.
    AuthorizationInHeaders,
    /// A JSON payload failed to encode or decode.
    Json,
    /// The request could not be sent, or the response could not be read.
    RequestError,
    /// The configured token is invalid, expired, or revoked (`401`).
    Unauthorized {
        /// Raw response body bytes.
        body: Vec<u8>,
        /// Decoded API error.
        error: ApiError,
        /// HTTP status code, always `401`.
        status: StatusCode,
    },
    /// The bot lacks permission to perform the request (`403`).
    Forbidden {
        /// Raw response body bytes.
        body: Vec<u8>,
        /// Decoded API error.
        error: ApiError,
        /// HTTP status code, always `403`.
        status: StatusCode,
    },
    /// The requested resource does not exist (`404`).
    NotFound {
        /// Raw response body bytes.
        body: Vec<u8>,
        /// Decoded API error.
        error: ApiError,
        /// HTTP status code, always `404`.
        status: StatusCode,
    },
    /// A generic non-2xx response, with Discord's decoded error body.
    Response {
        /// Raw response body bytes, kept for callers that want to inspect
        /// fields this crate doesn't model.
        body: Vec<u8>,
        /// Decoded API error.
        error: ApiError,
        /// HTTP status code of the response.
        status: StatusCode,
    },
    /// Server error surfaced after exhausting all retries.
    ServerError {
        /// HTTP status code of the response.
        status: StatusCode,
    },
}

impl From<JsonError> for Error {
    fn from(source: JsonError) -> Self {
        Self::with_source(ErrorType::Json, source)
    }
}
