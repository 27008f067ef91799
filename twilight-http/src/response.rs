//! The successful outcome of a REST request.

use crate::error::{Error, ErrorType};
use serde::de::DeserializeOwned;

/// Body of a successful REST response, after status-code interpretation.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Response {
    /// `204 No Content`, or any other 2xx response with an empty body.
    Empty,
    /// A `2xx` response whose `Content-Type` was `application/json`.
    Json(Vec<u8>),
    /// A `2xx` response with a non-JSON content type, returned verbatim.
    Text(String),
}

impl Response {
    /// Deserialize the JSON body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorType::Json`] if this isn't a [`Response::Json`] or if
    /// the body doesn't deserialize into `T`.
    pub fn model<T: DeserializeOwned>(&self) -> Result<T, Error> {
        match self {
            Self::Json(bytes) => twilight_model::json::from_slice(bytes).map_err(Error::from),
            _ => Err(Error::new(ErrorType::Json)),
        }
    }

    /// The raw text body, if this was a [`Response::Text`].
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}
