//! Function wrappers for encoding and decoding JSON.
//!
//! Which concrete codec backs these functions is selected once at compile
//! time via the `simd-json` feature, not re-checked on every call.

#[cfg(not(feature = "simd-json"))]
pub use serde_json::to_vec;
#[cfg(feature = "simd-json")]
pub use simd_json::to_vec;

use serde::de::DeserializeOwned;
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Decoding a JSON payload into a typed value failed.
#[derive(Debug)]
pub struct JsonError {
    source: Box<dyn Error + Send + Sync>,
}

impl Display for JsonError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("deserializing json payload failed")
    }
}

impl Error for JsonError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.source)
    }
}

/// Decode a byte slice as a typed JSON value.
///
/// # Errors
///
/// Returns a [`JsonError`] if the payload is not valid JSON or does not
/// match the shape of `T`.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, JsonError> {
    #[cfg(not(feature = "simd-json"))]
    {
        serde_json::from_slice(bytes).map_err(|source| JsonError {
            source: Box::new(source),
        })
    }

    #[cfg(feature = "simd-json")]
    {
        // simd-json requires mutable access to the buffer to parse in place.
        let mut owned = bytes.to_vec();
        simd_json::from_slice(&mut owned).map_err(|source| JsonError {
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{from_slice, to_vec, JsonError};
    use serde::Deserialize;
    use static_assertions::assert_impl_all;
    use std::error::Error;

    assert_impl_all!(JsonError: Error, Send, Sync);

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        a: u8,
        b: String,
    }

    #[test]
    fn round_trip() {
        let value = serde_json::json!({"a": 1, "b": "two"});
        let bytes = to_vec(&value).unwrap();
        let decoded: Sample = from_slice(&bytes).unwrap();
        assert_eq!(
            Sample {
                a: 1,
                b: "two".to_owned()
            },
            decoded
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(from_slice::<Sample>(b"not json").is_err());
    }
}
