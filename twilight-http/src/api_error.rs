//! Discord's JSON error body, returned alongside non-2xx REST responses.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Decoded `{code, message, errors}` body Discord attaches to error
/// responses.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ApiError {
    /// Discord's numeric error code, `0` if the body didn't carry one.
    #[serde(default)]
    pub code: u64,
    /// Top-level human-readable message.
    #[serde(default)]
    pub message: String,
    /// Nested per-field validation errors, if any were present.
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl ApiError {
    /// Flatten the nested `errors` object into `path -> message` pairs.
    ///
    /// Only objects are descended into; a `_errors` array is recorded under
    /// its *parent* path, with its constituent messages joined by `\n`. This
    /// is the stricter of the two behaviors Discord's API has shown across
    /// revisions (see the resolved Open Question in the design notes).
    pub fn flatten_errors(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();

        if let Some(errors) = &self.errors {
            flatten_into(errors, "", &mut out);
        }

        out
    }
}

fn flatten_into(value: &serde_json::Value, parent: &str, out: &mut BTreeMap<String, String>) {
    let object = match value.as_object() {
        Some(object) => object,
        None => return,
    };

    for (key, nested) in object {
        let full_key = if parent.is_empty() {
            key.clone()
        } else {
            format!("{parent}/{key}")
        };

        if key == "_errors" {
            if let Some(list) = nested.as_array() {
                let joined = list
                    .iter()
                    .filter_map(|entry| entry.get("message")?.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");

                if !joined.is_empty() {
                    out.insert(parent.to_owned(), joined);
                }
            }
        } else if nested.is_object() {
            flatten_into(nested, &full_key, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ApiError;
    use static_assertions::assert_impl_all;

    assert_impl_all!(ApiError: Clone, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn flattens_nested_errors_under_parent_path() {
        let error: ApiError = serde_json::from_value(serde_json::json!({
            "code": 50035,
            "message": "Invalid Form Body",
            "errors": {
                "foo": {
                    "_errors": [{"code": "X", "message": "x"}],
                },
            },
        }))
        .unwrap();

        let flattened = error.flatten_errors();
        assert_eq!(Some(&"x".to_owned()), flattened.get("foo"));
    }

    #[test]
    fn joins_multiple_messages_in_one_errors_array() {
        let error: ApiError = serde_json::from_value(serde_json::json!({
            "errors": {
                "username": {
                    "_errors": [
                        {"code": "TOO_SHORT", "message": "too short"},
                        {"code": "TOO_LONG", "message": "too long"},
                    ],
                },
            },
        }))
        .unwrap();

        let flattened = error.flatten_errors();
        assert_eq!(Some(&"too short\ntoo long".to_owned()), flattened.get("username"));
    }

    #[test]
    fn descends_multiple_levels() {
        let error: ApiError = serde_json::from_value(serde_json::json!({
            "errors": {
                "embeds": {
                    "0": {
                        "fields": {
                            "_errors": [{"code": "X", "message": "bad fields"}],
                        },
                    },
                },
            },
        }))
        .unwrap();

        let flattened = error.flatten_errors();
        assert_eq!(
            Some(&"bad fields".to_owned()),
            flattened.get("embeds/0/fields")
        );
    }

    #[test]
    fn no_errors_is_empty() {
        let error = ApiError::default();
        assert!(error.flatten_errors().is_empty());
    }
}
