//! Canonical representation of a REST endpoint.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters left unencoded by `urlparse.quote`'s safe defaults, mirrored
/// here so encoded path segments read the same as Discord's own examples.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

/// The major parameters that scope a ratelimit bucket independently of the
/// rest of the route.
const MAJOR_PARAMS: [&str; 4] = ["guild_id", "channel_id", "webhook_id", "webhook_token"];

/// HTTP method of a [`Route`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Method {
    /// DELETE.
    Delete,
    /// GET.
    Get,
    /// PATCH.
    Patch,
    /// POST.
    Post,
    /// PUT.
    Put,
}

impl Method {
    /// The string form of this method, as used by `hyper::Method`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// A REST endpoint: method, URL template, and bound parameters.
///
/// Parameters are percent-encoded once, at construction. [`Route::path`]
/// substitutes every placeholder; [`Route::bucket_key`] substitutes only the
/// major parameters and leaves the rest of the template untouched, which is
/// the textual key the ratelimiter uses before the server reveals a real
/// bucket hash.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    method: Method,
    template: &'static str,
    params: Vec<(&'static str, String)>,
}

impl Route {
    /// Create a new route from a method, a `{name}`-templated path, and an
    /// ordered list of parameter bindings.
    pub fn new(method: Method, template: &'static str, params: &[(&'static str, &str)]) -> Self {
        let params = params
            .iter()
            .map(|(name, value)| {
                let encoded = utf8_percent_encode(value, PATH_SEGMENT).to_string();
                (*name, encoded)
            })
            .collect();

        Self {
            method,
            template,
            params,
        }
    }

    /// The HTTP method for this route.
    pub const fn method(&self) -> Method {
        self.method
    }

    /// The URL template with every `{name}` placeholder filled.
    pub fn path(&self) -> String {
        let mut out = self.template.to_owned();

        for (name, value) in &self.params {
            let needle = format!("{{{name}}}");
            out = out.replace(&needle, value);
        }

        out
    }

    /// The client-side ratelimit bucket key: the template with only major
    /// parameters substituted, everything else left as a literal
    /// placeholder.
    pub fn bucket_key(&self) -> String {
        let mut out = self.template.to_owned();

        for (name, value) in &self.params {
            if !MAJOR_PARAMS.contains(name) {
                continue;
            }

            let needle = format!("{{{name}}}");
            out = out.replace(&needle, value);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::{Method, Route};
    use static_assertions::assert_impl_all;

    assert_impl_all!(Route: Clone, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn path_substitutes_every_placeholder() {
        let route = Route::new(
            Method::Get,
            "/channels/{channel_id}/messages/{message_id}",
            &[("channel_id", "1"), ("message_id", "2")],
        );
        assert_eq!("/channels/1/messages/2", route.path());
    }

    #[test]
    fn bucket_key_substitutes_only_major_parameters() {
        let route = Route::new(
            Method::Get,
            "/channels/{channel_id}/messages/{message_id}",
            &[("channel_id", "1"), ("message_id", "2")],
        );
        assert_eq!("/channels/1/messages/{message_id}", route.bucket_key());
    }

    #[test]
    fn bucket_key_is_shared_across_non_major_params() {
        let a = Route::new(
            Method::Get,
            "/channels/{channel_id}/messages/{message_id}",
            &[("channel_id", "1"), ("message_id", "2")],
        );
        let b = Route::new(
            Method::Get,
            "/channels/{channel_id}/messages/{message_id}",
            &[("channel_id", "1"), ("message_id", "999")],
        );
        assert_eq!(a.bucket_key(), b.bucket_key());
    }

    #[test]
    fn params_are_percent_encoded() {
        let route = Route::new(
            Method::Get,
            "/webhooks/{webhook_id}/{webhook_token}",
            &[("webhook_id", "1"), ("webhook_token", "a b/c")],
        );
        assert_eq!("/webhooks/1/a%20b%2Fc", route.path());
    }
}
