//! The REST client: request dispatch, ratelimit gating, and retries.

use crate::{
    api_error::ApiError,
    error::{Error, ErrorType, Result},
    response::Response,
    routing::{Method, Route},
};
use hyper::{
    body,
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT},
    Body, Client as HyperClient, Request as HyperRequest, StatusCode,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use twilight_http_ratelimiting::{
    bucket::DEFAULT_LAG, headers::RatelimitHeaders, Bucket, TimedLock,
};
use twilight_model::auth::Auth;

#[cfg(feature = "rustls-native-roots")]
type HttpsConnector = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;
#[cfg(all(feature = "native", not(feature = "rustls-native-roots")))]
type HttpsConnector = hyper_tls::HttpsConnector<hyper::client::HttpConnector>;

/// Base URL for Discord's REST API.
pub const BASE_URL: &str = "https://discord.com/api/v10";
/// Default gateway URL, used when not resuming an existing session.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg";
/// Discord API version this client speaks.
pub const API_VERSION: u8 = 10;

const MAX_RETRIES: u8 = 5;

/// Per-call overrides of the client's defaults.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions<'a> {
    /// JSON body to send. Rejected if `route.method()` is `GET`.
    pub body: Option<&'a [u8]>,
    /// Additional headers, merged over the client's defaults. Must not
    /// contain `Authorization`; use `auth` instead.
    pub headers: Option<HeaderMap>,
    /// Per-call authentication, overriding the client's default.
    pub auth: Option<&'a Auth>,
}

fn composite_key(hash: Option<&str>, local: &str) -> String {
    match hash {
        Some(hash) => format!("{hash}:{local}"),
        None => local.to_owned(),
    }
}

struct State {
    http: HyperClient<HttpsConnector, Body>,
    default_headers: HeaderMap,
    bucket_lag: f64,
    timeout: Duration,
    local_to_hash: Mutex<HashMap<String, Box<str>>>,
    buckets: Mutex<HashMap<String, Bucket>>,
    global_lock: TimedLock,
}

/// Discord REST client.
///
/// Internally reference-counted: cloning is cheap and shares the same
/// connection pool, ratelimit bucket registry, and global lock.
#[derive(Clone)]
pub struct Client {
    state: Arc<State>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with a bot token and otherwise-default settings.
    pub fn new(token: impl Into<String>) -> Self {
        ClientBuilder::new(Auth::bot(token)).build()
    }

    /// Start building a client with non-default settings.
    pub fn builder(auth: Auth) -> ClientBuilder {
        ClientBuilder::new(auth)
    }

    /// The absolute URL to open the gateway WebSocket at.
    ///
    /// If `resume_url` is given (an absolute URL captured from a prior
    /// READY's `resume_gateway_url`), it is used as-is. Otherwise `base` (or
    /// [`GATEWAY_URL`] if `base` is `None`) is returned with the query
    /// parameters this client's codec and compression scheme require.
    pub fn gateway_url(resume_url: Option<&str>, base: Option<&str>) -> String {
        match resume_url {
            Some(url) => url.to_owned(),
            None => {
                let base = base.unwrap_or(GATEWAY_URL);
                format!("{base}/?v={API_VERSION}&encoding=json&compress=zlib-stream")
            }
        }
    }

    fn bucket(&self, composite_key: &str) -> Bucket {
        let mut buckets = self.state.buckets.lock().unwrap();
        buckets
            .entry(composite_key.to_owned())
            .or_insert_with(|| Bucket::new(self.state.bucket_lag))
            .clone()
    }

    /// Dispatch a request, gating on ratelimit buckets and retrying
    /// transient failures.
    ///
    /// Returns `Ok(None)` once [`MAX_RETRIES`](self) attempts have all
    /// failed to reach a conclusive status, matching the reference
    /// behavior of silently giving up rather than propagating a final
    /// error for that case.
    pub async fn request(&self, route: Route, options: RequestOptions<'_>) -> Result<Option<Response>> {
        if route.method() == Method::Get && options.body.is_some() {
            return Err(Error::new(ErrorType::GetWithBody));
        }

        if let Some(headers) = &options.headers {
            if headers.contains_key(AUTHORIZATION) {
                return Err(Error::new(ErrorType::AuthorizationInHeaders));
            }
        }

        let mut headers = self.state.default_headers.clone();
        if let Some(overrides) = &options.headers {
            for (name, value) in overrides {
                headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(auth) = options.auth {
            let value = HeaderValue::from_str(&auth.header())
                .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?;
            headers.insert(AUTHORIZATION, value);
        }

        let local = route.bucket_key();

        for attempt in 0..MAX_RETRIES {
            let hash = self.state.local_to_hash.lock().unwrap().get(&local).cloned();
            let key = composite_key(hash.as_deref(), &local);
            let mut bucket = self.bucket(&key);

            self.state.global_lock.wait().await;
            bucket.acquire(true).await;

            let url = format!("{BASE_URL}{}", route.path());
            let mut builder = HyperRequest::builder().method(route.method().name()).uri(&url);

            if let Some(map) = builder.headers_mut() {
                *map = headers.clone();
            }

            let body = match options.body {
                Some(bytes) => {
                    if let Some(map) = builder.headers_mut() {
                        map.insert(CONTENT_LENGTH, bytes.len().into());
                        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    }
                    Body::from(bytes.to_owned())
                }
                None => Body::empty(),
            };

            let request = builder
                .body(body)
                .map_err(|source| Error::with_source(ErrorType::BuildingRequest, source))?;

            let response = tokio::time::timeout(self.state.timeout, self.state.http.request(request))
                .await
                .map_err(|source| Error::with_source(ErrorType::RequestError, source))?
                .map_err(|source| Error::with_source(ErrorType::RequestError, source))?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned();

            let pairs: Vec<(String, Vec<u8>)> = response
                .headers()
                .iter()
                .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_owned()))
                .collect();
            let ratelimit_headers =
                RatelimitHeaders::from_pairs(pairs.iter().map(|(name, value)| (name.as_str(), value.as_slice())))
                    .unwrap_or(RatelimitHeaders::None);

            bucket.update_from(&ratelimit_headers);

            if bucket.is_enabled() {
                let new_hash = bucket.hash();
                if new_hash.as_deref() != hash.as_deref() {
                    let new_key = composite_key(new_hash.as_deref(), &local);

                    if new_hash.is_some() {
                        self.state
                            .local_to_hash
                            .lock()
                            .unwrap()
                            .insert(local.clone(), new_hash.clone().unwrap());
                    }

                    if new_key != key {
                        let mut buckets = self.state.buckets.lock().unwrap();
                        if let Some(existing) = buckets.get(&new_key).cloned() {
                            bucket = existing;
                        } else {
                            buckets.insert(new_key, bucket.clone());
                        }
                        buckets.remove(&key);
                    }
                }

                bucket.acquire(true).await;
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(Some(Response::Empty));
            }

            if status.is_success() {
                let bytes = body::to_bytes(response.into_body())
                    .await
                    .map_err(|source| Error::with_source(ErrorType::RequestError, source))?;

                if content_type == "application/json" {
                    return Ok(Some(Response::Json(bytes.to_vec())));
                }

                let text = String::from_utf8_lossy(&bytes).into_owned();
                return Ok(Some(Response::Text(text)));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                match ratelimit_headers {
                    RatelimitHeaders::GlobalLimited { retry_after } => {
                        self.state.global_lock.lock_for(Duration::from_secs_f64(retry_after));
                        self.state.global_lock.wait().await;
                    }
                    _ => {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|value| value.to_str().ok())
                            .and_then(|value| value.parse::<f64>().ok())
                            .unwrap_or(1.0);

                        bucket.lock_for(Duration::from_secs_f64(retry_after));
                        bucket.acquire(false).await;
                    }
                }

                continue;
            }

            if status.is_client_error() {
                let bytes = body::to_bytes(response.into_body())
                    .await
                    .map_err(|source| Error::with_source(ErrorType::RequestError, source))?
                    .to_vec();
                let error: ApiError = twilight_model::json::from_slice(&bytes).unwrap_or_default();

                return Err(match status {
                    StatusCode::UNAUTHORIZED => Error::new(ErrorType::Unauthorized { body: bytes, error, status }),
                    StatusCode::FORBIDDEN => Error::new(ErrorType::Forbidden { body: bytes, error, status }),
                    StatusCode::NOT_FOUND => Error::new(ErrorType::NotFound { body: bytes, error, status }),
                    _ => Error::new(ErrorType::Response { body: bytes, error, status }),
                });
            }

            if status.is_server_error() {
                if status == StatusCode::INTERNAL_SERVER_ERROR || status == StatusCode::BAD_GATEWAY {
                    tokio::time::sleep(Duration::from_secs(2 * u64::from(attempt) + 1)).await;
                    continue;
                }

                return Err(Error::new(ErrorType::ServerError { status }));
            }
        }

        tracing::error!(%local, "exhausted retries for request");
        Ok(None)
    }
}

/// Builder for a [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    auth: Auth,
    bucket_lag: f64,
    timeout: Duration,
    default_headers: Option<HeaderMap>,
}

impl ClientBuilder {
    /// Create a new builder with a credential and otherwise-default settings.
    pub fn new(auth: Auth) -> Self {
        Self {
            auth,
            bucket_lag: DEFAULT_LAG,
            timeout: Duration::from_secs(30),
            default_headers: None,
        }
    }

    /// Additive slack applied to every bucket's `reset_after`, in seconds.
    pub const fn bucket_lag(mut self, bucket_lag: f64) -> Self {
        self.bucket_lag = bucket_lag;
        self
    }

    /// Timeout for an individual HTTP request.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Headers merged into every request, overridden by per-call headers.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// Build the [`Client`].
    pub fn build(self) -> Client {
        #[cfg(feature = "rustls-native-roots")]
        let connector = hyper_rustls::HttpsConnector::with_native_roots();
        #[cfg(all(feature = "native", not(feature = "rustls-native-roots")))]
        let connector = hyper_tls::HttpsConnector::new();

        let http = HyperClient::builder().build(connector);

        let mut default_headers = self.default_headers.unwrap_or_default();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!(
                "DiscordBot ({}, {})",
                env!("CARGO_PKG_HOMEPAGE"),
                env!("CARGO_PKG_VERSION")
            ))
            .expect("static user agent format is always a valid header value"),
        );
        default_headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&self.auth.header())
                .expect("auth header is ASCII by construction"),
        );

        Client {
            state: Arc::new(State {
                http,
                default_headers,
                bucket_lag: self.bucket_lag,
                timeout: self.timeout,
                local_to_hash: Mutex::new(HashMap::new()),
                buckets: Mutex::new(HashMap::new()),
                global_lock: TimedLock::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{composite_key, Client, ClientBuilder};
    use static_assertions::assert_impl_all;
    use twilight_model::auth::Auth;

    assert_impl_all!(Client: Clone, Send, Sync);
    assert_impl_all!(ClientBuilder: Send, Sync);

    #[test]
    fn composite_key_uses_hash_when_known() {
        assert_eq!("abcd:/foo", composite_key(Some("abcd"), "/foo"));
        assert_eq!("/foo", composite_key(None, "/foo"));
    }

    #[test]
    fn gateway_url_defaults_to_canonical() {
        let url = Client::gateway_url(None, None);
        assert!(url.starts_with("wss://gateway.discord.gg"));
        assert!(url.contains("compress=zlib-stream"));
    }

    #[test]
    fn gateway_url_uses_configured_base() {
        let url = Client::gateway_url(None, Some("wss://custom.example"));
        assert!(url.starts_with("wss://custom.example/?"));
        assert!(url.contains("compress=zlib-stream"));
    }

    #[test]
    fn gateway_url_uses_resume_url_verbatim() {
        let url = Client::gateway_url(Some("wss://resume.example/"), Some("wss://custom.example"));
        assert_eq!("wss://resume.example/", url);
    }

    #[test]
    fn builder_smoke() {
        let client = ClientBuilder::new(Auth::bot("token")).build();
        drop(client);
    }
}
