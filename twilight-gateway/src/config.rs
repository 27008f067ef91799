//! Customizable configuration for shards.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
    time::Duration,
};
use twilight_gateway_queue::{IdentifyQueue, Queue};
use twilight_model::{auth::Auth, intents::Intents};

/// Default additive slack applied to REST buckets and, by extension, the
/// identify-concurrency window limiter's bookkeeping.
const DEFAULT_BUCKET_LAG: f64 = 0.2;

/// Default timeout, in seconds, for an individual websocket read.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Identifier of a shard, pairing its index with the total shard count in
/// use by the bot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShardId {
    /// Current shard index, 0-indexed.
    current: u64,
    /// Total number of shards in use, 1-indexed.
    total: u64,
}

impl ShardId {
    /// ID of a bot that has only one shard.
    pub const ONE: ShardId = ShardId::new(0, 1);

    /// Create a new shard identifier.
    ///
    /// # Panics
    ///
    /// Panics if `current >= total`, or if `total == 0`.
    pub const fn new(current: u64, total: u64) -> Self {
        assert!(total > 0, "total must be greater than zero");
        assert!(
            current < total,
            "current shard (0-indexed) must be less than total (1-indexed)"
        );

        Self { current, total }
    }

    /// Create a new shard identifier if the indexes are valid.
    pub const fn new_checked(current: u64, total: u64) -> Option<Self> {
        if total > 0 && current < total {
            Some(Self { current, total })
        } else {
            None
        }
    }

    /// Index of this shard, 0-indexed.
    pub const fn current(self) -> u64 {
        self.current
    }

    /// Total number of shards in use, 1-indexed.
    pub const fn total(self) -> u64 {
        self.total
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "shard {}/{}", self.current, self.total)
    }
}

/// A previously established gateway session that a shard can resume instead
/// of identifying fresh.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    /// ID of the session, assigned by the gateway on `READY`.
    session_id: Box<str>,
    /// URL the gateway asked to be used for resuming this session.
    resume_url: Box<str>,
    /// Last sequence number observed before the disconnect.
    sequence: u64,
}

impl Session {
    /// Create session resume information.
    pub fn new(session_id: impl Into<Box<str>>, resume_url: impl Into<Box<str>>, sequence: u64) -> Self {
        Self {
            session_id: session_id.into(),
            resume_url: resume_url.into(),
            sequence,
        }
    }

    /// ID of the session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// URL the gateway asked to be used for resuming this session.
    pub fn resume_url(&self) -> &str {
        &self.resume_url
    }

    /// Last sequence number observed before the disconnect.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Configuration used by a shard to identify with and operate against the
/// gateway.
///
/// Use [`Config::builder`] to start configuring a shard.
#[derive(Clone, Debug)]
pub struct Config {
    auth: Auth,
    bucket_lag: f64,
    gateway_url: Option<Box<str>>,
    intents: Intents,
    queue: Arc<dyn Queue>,
    session: Option<Session>,
    should_reconnect: bool,
    timeout: Duration,
}

impl Config {
    /// Create a new default configuration for a shard.
    pub fn new(auth: Auth, intents: Intents) -> Self {
        Self::builder(auth, intents).build()
    }

    /// Create a builder to customize the configuration for a shard.
    pub fn builder(auth: Auth, intents: Intents) -> ConfigBuilder {
        ConfigBuilder::new(auth, intents)
    }

    /// Authorization used to identify with the gateway.
    pub const fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Additive slack applied to rate-limit bookkeeping.
    pub const fn bucket_lag(&self) -> f64 {
        self.bucket_lag
    }

    /// URL used to connect to the gateway, overriding the default.
    pub fn gateway_url(&self) -> Option<&str> {
        self.gateway_url.as_deref()
    }

    /// Intents requested when identifying with the gateway.
    pub const fn intents(&self) -> Intents {
        self.intents
    }

    /// Identify-concurrency queue in use by the shard.
    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    /// Session to resume when the shard connects, if any.
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Whether the shard should attempt to reconnect on recoverable
    /// failures.
    pub const fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    /// Timeout applied to individual websocket reads.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder to customize a shard's [`Config`].
#[derive(Debug)]
#[must_use = "builder must be completed to be used"]
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    /// Create a new builder, with default values, for the given
    /// authorization and intents.
    pub fn new(auth: Auth, intents: Intents) -> Self {
        Self {
            inner: Config {
                auth,
                bucket_lag: DEFAULT_BUCKET_LAG,
                gateway_url: None,
                intents,
                queue: Arc::new(IdentifyQueue::new(1)),
                session: None,
                should_reconnect: true,
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            },
        }
    }

    /// Consume the builder, returning the finished configuration.
    pub fn build(self) -> Config {
        self.inner
    }

    /// Set the additive slack applied to rate-limit bookkeeping.
    pub const fn bucket_lag(mut self, bucket_lag: f64) -> Self {
        self.inner.bucket_lag = bucket_lag;

        self
    }

    /// Override the URL used to connect to the gateway.
    pub fn gateway_url(mut self, gateway_url: Option<String>) -> Self {
        self.inner.gateway_url = gateway_url.map(String::into_boxed_str);

        self
    }

    /// Set the identify-concurrency queue to use.
    ///
    /// Shards created directly via [`Shard::with_config`] don't need to set
    /// this themselves; [`ShardManager`] assigns one derived from
    /// `session_start_limit.max_concurrency` automatically.
    ///
    /// [`Shard::with_config`]: crate::Shard::with_config
    /// [`ShardManager`]: crate::ShardManager
    pub fn queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.inner.queue = queue;

        self
    }

    /// Set the session to resume when the shard connects.
    pub fn session(mut self, session: Session) -> Self {
        self.inner.session = Some(session);

        self
    }

    /// Set whether the shard should attempt to reconnect on recoverable
    /// failures. Defaults to `true`.
    pub const fn should_reconnect(mut self, should_reconnect: bool) -> Self {
        self.inner.should_reconnect = should_reconnect;

        self
    }

    /// Set the timeout applied to individual websocket reads. Defaults to 30
    /// seconds.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = timeout;

        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Session, ShardId};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;
    use twilight_model::{auth::Auth, intents::Intents};

    assert_impl_all!(Config: Clone, Debug, Send, Sync);
    assert_impl_all!(ShardId: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Session: Clone, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn shard_id_accessors() {
        let id = ShardId::new(2, 4);
        assert_eq!(2, id.current());
        assert_eq!(4, id.total());
        assert_eq!("shard 2/4", id.to_string());
    }

    #[test]
    #[should_panic(expected = "less than total")]
    fn shard_id_current_equal_total_panics() {
        ShardId::new(4, 4);
    }

    #[test]
    fn shard_id_new_checked() {
        assert!(ShardId::new_checked(0, 1).is_some());
        assert!(ShardId::new_checked(1, 1).is_none());
        assert!(ShardId::new_checked(0, 0).is_none());
    }

    #[test]
    fn builder_defaults() {
        let config = Config::new(Auth::bot("token".to_owned()), Intents::empty());
        assert_eq!(0.2, config.bucket_lag());
        assert!(config.should_reconnect());
        assert!(config.session().is_none());
        assert!(config.gateway_url().is_none());
    }

    #[test]
    fn builder_overrides() {
        let session = Session::new("abc", "wss://resume.example", 5);
        let config = Config::builder(Auth::bot("token".to_owned()), Intents::empty())
            .bucket_lag(0.5)
            .should_reconnect(false)
            .session(session.clone())
            .build();

        assert_eq!(0.5, config.bucket_lag());
        assert!(!config.should_reconnect());
        assert_eq!(Some(&session), config.session());
    }
}
