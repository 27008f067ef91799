//! The multi-shard orchestrator: bootstraps shards under the server's
//! identify concurrency window and supports zero-downtime rescale.

use crate::{
    config::{Config, ShardId},
    dispatcher::EventDispatcher,
    error::{Error, ErrorType, Result},
    event::{GatewayEvent, NamedEvent, NamedEventKey, OpCode},
    shard::Shard,
};
use serde::Deserialize;
use std::{
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};
use twilight_gateway_queue::{IdentifyQueue, Queue};
use twilight_http::{
    client::RequestOptions,
    routing::{Method, Route},
    Client,
};
use twilight_model::{auth::Auth, intents::Intents};

#[derive(Deserialize)]
struct GatewayBotInfo {
    shards: u64,
    session_start_limit: SessionStartLimit,
}

#[derive(Deserialize)]
struct SessionStartLimit {
    max_concurrency: u64,
    remaining: u64,
    total: u64,
}

struct State {
    auth: Auth,
    http: Client,
    intents: Intents,
    requested_shards: Option<Vec<u64>>,
    requested_total: Option<u64>,
    should_reconnect: bool,
    bucket_lag: f64,
    timeout: Duration,
    gateway_url: Option<Box<str>>,
    max_concurrency: Mutex<Option<u64>>,
    queue: Mutex<Option<Arc<IdentifyQueue>>>,
    current_shards: Mutex<Vec<Shard>>,
    pending_shards: Mutex<Vec<Shard>>,
    rescaling: Mutex<bool>,
    op_dispatcher: EventDispatcher<OpCode, GatewayEvent>,
    event_dispatcher: EventDispatcher<NamedEventKey, NamedEvent>,
}

/// Bootstraps and supervises every shard a bot runs.
///
/// Internally reference-counted: cloning is cheap and shares the same shard
/// set, identify-concurrency queue, and relayed dispatchers.
#[derive(Clone)]
pub struct ShardManager {
    inner: Arc<State>,
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager").finish_non_exhaustive()
    }
}

impl ShardManager {
    /// Start building a manager for a bot identified by `auth`, requesting
    /// `intents`.
    pub fn builder(auth: Auth, intents: Intents) -> ShardManagerBuilder {
        ShardManagerBuilder::new(auth, intents)
    }

    /// Dispatcher aggregating every managed shard's opcode-keyed events.
    pub fn op_dispatcher(&self) -> &EventDispatcher<OpCode, GatewayEvent> {
        &self.inner.op_dispatcher
    }

    /// Dispatcher aggregating every managed shard's dispatch-name-keyed and
    /// lifecycle events.
    pub fn event_dispatcher(&self) -> &EventDispatcher<NamedEventKey, NamedEvent> {
        &self.inner.event_dispatcher
    }

    /// Shards currently being run by this manager.
    pub fn shards(&self) -> Vec<Shard> {
        self.inner.current_shards.lock().unwrap().clone()
    }

    /// Retrieve `GET /gateway/bot`, learn the identify concurrency window,
    /// and bring up every configured shard.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorType::RetrievingGatewayInfo`] if the request fails or
    /// its body can't be decoded, and [`ErrorType::NoCapacity`] if the
    /// session start limit has no remaining identifies.
    pub async fn start(&self) -> Result<()> {
        let info = self.gateway_bot_info().await?;
        let start_limit = &info.session_start_limit;

        if start_limit.remaining == 0 {
            return Err(Error::new(ErrorType::NoCapacity));
        }

        tracing::debug!(
            remaining = start_limit.remaining,
            total = start_limit.total,
            max_concurrency = start_limit.max_concurrency,
            "session start limit",
        );

        let queue = Arc::new(IdentifyQueue::new(start_limit.max_concurrency));
        *self.inner.max_concurrency.lock().unwrap() = Some(start_limit.max_concurrency);
        *self.inner.queue.lock().unwrap() = Some(Arc::clone(&queue));

        let total = self.inner.requested_total.unwrap_or(info.shards);
        let ids = self
            .inner
            .requested_shards
            .clone()
            .unwrap_or_else(|| (0..total).collect());

        let shards: Vec<Shard> = ids
            .into_iter()
            .map(|id| self.build_shard(ShardId::new(id, total), Arc::clone(&queue) as Arc<dyn Queue>))
            .collect();

        for shard in &shards {
            self.relay(shard);
        }

        for shard in shards.clone() {
            tokio::spawn(async move {
                if let Err(error) = shard.connect().await {
                    tracing::warn!(id = %shard.id(), %error, "shard failed to connect");
                }
            });
        }

        *self.inner.current_shards.lock().unwrap() = shards;

        Ok(())
    }

    async fn gateway_bot_info(&self) -> Result<GatewayBotInfo> {
        let route = Route::new(Method::Get, "/gateway/bot", &[]);

        let response = self
            .inner
            .http
            .request(route, RequestOptions::default())
            .await
            .map_err(|source| Error::with_source(ErrorType::RetrievingGatewayInfo, source))?
            .ok_or_else(|| Error::new(ErrorType::RetrievingGatewayInfo))?;

        response
            .model()
            .map_err(|source| Error::with_source(ErrorType::RetrievingGatewayInfo, source))
    }

    fn build_shard(&self, id: ShardId, queue: Arc<dyn Queue>) -> Shard {
        let mut builder = Config::builder(self.inner.auth.clone(), self.inner.intents)
            .queue(queue)
            .bucket_lag(self.inner.bucket_lag)
            .should_reconnect(self.inner.should_reconnect)
            .timeout(self.inner.timeout);

        if let Some(url) = &self.inner.gateway_url {
            builder = builder.gateway_url(Some(url.to_string()));
        }

        Shard::with_config(id, builder.build())
    }

    /// Subscribe a global handler on `shard`'s two dispatchers that relays
    /// every event onto this manager's aggregate dispatchers.
    fn relay(&self, shard: &Shard) {
        {
            let manager = self.clone();
            shard.op_dispatcher().add_handler(move |key, value| {
                let manager = manager.clone();
                async move {
                    manager.inner.op_dispatcher.dispatch(key, value);
                }
            });
        }
        {
            let manager = self.clone();
            shard.event_dispatcher().add_handler(move |key, value| {
                let manager = manager.clone();
                async move {
                    manager.inner.event_dispatcher.dispatch(key, value);
                }
            });
        }
    }

    /// Replace the running shard set with `count` freshly connected shards.
    ///
    /// Only one rescale runs at a time. New shards participate in identify
    /// concurrency alongside any already-running shards; the server's
    /// `max_concurrency` is never exceeded since both sets draw from the same
    /// [`IdentifyQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorType::RescaleInProgress`] if a rescale is already
    /// running, [`ErrorType::NotStarted`] if [`Self::start`] hasn't
    /// succeeded yet, and propagates the first shard connection failure
    /// otherwise (leaving the current shard set untouched).
    pub async fn rescale(&self, count: u64) -> Result<()> {
        {
            let mut rescaling = self.inner.rescaling.lock().unwrap();
            if *rescaling {
                return Err(Error::new(ErrorType::RescaleInProgress));
            }
            *rescaling = true;
        }

        let result = self.rescale_inner(count).await;

        *self.inner.rescaling.lock().unwrap() = false;

        result
    }

    async fn rescale_inner(&self, count: u64) -> Result<()> {
        let queue = self
            .inner
            .queue
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::new(ErrorType::NotStarted))?;

        let shards: Vec<Shard> = (0..count)
            .map(|id| self.build_shard(ShardId::new(id, count), Arc::clone(&queue) as Arc<dyn Queue>))
            .collect();

        for shard in &shards {
            self.relay(shard);
        }

        *self.inner.pending_shards.lock().unwrap() = shards.clone();

        let results = futures_util::future::join_all(shards.iter().map(Shard::connect)).await;

        if let Some(error) = results.into_iter().find_map(std::result::Result::err) {
            let pending = mem::take(&mut *self.inner.pending_shards.lock().unwrap());
            futures_util::future::join_all(pending.iter().map(|shard| shard.disconnect(false))).await;

            return Err(error);
        }

        let old_shards = mem::replace(&mut *self.inner.current_shards.lock().unwrap(), shards);
        futures_util::future::join_all(old_shards.iter().map(|shard| shard.disconnect(false))).await;

        self.inner.pending_shards.lock().unwrap().clear();

        Ok(())
    }

    /// Disconnect every current and pending shard, then clear both sets.
    ///
    /// Idempotent: calling `close` again after shards are already cleared is
    /// a no-op.
    pub async fn close(&self) {
        let current = mem::take(&mut *self.inner.current_shards.lock().unwrap());
        let pending = mem::take(&mut *self.inner.pending_shards.lock().unwrap());

        futures_util::future::join_all(
            current
                .iter()
                .chain(pending.iter())
                .map(|shard| shard.disconnect(false)),
        )
        .await;
    }
}

/// Builder to customize a [`ShardManager`] before [`ShardManager::start`].
#[derive(Debug)]
#[must_use = "builder must be completed to be used"]
pub struct ShardManagerBuilder {
    auth: Auth,
    http: Option<Client>,
    intents: Intents,
    shards: Option<Vec<u64>>,
    shard_total: Option<u64>,
    should_reconnect: bool,
    bucket_lag: f64,
    timeout: Duration,
    gateway_url: Option<Box<str>>,
}

impl ShardManagerBuilder {
    /// Create a new builder, with default values, for the given
    /// authorization and intents.
    pub fn new(auth: Auth, intents: Intents) -> Self {
        Self {
            auth,
            http: None,
            intents,
            shards: None,
            shard_total: None,
            should_reconnect: true,
            bucket_lag: 0.2,
            timeout: Duration::from_secs(30),
            gateway_url: None,
        }
    }

    /// Share an existing REST client's connection pool instead of building a
    /// dedicated one.
    pub fn http(mut self, http: Client) -> Self {
        self.http = Some(http);

        self
    }

    /// Restrict the managed shards to this explicit list of IDs, instead of
    /// `0..recommended_shards`.
    pub fn shards(mut self, shards: Vec<u64>) -> Self {
        self.shards = Some(shards);

        self
    }

    /// Override the total shard count used in every `IDENTIFY`, instead of
    /// the server-recommended count.
    pub const fn shard_total(mut self, total: u64) -> Self {
        self.shard_total = Some(total);

        self
    }

    /// Set whether shards should attempt to reconnect on recoverable
    /// failures. Defaults to `true`.
    pub const fn should_reconnect(mut self, should_reconnect: bool) -> Self {
        self.should_reconnect = should_reconnect;

        self
    }

    /// Additive slack applied to rate-limit bookkeeping.
    pub const fn bucket_lag(mut self, bucket_lag: f64) -> Self {
        self.bucket_lag = bucket_lag;

        self
    }

    /// Timeout applied to individual websocket reads.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;

        self
    }

    /// Override the URL used to connect to the gateway.
    pub fn gateway_url(mut self, gateway_url: Option<String>) -> Self {
        self.gateway_url = gateway_url.map(String::into_boxed_str);

        self
    }

    /// Consume the builder, returning the finished manager.
    pub fn build(self) -> ShardManager {
        let http = self
            .http
            .unwrap_or_else(|| Client::builder(self.auth.clone()).build());

        ShardManager {
            inner: Arc::new(State {
                auth: self.auth,
                http,
                intents: self.intents,
                requested_shards: self.shards,
                requested_total: self.shard_total,
                should_reconnect: self.should_reconnect,
                bucket_lag: self.bucket_lag,
                timeout: self.timeout,
                gateway_url: self.gateway_url,
                max_concurrency: Mutex::new(None),
                queue: Mutex::new(None),
                current_shards: Mutex::new(Vec::new()),
                pending_shards: Mutex::new(Vec::new()),
                rescaling: Mutex::new(false),
                op_dispatcher: EventDispatcher::new(),
                event_dispatcher: EventDispatcher::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ShardManager, ShardManagerBuilder};
    use static_assertions::assert_impl_all;
    use twilight_model::{auth::Auth, intents::Intents};

    assert_impl_all!(ShardManager: Clone, Send, Sync);
    assert_impl_all!(ShardManagerBuilder: Send, Sync);

    #[test]
    fn builder_defaults_shard_list_to_none() {
        let manager = ShardManagerBuilder::new(Auth::bot("token"), Intents::empty()).build();
        assert!(manager.shards().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_on_a_fresh_manager_is_a_no_op() {
        let manager = ShardManager::builder(Auth::bot("token"), Intents::empty()).build();
        manager.close().await;
        assert!(manager.shards().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rescale_before_start_fails() {
        let manager = ShardManager::builder(Auth::bot("token"), Intents::empty()).build();
        let result = manager.rescale(1).await;
        assert!(result.is_err());
    }
}
