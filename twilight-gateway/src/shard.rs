//! A single connection to the gateway: the handshake, heartbeat loop, and
//! reconnection policy that keep one session alive.

use crate::{
    config::{Config, Session, ShardId},
    dispatcher::EventDispatcher,
    error::{Error, ErrorType, Result},
    event::{GatewayEvent, NamedEvent, NamedEventKey, OpCode},
    heartbeat::{Heartbeats, Latency},
    stage::Stage,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::{net::TcpStream, sync::oneshot, sync::Mutex as AsyncMutex, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use twilight_gateway_queue::Queue;
use twilight_http::Client;
use twilight_http_ratelimiting::WindowLimiter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Number of commands this shard may send per [`SEND_PERIOD`].
const SEND_LIMIT: u64 = 120;
/// Period over which [`SEND_LIMIT`] commands are admitted.
const SEND_PERIOD: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct RawPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

struct Runtime {
    stage: Stage,
    session_id: Option<Box<str>>,
    resume_url: Option<Box<str>>,
    sequence: Option<u64>,
    read_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    ack_tx: Option<oneshot::Sender<()>>,
}

impl Runtime {
    fn new(session: Option<&Session>) -> Self {
        let (session_id, resume_url, sequence) = match session {
            Some(session) => (
                Some(Box::from(session.session_id())),
                Some(Box::from(session.resume_url())),
                Some(session.sequence()),
            ),
            None => (None, None, None),
        };

        Self {
            stage: Stage::Disconnected,
            session_id,
            resume_url,
            sequence,
            read_task: None,
            heartbeat_task: None,
            ack_tx: None,
        }
    }
}

struct ShardRef {
    id: ShardId,
    config: Config,
    send_limiter: WindowLimiter,
    op_dispatcher: EventDispatcher<OpCode, GatewayEvent>,
    event_dispatcher: EventDispatcher<NamedEventKey, NamedEvent>,
    heartbeats: Heartbeats,
    sink: AsyncMutex<Option<SplitSink<WsStream, Message>>>,
    runtime: StdMutex<Runtime>,
}

/// One shard's connection to the gateway.
///
/// Internally reference-counted: cloning is cheap and shares the same
/// connection, dispatchers, and liveness state.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardRef>,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard").field("id", &self.inner.id).finish_non_exhaustive()
    }
}

impl Shard {
    /// Create a new shard for `id` with the given configuration.
    pub fn with_config(id: ShardId, config: Config) -> Self {
        let session = config.session().cloned();

        let inner = Arc::new(ShardRef {
            id,
            config,
            send_limiter: WindowLimiter::new(SEND_LIMIT, SEND_PERIOD),
            op_dispatcher: EventDispatcher::new(),
            event_dispatcher: EventDispatcher::new(),
            heartbeats: Heartbeats::new(),
            sink: AsyncMutex::new(None),
            runtime: StdMutex::new(Runtime::new(session.as_ref())),
        });

        let shard = Self { inner };
        shard.register_listeners();
        shard
    }

    /// This shard's identifier.
    pub const fn id(&self) -> ShardId {
        self.inner.id
    }

    /// Current connection stage.
    pub fn stage(&self) -> Stage {
        self.inner.runtime.lock().unwrap().stage
    }

    /// Current heartbeat latency.
    pub fn latency(&self) -> Latency {
        self.inner.heartbeats.latency()
    }

    /// Dispatcher of raw opcode-keyed gateway events.
    pub fn op_dispatcher(&self) -> &EventDispatcher<OpCode, GatewayEvent> {
        &self.inner.op_dispatcher
    }

    /// Dispatcher of dispatch-name-keyed gateway events, plus lifecycle
    /// events.
    pub fn event_dispatcher(&self) -> &EventDispatcher<NamedEventKey, NamedEvent> {
        &self.inner.event_dispatcher
    }

    fn register_listeners(&self) {
        let op_dispatcher = &self.inner.op_dispatcher;

        {
            let shard = self.clone();
            op_dispatcher.add_listener(OpCode::Reconnect, move |_event| {
                let shard = shard.clone();
                async move {
                    tracing::debug!(id = %shard.id(), "gateway asked us to reconnect");
                    shard.disconnect(true).await;
                    if let Err(error) = shard.connect().await {
                        shard.report_fatal(error);
                    }
                }
            });
        }
        {
            let shard = self.clone();
            op_dispatcher.add_listener(OpCode::InvalidSession, move |event| {
                let shard = shard.clone();
                async move {
                    let GatewayEvent::InvalidSession(resumable) = event else {
                        return;
                    };

                    tracing::debug!(id = %shard.id(), resumable, "session invalidated");

                    if shard.inner.config.should_reconnect() {
                        shard.disconnect(resumable).await;
                        if let Err(error) = shard.connect().await {
                            shard.report_fatal(error);
                        }
                    } else {
                        shard.disconnect(false).await;
                    }
                }
            });
        }
        {
            let shard = self.clone();
            op_dispatcher.add_listener(OpCode::Hello, move |event| {
                let shard = shard.clone();
                async move {
                    let GatewayEvent::Hello { heartbeat_interval } = event else {
                        return;
                    };

                    shard.handle_hello(heartbeat_interval).await;
                }
            });
        }
        {
            let shard = self.clone();
            op_dispatcher.add_listener(OpCode::HeartbeatAck, move |_event| {
                let shard = shard.clone();
                async move {
                    shard.inner.heartbeats.record_ack();

                    if let Some(tx) = shard.inner.runtime.lock().unwrap().ack_tx.take() {
                        let _ = tx.send(());
                    }
                }
            });
        }
    }

    /// Connect to the gateway, resuming the existing session if one is
    /// present.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut runtime = self.inner.runtime.lock().unwrap();
            runtime.stage = Stage::Connecting;
        }

        let resume_url = self.inner.runtime.lock().unwrap().resume_url.clone();
        let url = Client::gateway_url(resume_url.as_deref(), self.inner.config.gateway_url());

        tracing::debug!(id = %self.id(), %url, "connecting to the gateway");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .map_err(|source| Error::with_source(ErrorType::Establishing, source))?;

        let (sink, stream) = ws_stream.split();
        *self.inner.sink.lock().await = Some(sink);

        {
            let mut runtime = self.inner.runtime.lock().unwrap();
            runtime.stage = Stage::AwaitingHello;
        }

        self.inner
            .event_dispatcher
            .dispatch(NamedEventKey::Connected, NamedEvent::Connected);

        let shard = self.clone();
        let handle = tokio::spawn(async move {
            shard.read_loop(stream).await;
        });

        self.inner.runtime.lock().unwrap().read_task = Some(handle);

        Ok(())
    }

    async fn read_loop(&self, mut stream: SplitStream<WsStream>) {
        let mut inflater = crate::inflate::Inflater::new();
        let mut close_code: Option<u16> = None;

        loop {
            let next = tokio::time::timeout(self.inner.config.timeout(), stream.next()).await;

            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(_source))) => break,
                Ok(None) => break,
                Err(_elapsed) => break,
            };

            match message {
                Message::Text(text) => self.handle_text(text),
                Message::Binary(bytes) => {
                    inflater.extend(&bytes);

                    match inflater.message() {
                        Ok(Some(payload)) => {
                            let text = String::from_utf8_lossy(payload).into_owned();
                            self.handle_text(text);
                            inflater.clear();
                        }
                        Ok(None) => {}
                        Err(source) => {
                            let error = Error::with_source(ErrorType::Decompressing, source);
                            tracing::warn!(id = %self.id(), %error, "dropping connection after a decompression failure");
                            break;
                        }
                    }
                }
                Message::Close(frame) => {
                    close_code = frame.map(|CloseFrame { code, .. }| u16::from(code));
                    break;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }

        let code = close_code.unwrap_or(1006);

        // `handle_close_code` may call `disconnect`, which aborts and awaits
        // this very read task. Running it inline here would cancel itself
        // mid-flight and drop everything after that point (the close frame,
        // session teardown, the reconnect). Hand it off to a detached task
        // instead, the same way the heartbeat loop's missed-ACK path does.
        let shard = self.clone();
        tokio::spawn(async move {
            shard.handle_close_code(code).await;
        });
    }

    fn handle_text(&self, text: String) {
        let raw: RawPayload = match twilight_model::json::from_slice(text.as_bytes()) {
            Ok(raw) => raw,
            Err(_source) => {
                tracing::warn!(id = %self.id(), "received an undecodable payload");
                return;
            }
        };

        if let Some(sequence) = raw.s {
            self.inner.runtime.lock().unwrap().sequence = Some(sequence);
        }

        let Some(opcode) = OpCode::from_raw(raw.op) else {
            tracing::trace!(id = %self.id(), op = raw.op, "ignoring unrecognized opcode");
            return;
        };

        match opcode {
            OpCode::Dispatch => {
                let name: Box<str> = raw.t.unwrap_or_default().into();
                let sequence = raw.s.unwrap_or_default();

                self.handle_dispatch(&name, raw.d.clone());

                self.inner.op_dispatcher.dispatch(
                    OpCode::Dispatch,
                    GatewayEvent::Dispatch {
                        sequence,
                        name,
                        data: raw.d,
                    },
                );
            }
            OpCode::Reconnect => {
                self.inner.op_dispatcher.dispatch(OpCode::Reconnect, GatewayEvent::Reconnect);
            }
            OpCode::InvalidSession => {
                let resumable = raw.d.as_bool().unwrap_or(false);
                self.inner
                    .op_dispatcher
                    .dispatch(OpCode::InvalidSession, GatewayEvent::InvalidSession(resumable));
            }
            OpCode::Hello => {
                let heartbeat_interval = raw.d.get("heartbeat_interval").and_then(Value::as_u64).unwrap_or_default();
                self.inner
                    .op_dispatcher
                    .dispatch(OpCode::Hello, GatewayEvent::Hello { heartbeat_interval });
            }
            OpCode::HeartbeatAck => {
                self.inner.op_dispatcher.dispatch(OpCode::HeartbeatAck, GatewayEvent::HeartbeatAck);
            }
            OpCode::Heartbeat | OpCode::Identify | OpCode::Resume => {}
        }
    }

    fn handle_dispatch(&self, name: &str, data: Value) {
        self.inner.event_dispatcher.dispatch(
            NamedEventKey::Dispatch(Box::from(name)),
            NamedEvent::Dispatch {
                name: Box::from(name),
                data: data.clone(),
            },
        );

        if name == "READY" {
            let session_id = data.get("session_id").and_then(Value::as_str).map(Box::from);
            let resume_url = data.get("resume_gateway_url").and_then(Value::as_str).map(Box::from);

            let mut runtime = self.inner.runtime.lock().unwrap();
            runtime.session_id = session_id;
            runtime.resume_url = resume_url;
            runtime.stage = Stage::Ready;
        } else if name == "RESUMED" {
            self.inner.runtime.lock().unwrap().stage = Stage::Ready;
        }
    }

    async fn handle_hello(&self, heartbeat_interval_ms: u64) {
        let interval = Duration::from_millis(heartbeat_interval_ms);

        let shard = self.clone();
        let handle = tokio::spawn(async move {
            shard.heartbeat_loop(interval).await;
        });
        self.inner.runtime.lock().unwrap().heartbeat_task = Some(handle);

        let has_session = self.inner.runtime.lock().unwrap().session_id.is_some();

        let result = if has_session { self.resume().await } else { self.identify().await };

        if let Err(error) = result {
            tracing::warn!(id = %self.id(), %error, "failed to identify or resume");
        }
    }

    async fn heartbeat_loop(&self, interval: Duration) {
        let jitter = interval.mul_f64(rand::thread_rng().gen::<f64>());
        tokio::time::sleep(jitter).await;

        loop {
            let sequence = self.inner.runtime.lock().unwrap().sequence;

            if self.send(&json!({ "op": 1, "d": sequence })).await.is_err() {
                return;
            }

            self.inner.heartbeats.record_sent();

            let (tx, rx) = oneshot::channel();
            self.inner.runtime.lock().unwrap().ack_tx = Some(tx);

            if tokio::time::timeout(interval, rx).await.is_err() {
                tracing::warn!(id = %self.id(), "missed a heartbeat acknowledgement, reconnecting");
                let shard = self.clone();
                tokio::spawn(async move {
                    shard.disconnect(true).await;
                    if let Err(error) = shard.connect().await {
                        shard.report_fatal(error);
                    }
                });
                return;
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Send IDENTIFY, gated on the manager-supplied identify-concurrency
    /// queue.
    async fn identify(&self) -> Result<()> {
        {
            let mut runtime = self.inner.runtime.lock().unwrap();
            runtime.stage = Stage::Identifying;
        }

        self.inner
            .config
            .queue()
            .request([self.inner.id.current(), self.inner.id.total()])
            .await;

        let os = os_name();

        let payload = json!({
            "op": 2,
            "d": {
                "token": self.inner.config.auth().header(),
                "intents": self.inner.config.intents().bits(),
                "shard": [self.inner.id.current(), self.inner.id.total()],
                "properties": {
                    "os": os,
                    "browser": "twilight-gateway",
                    "device": "twilight-gateway",
                },
            },
        });

        self.send(&payload).await
    }

    /// Send RESUME for the currently held session.
    async fn resume(&self) -> Result<()> {
        let (session_id, sequence) = {
            let runtime = self.inner.runtime.lock().unwrap();
            (runtime.session_id.clone(), runtime.sequence)
        };

        let Some(session_id) = session_id else {
            return Err(Error::new(ErrorType::SessionInactive));
        };

        {
            let mut runtime = self.inner.runtime.lock().unwrap();
            runtime.stage = Stage::Resuming;
        }

        let payload = json!({
            "op": 6,
            "d": {
                "token": self.inner.config.auth().header(),
                "session_id": &*session_id,
                "seq": sequence,
            },
        });

        self.send(&payload).await
    }

    async fn send(&self, payload: &Value) -> Result<()> {
        self.inner.send_limiter.acquire().await;

        let text = twilight_model::json::to_vec(payload)
            .map_err(|source| Error::with_source(ErrorType::Deserializing, source))?;
        let text = String::from_utf8_lossy(&text).into_owned();

        let mut sink = self.inner.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(Error::new(ErrorType::Sending));
        };

        sink.send(Message::Text(text))
            .await
            .map_err(|source| Error::with_source(ErrorType::Sending, source))
    }

    /// Disconnect the current connection, optionally retaining the session
    /// for a future resume.
    ///
    /// Idempotent: a second concurrent call while already disconnected is a
    /// no-op.
    pub async fn disconnect(&self, keep_session: bool) {
        let (read_task, heartbeat_task, ack_tx) = {
            let mut runtime = self.inner.runtime.lock().unwrap();

            if runtime.stage == Stage::Disconnected {
                return;
            }

            runtime.stage = Stage::Disconnected;

            (runtime.read_task.take(), runtime.heartbeat_task.take(), runtime.ack_tx.take())
        };

        if let Some(handle) = read_task {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = heartbeat_task {
            handle.abort();
            let _ = handle.await;
        }
        drop(ack_tx);

        let close_code = if keep_session { 999 } else { 1000 };
        let frame = CloseFrame {
            code: CloseCode::from(close_code),
            reason: "".into(),
        };

        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.send(Message::Close(Some(frame))).await;
            let _ = sink.close().await;
        }

        if !keep_session {
            let mut runtime = self.inner.runtime.lock().unwrap();
            runtime.session_id = None;
            runtime.resume_url = None;
            runtime.sequence = None;
        }

        self.inner
            .event_dispatcher
            .dispatch(NamedEventKey::Disconnected, NamedEvent::Disconnected);
    }

    fn report_fatal(&self, error: Error) {
        tracing::error!(id = %self.id(), %error, "shard stopped permanently");

        self.inner.runtime.lock().unwrap().stage = Stage::ClosedFatal;

        self.inner
            .event_dispatcher
            .dispatch(NamedEventKey::Error, NamedEvent::Error(Arc::new(error)));
    }

    async fn handle_close_code(&self, code: u16) {
        tracing::debug!(id = %self.id(), code, "connection closed");

        let fatal = |shard: &Shard, kind: ErrorType| {
            let shard = shard.clone();
            async move {
                shard.disconnect(false).await;
                shard.report_fatal(Error::new(kind));
            }
        };

        match code {
            code if code < 2000 => {
                self.disconnect(false).await;
                if let Err(error) = self.connect().await {
                    self.report_fatal(error);
                }
            }
            4000 => {
                self.disconnect(true).await;
                if let Err(error) = self.connect().await {
                    self.report_fatal(error);
                }
            }
            4001 | 4002 | 4005 => {
                self.disconnect(false).await;

                if self.inner.config.should_reconnect() {
                    if let Err(error) = self.connect().await {
                        self.report_fatal(error);
                    }
                } else {
                    self.report_fatal(Error::new(ErrorType::Closed { code }));
                }
            }
            4003 | 4007 | 4009 => {
                self.disconnect(false).await;
                if let Err(error) = self.connect().await {
                    self.report_fatal(error);
                }
            }
            4004 => fatal(self, ErrorType::Authentication).await,
            4008 => {
                self.disconnect(true).await;
                tokio::time::sleep(SEND_PERIOD).await;
                if let Err(error) = self.connect().await {
                    self.report_fatal(error);
                }
            }
            4010 | 4011 => fatal(self, ErrorType::Sharding { code }).await,
            4013 | 4014 => fatal(self, ErrorType::Intents { code }).await,
            code => fatal(self, ErrorType::Closed { code }).await,
        }
    }
}

fn os_name() -> &'static str {
    let os = std::env::consts::OS;

    if os.is_empty() {
        "Unknown"
    } else {
        os
    }
}

#[cfg(test)]
mod tests {
    use super::Shard;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Shard: Clone, Send, Sync);

    #[test]
    fn os_name_is_never_empty() {
        assert!(!super::os_name().is_empty());
    }
}
