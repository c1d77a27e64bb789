//! The proxy engine.
//!
//! A [`Proxy`] owns one instance of every manager and is the single surface
//! domain clients talk to. Outbound traffic goes through one gate: until
//! the subject acknowledges the connection, messages are queued in issue
//! order; the acknowledgement flushes the queue before anything newer can
//! be sent. Inbound traffic is decoded and dispatched by `type`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use framelink_channels::{ChannelManager, ChannelTransport, LinkEndpoint, UpstreamSink};
use framelink_config::FramelinkConfig;
use framelink_core::{
    AcknowledgeMessage, AsyncHandler, ChannelError, ConnectionStatus, ConnectionStatusChange,
    DownstreamMessage, Error, Handler, LogLevel, LogMessage, MessageOrigin, MetricMessage,
    ResponseError, Result, SubscriptionHandler, Topic, UpstreamError, UpstreamMessage,
    sanitize_for_log, to_payload,
};
use framelink_health::{
    HealthCheckManager, HealthCheckOptions, HealthCheckStatus, HealthCheckStatusChanged,
};
use framelink_subscriptions::SubscriptionManager;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::error_service::{LocalErrorService, ProxyError, UpstreamErrorService};
use crate::logger::Logger;
use crate::module::ModuleProxy;
use crate::request::RequestManager;
use crate::status::{ConnectionStatusHandler, ConnectionStatusManager};
use crate::transport::Transport;

/// Reported in `messageOrigin.version`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Default)]
struct Gate {
    connection_established: bool,
    queue: VecDeque<UpstreamMessage>,
}

pub(crate) struct ProxyInner {
    provider_id: String,
    config: FramelinkConfig,
    origin: MessageOrigin,
    transport: Arc<dyn Transport>,
    initialized: AtomicBool,
    gate: Mutex<Gate>,
    connection_id: Mutex<Option<String>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    status: ConnectionStatusManager,
    errors: LocalErrorService,
    upstream_errors: UpstreamErrorService,
    subscriptions: SubscriptionManager,
    requests: Arc<RequestManager>,
    health: HealthCheckManager,
    channels: ChannelManager,
}

/// Handle to a proxy engine. Cloning is cheap and shares the engine.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("provider_id", &self.inner.provider_id)
            .field("transport", &self.inner.transport.name())
            .field("status", &self.inner.status.status())
            .finish()
    }
}

impl Proxy {
    /// Build a proxy over `transport`. Nothing is sent until [`init`](Self::init).
    ///
    /// The provider id comes from `config.provider.id`, or is generated.
    pub fn new(transport: Arc<dyn Transport>, config: FramelinkConfig) -> Self {
        let provider_id = config
            .provider
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let origin = MessageOrigin {
            provider_id: provider_id.clone(),
            transport: transport.name().to_string(),
            version: SDK_VERSION.to_string(),
        };

        let inner = Arc::new_cyclic(|weak: &Weak<ProxyInner>| {
            let heartbeat = {
                let weak = weak.clone();
                Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.send_or_queue(UpstreamMessage::HealthCheck {
                            message_origin: inner.origin.clone(),
                        });
                    }
                })
            };
            let child_upstream: UpstreamSink = {
                let weak = weak.clone();
                Arc::new(move |message| {
                    if let Some(inner) = weak.upgrade() {
                        inner.send_or_queue(message);
                    }
                })
            };

            ProxyInner {
                channels: ChannelManager::new(provider_id.clone(), child_upstream),
                requests: Arc::new(RequestManager::new(origin.clone())),
                health: HealthCheckManager::new(heartbeat),
                provider_id,
                config,
                origin,
                transport,
                initialized: AtomicBool::new(false),
                gate: Mutex::new(Gate::default()),
                connection_id: Mutex::new(None),
                dispatcher: Mutex::new(None),
                status: ConnectionStatusManager::new(),
                errors: LocalErrorService::new("proxy"),
                upstream_errors: UpstreamErrorService::new("upstream"),
                subscriptions: SubscriptionManager::new(),
            }
        });

        Self { inner }
    }

    /// Start the connection. Fails if called more than once.
    ///
    /// Status moves to `connecting`, then to `initializing` once the
    /// transport handshake returns, and to `ready` when the subject's
    /// acknowledgement arrives.
    pub async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.initialized.swap(true, Ordering::SeqCst) {
            warn!(provider_id = %inner.provider_id, "Proxy init called twice");
            return Err(Error::AlreadyInitialized);
        }

        info!(
            provider_id = %inner.provider_id,
            transport = %inner.transport.name(),
            "Initializing proxy"
        );
        inner.status.update(ConnectionStatusChange::Connecting);

        let (inbound, rx) = mpsc::unbounded_channel();
        let dispatcher = ProxyInner::spawn_dispatcher(Arc::downgrade(inner), rx);
        *inner.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);

        match inner.transport.connect(inbound).await {
            Ok(()) => {
                inner.status.update_from(
                    ConnectionStatus::Connecting,
                    ConnectionStatusChange::Initializing,
                );
                Ok(())
            }
            Err(e) => {
                inner.fail(ProxyError::new(format!("Transport handshake failed: {e}")));
                Err(e.into())
            }
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Subscribe `handler` to `topic` and return its handler id.
    ///
    /// The wire `subscribe` is only sent for the first handler of a topic;
    /// re-subscribing the same handler returns the same id.
    pub fn subscribe(&self, topic: Topic, handler: SubscriptionHandler) -> Uuid {
        let registration = self.inner.subscriptions.add(&topic, handler);
        if registration.topic_created {
            self.inner.send_or_queue(UpstreamMessage::Subscribe { topic });
        }
        registration.handler_id
    }

    /// Remove `handler` from `topic`; the wire `unsubscribe` is sent when
    /// the last handler goes.
    pub fn unsubscribe(&self, topic: &Topic, handler: &SubscriptionHandler) {
        if self.inner.subscriptions.delete(topic, handler) {
            self.inner.send_or_queue(UpstreamMessage::Unsubscribe {
                topic: topic.clone(),
            });
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    // ── Requests ────────────────────────────────────────────────────────

    /// Send a request with the configured timeout.
    pub fn request<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        command: &str,
        data: &T,
    ) -> BoxFuture<'static, std::result::Result<Value, ResponseError>> {
        let timeout = self.inner.config.proxy.request_timeout();
        self.request_with_timeout(namespace, command, data, timeout)
    }

    pub fn request_with_timeout<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        command: &str,
        data: &T,
        timeout: Duration,
    ) -> BoxFuture<'static, std::result::Result<Value, ResponseError>> {
        let message = self
            .inner
            .requests
            .create_request_message(namespace, command, to_payload(data));
        let outcome = self.inner.requests.process_request(&message, timeout);
        self.inner.send_or_queue(UpstreamMessage::Request(message));
        outcome
    }

    /// A view of this proxy scoped to one namespace.
    pub fn module(&self, namespace: impl Into<String>) -> ModuleProxy {
        ModuleProxy::new(self.clone(), namespace.into())
    }

    // ── Logging and metrics ─────────────────────────────────────────────

    /// Forward a log entry upstream under the configured source.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
        context: Map<String, Value>,
    ) {
        self.send_log_message(LogMessage {
            level,
            source: self.inner.config.logging.source.clone(),
            time: chrono::Utc::now(),
            message: message.into(),
            logger_id: self.inner.provider_id.clone(),
            data,
            context,
        });
    }

    /// Forward a fully built log entry.
    ///
    /// Ambient context is merged over the entry's own context; ambient keys
    /// win on collision. `data` is left untouched.
    pub fn send_log_message(&self, mut entry: LogMessage) {
        for (key, value) in self.inner.ambient_log_context() {
            entry.context.insert(key, value);
        }
        self.inner.send_or_queue(UpstreamMessage::Log(entry));
    }

    pub fn send_metric(&self, metric: MetricMessage) {
        self.inner.send_or_queue(UpstreamMessage::Metric(metric));
    }

    /// A logger tagged with `source` that also writes through `tracing`.
    pub fn logger(&self, source: impl Into<String>) -> Logger {
        Logger::new(
            self.clone(),
            source.into(),
            self.inner.config.logging.min_remote_level,
        )
    }

    // ── Events ──────────────────────────────────────────────────────────

    pub fn on_connection_status_change(&self, handler: ConnectionStatusHandler) {
        self.inner.status.on_change(handler);
    }

    pub fn off_connection_status_change(&self, handler: &ConnectionStatusHandler) -> bool {
        self.inner.status.off_change(handler)
    }

    pub fn on_error(&self, handler: Handler<ProxyError>) {
        self.inner.errors.on_error(handler);
    }

    pub fn off_error(&self, handler: &Handler<ProxyError>) -> bool {
        self.inner.errors.off_error(handler)
    }

    pub fn on_upstream_error(&self, handler: Handler<UpstreamError>) {
        self.inner.upstream_errors.on_error(handler);
    }

    pub fn off_upstream_error(&self, handler: &Handler<UpstreamError>) -> bool {
        self.inner.upstream_errors.off_error(handler)
    }

    pub fn on_health_check_status_change(&self, handler: AsyncHandler<HealthCheckStatusChanged>) {
        self.inner.health.on_status_change(handler);
    }

    pub fn off_health_check_status_change(
        &self,
        handler: &AsyncHandler<HealthCheckStatusChanged>,
    ) -> bool {
        self.inner.health.off_status_change(handler)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Drop back to queueing until the next acknowledgement.
    pub fn reset(&self, reason: Option<String>) {
        let inner = &self.inner;
        inner.health.stop();
        inner.close_gate();
        inner
            .connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(provider_id = %inner.provider_id, reason = ?reason, "Proxy reset");
        inner.status.update(ConnectionStatusChange::Reset { reason });
    }

    /// Tell the subject this side is going away and stop local timers.
    ///
    /// Pending requests are not rejected; they still time out on their own.
    pub fn close(&self) {
        let inner = &self.inner;
        inner.send_or_queue(UpstreamMessage::CloseChannel);
        inner.health.stop();
        inner.channels.close_all();
        info!(provider_id = %inner.provider_id, "Proxy closed");
    }

    // ── Child channels ──────────────────────────────────────────────────

    pub fn add_child_channel(
        &self,
        connection_id: &str,
        provider_id: Option<String>,
        transport: ChannelTransport,
    ) -> std::result::Result<(), ChannelError> {
        self.inner
            .channels
            .add_channel(connection_id, provider_id, transport)
    }

    pub fn update_child_channel_port(
        &self,
        connection_id: &str,
        endpoint: LinkEndpoint,
        provider_id: Option<String>,
    ) -> std::result::Result<(), ChannelError> {
        self.inner
            .channels
            .update_channel_port(connection_id, endpoint, provider_id)
    }

    pub fn close_child_channel(&self, connection_id: &str) -> std::result::Result<(), ChannelError> {
        self.inner.channels.handle_close_message(connection_id)
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.inner.channels
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn provider_id(&self) -> &str {
        &self.inner.provider_id
    }

    pub fn message_origin(&self) -> &MessageOrigin {
        &self.inner.origin
    }

    pub fn config(&self) -> &FramelinkConfig {
        &self.inner.config
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.status.status()
    }

    /// Connection id from the last acknowledgement, if connected.
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn is_connection_established(&self) -> bool {
        self.inner.gate().connection_established
    }

    /// Messages waiting for the connection to become ready.
    pub fn queued_messages(&self) -> usize {
        self.inner.gate().queue.len()
    }

    pub fn health_check_status(&self) -> HealthCheckStatus {
        self.inner.health.status()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.requests.pending_count()
    }
}

impl ProxyInner {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The single outbound gate.
    fn send_or_queue(&self, message: UpstreamMessage) {
        let failure = {
            let mut gate = self.gate();
            if gate.connection_established {
                let kind = message.kind();
                self.transport.send(&message).err().map(|e| (kind, e))
            } else {
                let limit = self.config.proxy.max_queued_messages;
                if limit > 0 && gate.queue.len() >= limit {
                    if let Some(dropped) = gate.queue.pop_front() {
                        warn!(
                            kind = dropped.kind(),
                            limit,
                            "Outbound queue full, dropping oldest message"
                        );
                    }
                }
                trace!(kind = message.kind(), queued = gate.queue.len() + 1, "Queued until ready");
                gate.queue.push_back(message);
                None
            }
        };

        if let Some((kind, e)) = failure {
            self.errors.handle_error(
                ProxyError::new(format!("Failed to send {kind}: {e}"))
                    .with_details(json!({ "type": kind })),
            );
        }
    }

    fn spawn_dispatcher(
        weak: Weak<ProxyInner>,
        mut rx: mpsc::UnboundedReceiver<Value>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.dispatch(raw);
            }
            debug!("Inbound dispatcher stopped");
        })
    }

    /// Decode one inbound message and route it by type.
    fn dispatch(self: &Arc<Self>, raw: Value) {
        let Some(kind) = raw.get("type").and_then(Value::as_str).map(str::to_owned) else {
            error!(message = %sanitize_for_log(&raw), "Inbound message without type dropped");
            return;
        };

        let message: DownstreamMessage = match serde_json::from_value(raw.clone()) {
            Ok(message) => message,
            Err(e) if DownstreamMessage::is_known_type(&kind) => {
                error!(
                    kind = %kind,
                    error = %e,
                    message = %sanitize_for_log(&raw),
                    "Malformed inbound message dropped"
                );
                return;
            }
            Err(_) => {
                error!(kind = %kind, "Unrecognized inbound message type");
                return;
            }
        };
        trace!(kind = %kind, "Inbound message");

        match message {
            DownstreamMessage::Acknowledge(ack) => self.handle_acknowledge(ack),
            DownstreamMessage::Publish { topic, data } => {
                let fanout = self.subscriptions.publish(&topic, data);
                tokio::spawn(async move {
                    let report = fanout.await;
                    if report.failed > 0 {
                        warn!(
                            %topic,
                            failed = report.failed,
                            invoked = report.invoked,
                            "Publish handlers failed"
                        );
                    }
                });
            }
            DownstreamMessage::Response(response) => {
                self.requests.process_response(response);
            }
            DownstreamMessage::HealthCheckResponse { time, counter } => {
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    inner.health.handle_response(time, counter).await;
                });
            }
            DownstreamMessage::ChildDownstreamMessage {
                connection_id,
                target_provider_id,
                message,
            } => {
                // Failures are logged by the channel manager.
                let _ = self.channels.handle_downstream_message(
                    &connection_id,
                    message,
                    target_provider_id.as_deref(),
                );
            }
            DownstreamMessage::ChildConnectionClose { connection_id } => {
                let _ = self.channels.handle_close_message(&connection_id);
            }
            DownstreamMessage::Error(err) => self.handle_upstream_error(err),
        }
    }

    fn handle_acknowledge(&self, ack: AcknowledgeMessage) {
        if !ack.status.initialized {
            self.fail(
                ProxyError::new("Subject acknowledged without initializing")
                    .with_details(json!({ "connectionId": ack.connection_id })),
            );
            return;
        }

        let (flushed, failures) = {
            let mut gate = self.gate();
            gate.connection_established = true;
            let queued: Vec<UpstreamMessage> = gate.queue.drain(..).collect();
            let failures: Vec<(&'static str, String)> = queued
                .iter()
                .filter_map(|message| {
                    self.transport
                        .send(message)
                        .err()
                        .map(|e| (message.kind(), e.to_string()))
                })
                .collect();
            (queued.len(), failures)
        };

        *self
            .connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ack.connection_id.clone());
        info!(connection_id = %ack.connection_id, flushed, "Connection ready");

        for (kind, reason) in failures {
            self.errors.handle_error(
                ProxyError::new(format!("Failed to flush {kind}: {reason}"))
                    .with_details(json!({ "type": kind })),
            );
        }

        self.status.update(ConnectionStatusChange::Ready {
            connection_id: ack.connection_id.clone(),
        });

        let interval_ms = ack
            .health_check_interval
            .unwrap_or(self.config.proxy.health_check_interval_ms);
        self.health.start(HealthCheckOptions {
            interval_ms,
            connection_id: Some(ack.connection_id),
        });
    }

    /// Queue outbound traffic again until the next `acknowledge`.
    fn close_gate(&self) {
        self.gate().connection_established = false;
    }

    fn handle_upstream_error(&self, err: UpstreamError) {
        self.health.stop();
        self.close_gate();
        let details = json!({ "errorKey": err.error_key, "details": err.details });
        let reason = err.reason.clone();
        self.upstream_errors.handle_error(err);
        self.status.update(ConnectionStatusChange::Error {
            reason,
            details: Some(details),
        });
    }

    /// Local failure: stop heartbeats, close the gate, report, and move to `error`.
    fn fail(&self, err: ProxyError) {
        self.health.stop();
        self.close_gate();
        let change = ConnectionStatusChange::Error {
            reason: err.reason.clone(),
            details: err.details.clone(),
        };
        self.errors.handle_error(err);
        self.status.update(change);
    }

    fn ambient_log_context(&self) -> Map<String, Value> {
        let mut context = self.transport.log_context();
        context.insert("providerId".into(), Value::String(self.provider_id.clone()));
        if let Some(connection_id) = self
            .connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            context.insert("connectionId".into(), Value::String(connection_id));
        }
        context
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if let Some(dispatcher) = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            dispatcher.abort();
        }
    }
}
