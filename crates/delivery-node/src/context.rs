//! The node context: what a host holds a handle to
//!
//! Every command is checked against the lifecycle state synchronously, then
//! runs as a tracked task on the runtime. The task races the context's
//! shutdown signal, so `destroy` can cancel it and still have its completion
//! fire exactly once.
//!
//! Lock order: `shared` before the event slot. Neither lock is held across
//! an await or while a host callback runs.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use delivery_core::{
    ContentTopic, DeliveryError, DeliveryEvent, DeliveryResult, MAX_PAYLOAD_BYTES, NodeConfig,
    OutboundMessage, RequestId, SendReceipt,
};
use delivery_logging::{CommandCorrelation, NodeContextGuard, fields, spans};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::completion::{CommandOutcome, Completion};
use crate::correlation::{Acceptance, PendingSend, RequestTable, Resolution};
use crate::engine::{DeliveryEngine, EventEmitter};
use crate::multiplexer::{self, Dispatch, EncodedEvent, EventCallback, EventSlot};
use crate::state::{Command, NodeState};

/// Error reported for sends still unresolved when the node stops
pub const ABANDONED_ON_STOP: &str = "node stopped before delivery confirmed";

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// State guarded by the context mutex
#[derive(Debug, Default)]
struct Shared {
    state: NodeState,
    subscriptions: BTreeSet<ContentTopic>,
    requests: RequestTable,
    tasks: Vec<JoinHandle<()>>,
    /// The engine may hold resources that need a stop
    engine_started: bool,
}

struct Inner {
    id: u64,
    instance_id: Uuid,
    config: NodeConfig,
    runtime: Handle,
    engine: Arc<dyn DeliveryEngine>,
    shared: Mutex<Shared>,
    /// Serializes subscription changes against the engine
    subscription_lock: tokio::sync::Mutex<()>,
    events: EventSlot,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    shutdown_tx: broadcast::Sender<()>,
    multiplexer: Mutex<Option<JoinHandle<()>>>,
}

/// A node handle
///
/// Cheap to clone; every clone refers to the same node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Decode `config_json` and build a node in the `Created` state
    pub fn create(
        config_json: &str,
        engine: Arc<dyn DeliveryEngine>,
        runtime: Handle,
    ) -> DeliveryResult<Self> {
        let config = NodeConfig::from_json(config_json)?;
        Ok(Self::new(config, engine, runtime))
    }

    /// Build a node from an already validated config
    ///
    /// Must be called where `runtime` can spawn; the event multiplexer starts
    /// immediately.
    pub fn new(config: NodeConfig, engine: Arc<dyn DeliveryEngine>, runtime: Handle) -> Self {
        let id = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
        let instance_id = Uuid::new_v4();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);

        let inner = Arc::new(Inner {
            id,
            instance_id,
            config,
            runtime,
            engine,
            shared: Mutex::new(Shared::default()),
            subscription_lock: tokio::sync::Mutex::new(()),
            events: EventSlot::new(),
            dispatch_tx,
            shutdown_tx,
            multiplexer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let handle = multiplexer::spawn(
            &inner.runtime,
            dispatch_rx,
            inner.shutdown_tx.subscribe(),
            move |item| match weak.upgrade() {
                Some(inner) => {
                    inner.dispatch(item);
                    true
                }
                None => false,
            },
        );
        *inner.multiplexer.lock() = Some(handle);

        let _node = NodeContextGuard::with_instance_id(id, instance_id);
        let _span = CommandCorrelation::new(id, spans::CREATE_NODE).span().entered();
        info!(
            cluster_id = inner.config.cluster_id(),
            mode = ?inner.config.mode(),
            shards = inner.config.shards().len(),
            "Node created"
        );

        Self { inner }
    }

    /// Process-unique node ID, never reused
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> NodeState {
        self.inner.shared.lock().state
    }

    /// Active content-topic subscriptions, sorted
    pub fn subscriptions(&self) -> Vec<ContentTopic> {
        self.inner.shared.lock().subscriptions.iter().cloned().collect()
    }

    /// Number of sends awaiting a terminal event
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.lock().requests.len()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.inner.shared.lock().requests.contains(request_id)
    }

    pub fn has_event_callback(&self) -> bool {
        self.inner.events.is_set()
    }

    /// Start the engine; restarts re-register existing subscriptions
    pub fn start(&self, completion: Completion) -> DeliveryResult<()> {
        let span = self.command_span(CommandCorrelation::new(self.id(), spans::START_NODE));
        self.run_command(
            Command::Start,
            completion,
            span,
            |shared| {
                shared.state = NodeState::Starting;
                Ok(())
            },
            |inner| inner.start(),
        )
    }

    /// Stop the engine; unresolved sends get a synthesized `message_error`
    pub fn stop(&self, completion: Completion) -> DeliveryResult<()> {
        let span = self.command_span(CommandCorrelation::new(self.id(), spans::STOP_NODE));
        self.run_command(
            Command::Stop,
            completion,
            span,
            |shared| {
                shared.state = NodeState::Stopping;
                Ok(())
            },
            |inner| inner.stop(),
        )
    }

    /// Add a content topic; subscribing to a member is a no-op
    pub fn subscribe(&self, content_topic: &str, completion: Completion) -> DeliveryResult<()> {
        let span = self.command_span(CommandCorrelation::new(self.id(), spans::SUBSCRIBE));
        span.record(fields::CONTENT_TOPIC, content_topic);
        let topic = match self.precheck(Command::Subscribe, || ContentTopic::new(content_topic)) {
            Ok(topic) => topic,
            Err(e) => return reject(&span, completion, e),
        };
        self.run_command(
            Command::Subscribe,
            completion,
            span,
            |_| Ok(()),
            |inner| inner.subscribe(topic),
        )
    }

    /// Remove a content topic; removing a non-member is a no-op
    pub fn unsubscribe(&self, content_topic: &str, completion: Completion) -> DeliveryResult<()> {
        let span = self.command_span(CommandCorrelation::new(self.id(), spans::UNSUBSCRIBE));
        span.record(fields::CONTENT_TOPIC, content_topic);
        let topic = match self.precheck(Command::Unsubscribe, || ContentTopic::new(content_topic)) {
            Ok(topic) => topic,
            Err(e) => return reject(&span, completion, e),
        };
        self.run_command(
            Command::Unsubscribe,
            completion,
            span,
            |_| Ok(()),
            |inner| inner.unsubscribe(topic),
        )
    }

    /// Hand a message envelope to the engine
    ///
    /// On acceptance the completion receives
    /// `{"requestId": ..., "messageHash": ...}`; the outcome follows as
    /// events carrying the same request ID.
    pub fn send(&self, message_json: &str, completion: Completion) -> DeliveryResult<()> {
        let request_id = RequestId::generate();
        let correlation =
            CommandCorrelation::new(self.id(), spans::SEND).with_request_id(request_id.as_str());
        let span = self.command_span(correlation);

        let message = match self.precheck(Command::Send, || decode_message(message_json)) {
            Ok(message) => message,
            Err(e) => return reject(&span, completion, e),
        };
        span.record(fields::CONTENT_TOPIC, message.content_topic.as_str());

        let pending = PendingSend::new(message.content_topic.clone());
        let id = request_id.clone();
        self.run_command(
            Command::Send,
            completion,
            span,
            move |shared| {
                shared.requests.insert(id, pending);
                Ok(())
            },
            move |inner| inner.send(request_id, message),
        )
    }

    /// Install, replace or remove (`None`) the standing event callback
    pub fn set_event_callback(&self, callback: Option<EventCallback>) -> DeliveryResult<()> {
        let span = self.command_span(CommandCorrelation::new(self.id(), spans::SET_EVENT_CALLBACK));
        let _enter = span.enter();
        let shared = self.inner.shared.lock();
        shared.state.ensure(Command::SetEventCallback)?;
        let replaced = self.inner.events.set(callback);
        debug!(
            replaced = replaced.is_some(),
            installed = self.inner.events.is_set(),
            "Event callback updated"
        );
        Ok(())
    }

    /// Tear the node down
    ///
    /// In-flight commands are cancelled and each reports
    /// [`DeliveryError::Cancelled`]; the engine is stopped and the
    /// multiplexer drained before `completion` fires. Nothing fires after it.
    pub fn destroy(&self, completion: Completion) -> DeliveryResult<()> {
        let span = self.command_span(CommandCorrelation::new(self.id(), spans::DESTROY));

        let tasks = {
            let mut shared = self.inner.shared.lock();
            let admitted = shared.state.ensure(Command::Destroy);
            if let Err(e) = admitted {
                drop(shared);
                return reject(&span, completion, e);
            }
            let previous = shared.state;
            shared.state = NodeState::Destroyed;
            debug!(parent: &span, previous = %previous, in_flight = shared.tasks.len(), "Destroying node");
            std::mem::take(&mut shared.tasks)
        };
        self.inner.events.clear();
        let _ = self.inner.shutdown_tx.send(());

        let inner = self.inner.clone();
        self.inner.runtime.spawn(
            async move {
                for task in tasks {
                    if let Err(e) = task.await {
                        warn!(error = %e, "Command task ended abnormally");
                    }
                }

                let engine_started = inner.shared.lock().engine_started;
                if engine_started {
                    if let Err(e) = inner.engine.stop().await {
                        warn!(error = %e, "Engine stop failed during destroy");
                    }
                }

                let multiplexer = inner.multiplexer.lock().take();
                if let Some(multiplexer) = multiplexer {
                    let _ = multiplexer.await;
                }

                {
                    let mut shared = inner.shared.lock();
                    shared.subscriptions.clear();
                    shared.requests.clear();
                    shared.engine_started = false;
                }

                info!("Node destroyed");
                completion.succeed();
            }
            .instrument(span),
        );
        Ok(())
    }

    fn command_span(&self, correlation: CommandCorrelation) -> Span {
        let _node = NodeContextGuard::with_instance_id(self.inner.id, self.inner.instance_id);
        let span = correlation.span();
        span.record(fields::STATE, self.state().as_str());
        span
    }

    /// Fail fast on state before decoding input, so a node that cannot take
    /// the command says so regardless of what was sent
    fn precheck<T>(
        &self,
        command: Command,
        decode: impl FnOnce() -> DeliveryResult<T>,
    ) -> DeliveryResult<T> {
        self.state().ensure(command)?;
        decode()
    }

    /// Check `command`, let `prepare` update shared state, then run `work` as
    /// a tracked task that races the shutdown signal
    fn run_command<P, W, Fut>(
        &self,
        command: Command,
        completion: Completion,
        span: Span,
        prepare: P,
        work: W,
    ) -> DeliveryResult<()>
    where
        P: FnOnce(&mut Shared) -> DeliveryResult<()>,
        W: FnOnce(Arc<Inner>) -> Fut,
        Fut: Future<Output = CommandOutcome> + Send + 'static,
    {
        let mut shared = self.inner.shared.lock();
        let admitted = shared.state.ensure(command).and_then(|()| prepare(&mut shared));
        if let Err(e) = admitted {
            drop(shared);
            return reject(&span, completion, e);
        }

        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let future = work(self.inner.clone());
        let task = self.inner.runtime.spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!("Command cancelled by destroy");
                        completion.fail(DeliveryError::Cancelled);
                    }
                    outcome = future => completion.complete(outcome),
                }
            }
            .instrument(span),
        );

        shared.tasks.retain(|t| !t.is_finished());
        shared.tasks.push(task);
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn reject(span: &Span, completion: Completion, error: DeliveryError) -> DeliveryResult<()> {
    debug!(parent: span, error = %error, kind = ?error.kind(), "Command rejected");
    completion.fail(error.clone());
    Err(error)
}

fn decode_message(json: &str) -> DeliveryResult<OutboundMessage> {
    let message = OutboundMessage::from_json(json)?;
    if message.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(DeliveryError::invalid_field(
            "payload",
            format!(
                "payload of {} bytes exceeds the {MAX_PAYLOAD_BYTES} byte limit",
                message.payload.len()
            ),
        ));
    }
    Ok(message)
}

impl Inner {
    /// Move from `from` to `to` unless something else changed the state
    fn transition(&self, from: NodeState, to: NodeState) -> bool {
        let mut shared = self.shared.lock();
        if shared.state == from {
            shared.state = to;
            true
        } else {
            false
        }
    }

    fn emitter(&self) -> EventEmitter {
        let tx = self.dispatch_tx.clone();
        EventEmitter::new(move |event| tx.send(Dispatch::Engine(event)).is_ok())
    }

    async fn start(self: Arc<Self>) -> CommandOutcome {
        self.shared.lock().engine_started = true;

        if let Err(e) = self.engine.start(&self.config, self.emitter()).await {
            self.shared.lock().engine_started = false;
            self.transition(NodeState::Starting, NodeState::Failed);
            warn!(error = %e, "Engine rejected start");
            return Err(e.into());
        }

        self.resubscribe().await;

        if self.transition(NodeState::Starting, NodeState::Running) {
            info!("Node started");
        }
        Ok(None)
    }

    async fn resubscribe(&self) {
        let _serial = self.subscription_lock.lock().await;
        let topics: Vec<ContentTopic> = self.shared.lock().subscriptions.iter().cloned().collect();
        let total = topics.len();
        for topic in topics {
            if let Err(e) = self.engine.subscribe(&topic).await {
                warn!(content_topic = %topic, error = %e, "Re-subscribe failed, dropping topic");
                self.shared.lock().subscriptions.remove(&topic);
            }
        }
        if total > 0 {
            debug!(count = total, "Restored subscriptions");
        }
    }

    async fn stop(self: Arc<Self>) -> CommandOutcome {
        if let Err(e) = self.engine.stop().await {
            self.transition(NodeState::Stopping, NodeState::Failed);
            warn!(error = %e, "Engine rejected stop");
            return Err(e.into());
        }

        let abandoned = {
            let mut shared = self.shared.lock();
            shared.engine_started = false;
            if shared.state != NodeState::Stopping {
                return Ok(None);
            }
            shared.state = NodeState::Stopped;
            shared.requests.abandon()
        };

        let count = abandoned.len();
        for (request_id, pending) in abandoned {
            self.report_abandoned(request_id, pending);
        }

        info!(abandoned = count, "Node stopped");
        Ok(None)
    }

    fn report_abandoned(&self, request_id: RequestId, pending: PendingSend) {
        let Some(message_hash) = pending.message_hash else {
            return;
        };
        let event = DeliveryEvent::MessageError {
            request_id,
            message_hash,
            error: ABANDONED_ON_STOP.to_string(),
        };
        let _ = self.dispatch_tx.send(Dispatch::Resolved(event));
    }

    async fn subscribe(self: Arc<Self>, topic: ContentTopic) -> CommandOutcome {
        let _serial = self.subscription_lock.lock().await;
        if self.shared.lock().subscriptions.contains(&topic) {
            debug!("Already subscribed");
            return Ok(None);
        }

        self.engine.subscribe(&topic).await?;
        self.shared.lock().subscriptions.insert(topic);
        info!("Subscribed");
        Ok(None)
    }

    async fn unsubscribe(self: Arc<Self>, topic: ContentTopic) -> CommandOutcome {
        let _serial = self.subscription_lock.lock().await;
        if !self.shared.lock().subscriptions.contains(&topic) {
            debug!("Not subscribed, nothing to do");
            return Ok(None);
        }

        self.engine.unsubscribe(&topic).await?;
        self.shared.lock().subscriptions.remove(&topic);
        info!("Unsubscribed");
        Ok(None)
    }

    async fn send(self: Arc<Self>, request_id: RequestId, message: OutboundMessage) -> CommandOutcome {
        match self.engine.send(&request_id, message).await {
            Ok(message_hash) => {
                Span::current().record(fields::MESSAGE_HASH, message_hash.as_str());
                let acceptance = self
                    .shared
                    .lock()
                    .requests
                    .accept(&request_id, message_hash.clone());
                match acceptance {
                    Acceptance::Pending => {}
                    Acceptance::Resolved => {
                        debug!("Request resolved before acceptance was reported");
                    }
                    Acceptance::Abandoned(pending) => {
                        info!("Node stopped while the engine was accepting");
                        self.report_abandoned(request_id.clone(), pending);
                    }
                }
                info!("Message accepted");
                let receipt = SendReceipt {
                    request_id,
                    message_hash,
                };
                Ok(Some(receipt.to_json()?))
            }
            Err(e) => {
                self.shared.lock().requests.remove(&request_id);
                warn!(error = %e, "Engine refused message");
                Err(e.into())
            }
        }
    }

    /// Deliver one multiplexed event to the host
    fn dispatch(&self, item: Dispatch) {
        let event = {
            let mut shared = self.shared.lock();
            if shared.state == NodeState::Destroyed {
                return;
            }
            match item {
                Dispatch::Engine(event) => match shared.requests.resolve(&event) {
                    Resolution::Forward => event,
                    Resolution::Drop => {
                        debug!(
                            node_id = self.id,
                            event_type = event.event_type(),
                            request_id = ?event.request_id().map(RequestId::as_str),
                            "Dropping event for a request that is not pending"
                        );
                        return;
                    }
                },
                Dispatch::Resolved(event) => event,
            }
        };

        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(node_id = self.id, error = %e, "Cannot encode event");
                return;
            }
        };

        let Some(callback) = self.events.current() else {
            debug!(node_id = self.id, event_type = event.event_type(), "No event callback registered");
            return;
        };

        let _node = NodeContextGuard::with_instance_id(self.id, self.instance_id);
        let span = info_span!(
            spans::DISPATCH_EVENT,
            node_id = self.id,
            event_type = event.event_type(),
            request_id = ?event.request_id().map(RequestId::as_str),
        );
        let _enter = span.enter();
        callback(&EncodedEvent { event, json });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
