//! In-process loopback engine
//!
//! Emulates a relay node without touching the network: messages are
//! "sent" after `relay_delay` and "propagated" after a further
//! `propagation_delay`. Failures and start rejection can be injected for
//! testing host integrations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use delivery_core::{
    ContentTopic, DeliveryEvent, MAX_PAYLOAD_BYTES, MessageHash, NodeConfig, NodeMode,
    OutboundMessage, PubsubTopic, RequestId,
};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::engine::{DeliveryEngine, EngineError, EngineResult, EventEmitter};

/// Default number of non-ephemeral messages retained
pub const DEFAULT_RETENTION: usize = 1024;

/// Behaviour knobs for [`LoopbackEngine`]
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Delay before `message_sent`
    pub relay_delay: Duration,
    /// Delay between `message_sent` and `message_propagated`
    pub propagation_delay: Duration,
    /// Upper bound of random extra delay added to each step
    pub jitter: Duration,
    /// Fail every delivery with this reason
    pub fail_delivery: Option<String>,
    /// Refuse to start with this reason
    pub reject_start: Option<String>,
    /// Non-ephemeral messages kept in the store
    pub retention: usize,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            relay_delay: Duration::from_millis(5),
            propagation_delay: Duration::from_millis(20),
            jitter: Duration::ZERO,
            fail_delivery: None,
            reject_start: None,
            retention: DEFAULT_RETENTION,
        }
    }
}

impl LoopbackOptions {
    pub fn with_delays(mut self, relay: Duration, propagation: Duration) -> Self {
        self.relay_delay = relay;
        self.propagation_delay = propagation;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn failing_delivery(mut self, reason: impl Into<String>) -> Self {
        self.fail_delivery = Some(reason.into());
        self
    }

    pub fn rejecting_start(mut self, reason: impl Into<String>) -> Self {
        self.reject_start = Some(reason.into());
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }
}

/// A message retained by the loopback store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_hash: MessageHash,
    pub pubsub_topic: PubsubTopic,
    pub content_topic: ContentTopic,
    pub payload: Vec<u8>,
    pub timestamp_ns: i64,
}

/// Everything that only exists while the engine runs
struct Session {
    config: NodeConfig,
    events: EventEmitter,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Engine that delivers messages to itself
pub struct LoopbackEngine {
    options: LoopbackOptions,
    running: AtomicBool,
    session: Mutex<Option<Session>>,
    /// Content topic to the shard it was routed to
    topics: DashMap<ContentTopic, PubsubTopic>,
    store: Mutex<VecDeque<StoredMessage>>,
    accepted: AtomicU64,
}

impl LoopbackEngine {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            running: AtomicBool::new(false),
            session: Mutex::new(None),
            topics: DashMap::new(),
            store: Mutex::new(VecDeque::new()),
            accepted: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &LoopbackOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Topics the engine is currently subscribed to, sorted
    pub fn subscribed_topics(&self) -> Vec<ContentTopic> {
        let mut topics: Vec<ContentTopic> = self.topics.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    /// Shard a subscribed topic was routed to
    pub fn route_of(&self, topic: &ContentTopic) -> Option<PubsubTopic> {
        self.topics.get(topic).map(|e| *e.value())
    }

    /// Messages accepted since creation
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Retained messages, oldest first
    pub fn stored_messages(&self) -> Vec<StoredMessage> {
        self.store.lock().iter().cloned().collect()
    }

    fn retain(&self, message: StoredMessage) {
        if self.options.retention == 0 {
            return;
        }
        let mut store = self.store.lock();
        while store.len() >= self.options.retention {
            store.pop_front();
        }
        store.push_back(message);
    }

    fn step_delay(&self, base: Duration) -> Duration {
        if self.options.jitter.is_zero() {
            return base;
        }
        let extra = rand::rng().random_range(0..=self.options.jitter.as_micros() as u64);
        base + Duration::from_micros(extra)
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(LoopbackOptions::default())
    }
}

#[async_trait]
impl DeliveryEngine for LoopbackEngine {
    #[instrument(skip(self, config, events), fields(cluster_id = config.cluster_id(), mode = ?config.mode()))]
    async fn start(&self, config: &NodeConfig, events: EventEmitter) -> EngineResult<()> {
        if let Some(reason) = &self.options.reject_start {
            return Err(EngineError::Rejected(reason.clone()));
        }
        if config.mode() == NodeMode::Edge && config.entry_nodes().is_empty() {
            return Err(EngineError::Rejected(
                "edge mode requires at least one entry node".to_string(),
            ));
        }

        let mut session = self.session.lock();
        if session.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let (shutdown_tx, _) = broadcast::channel(1);
        *session = Some(Session {
            config: config.clone(),
            events,
            shutdown_tx,
            tasks: Vec::new(),
        });
        self.running.store(true, Ordering::SeqCst);

        info!(
            shards = config.shards().len(),
            entry_nodes = config.entry_nodes().len(),
            p2p_tcp_port = config.networking().p2p_tcp_port,
            "Loopback engine started"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> EngineResult<()> {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return Ok(()); // Already stopped
        };
        self.running.store(false, Ordering::SeqCst);

        let _ = session.shutdown_tx.send(());
        for task in session.tasks {
            let _ = task.await;
        }
        self.topics.clear();

        info!("Loopback engine stopped");
        Ok(())
    }

    #[instrument(skip(self), fields(content_topic = %topic))]
    async fn subscribe(&self, topic: &ContentTopic) -> EngineResult<()> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(EngineError::NotRunning)?;
        let route = session.config.pubsub_topic_for(topic);
        self.topics.insert(topic.clone(), route);
        debug!(pubsub_topic = %route, "Subscribed");
        Ok(())
    }

    #[instrument(skip(self), fields(content_topic = %topic))]
    async fn unsubscribe(&self, topic: &ContentTopic) -> EngineResult<()> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        if self.topics.remove(topic).is_none() {
            debug!("Topic was not subscribed");
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(request_id = %request_id, content_topic = %message.content_topic))]
    async fn send(
        &self,
        request_id: &RequestId,
        message: OutboundMessage,
    ) -> EngineResult<MessageHash> {
        if message.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(EngineError::PayloadTooLarge {
                size: message.payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let mut session = self.session.lock();
        let session = session.as_mut().ok_or(EngineError::NotRunning)?;

        let pubsub_topic = session.config.pubsub_topic_for(&message.content_topic);
        let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let message_hash = MessageHash::compute(
            &pubsub_topic,
            &message.payload,
            &message.content_topic,
            timestamp_ns,
        );
        self.accepted.fetch_add(1, Ordering::SeqCst);

        if !message.ephemeral {
            self.retain(StoredMessage {
                message_hash: message_hash.clone(),
                pubsub_topic,
                content_topic: message.content_topic.clone(),
                payload: message.payload,
                timestamp_ns,
            });
        }

        let relay_delay = self.step_delay(self.options.relay_delay);
        let propagation_delay = self.step_delay(self.options.propagation_delay);
        let failure = self.options.fail_delivery.clone();
        let events = session.events.clone();
        let mut shutdown_rx = session.shutdown_tx.subscribe();
        let request_id = request_id.clone();
        let hash = message_hash.clone();

        let task = tokio::spawn(async move {
            let deliver = async {
                tokio::time::sleep(relay_delay).await;
                if let Some(error) = failure {
                    warn!(request_id = %request_id, %error, "Delivery failed");
                    events.emit(DeliveryEvent::MessageError {
                        request_id,
                        message_hash: hash,
                        error,
                    });
                    return;
                }
                events.emit(DeliveryEvent::MessageSent {
                    request_id: request_id.clone(),
                    message_hash: hash.clone(),
                });
                tokio::time::sleep(propagation_delay).await;
                events.emit(DeliveryEvent::MessagePropagated {
                    request_id,
                    message_hash: hash,
                });
            };
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = deliver => {}
            }
        });

        session.tasks.retain(|t| !t.is_finished());
        session.tasks.push(task);

        debug!(message_hash = %message_hash, pubsub_topic = %pubsub_topic, "Message accepted");
        Ok(message_hash)
    }
}
