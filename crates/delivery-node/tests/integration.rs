//! Integration tests for the node context
//!
//! These drive a [`Context`] the way a host does: commands with one-shot
//! completions, a standing event callback, and outcomes arriving on runtime
//! threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use delivery_core::{
    ContentTopic, DeliveryError, DeliveryEvent, MessageHash, NodeConfig, OutboundMessage,
    RequestId, SendReceipt,
};
use delivery_node::{
    ABANDONED_ON_STOP, CommandOutcome, Completion, Context, DeliveryEngine, EncodedEvent,
    EngineError, EngineResult, EventEmitter, LoopbackEngine, LoopbackOptions, NodeState,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const CONFIG: &str = r#"{"logLevel":"DEBUG","mode":"Core","clusterId":42,"numShards":8,"entryNodes":[],"networkingConfig":{"listenIpv4":"0.0.0.0","p2pTcpPort":60000,"discv5UdpPort":9000}}"#;
const TOPIC: &str = "/example/1/chat/proto";
const HELLO: &str = r#"{"contentTopic":"/example/1/chat/proto","payload":"SGVsbG8=","ephemeral":false}"#;
const WAIT: Duration = Duration::from_secs(5);

fn node(options: LoopbackOptions) -> (Context, Arc<LoopbackEngine>) {
    let engine = Arc::new(LoopbackEngine::new(options));
    let ctx = Context::create(CONFIG, engine.clone(), Handle::current()).unwrap();
    (ctx, engine)
}

/// Issue a command and wait for its single outcome
async fn run(command: impl FnOnce(Completion) -> delivery_core::DeliveryResult<()>) -> CommandOutcome {
    let (tx, rx) = oneshot::channel();
    let _ = command(Completion::new("test", move |outcome| {
        let _ = tx.send(outcome);
    }));
    timeout(WAIT, rx).await.unwrap().unwrap()
}

/// Install an event callback feeding a channel
fn watch(ctx: &Context) -> mpsc::UnboundedReceiver<EncodedEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.set_event_callback(Some(Arc::new(move |event: &EncodedEvent| {
        let _ = tx.send(event.clone());
    })))
    .unwrap();
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<EncodedEvent>) -> EncodedEvent {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

fn receipt(outcome: CommandOutcome) -> SendReceipt {
    let body = outcome.unwrap().unwrap();
    serde_json::from_str(&body).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_destroy_without_start() {
    let (ctx, engine) = node(LoopbackOptions::default());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    ctx.set_event_callback(Some(Arc::new(move |_: &EncodedEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    })))
    .unwrap();

    run(|c| ctx.destroy(c)).await.unwrap();

    assert_eq!(ctx.state(), NodeState::Destroyed);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(!engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_destroy_is_invalid_handle() {
    let (ctx, _) = node(LoopbackOptions::default());
    run(|c| ctx.destroy(c)).await.unwrap();
    assert_eq!(
        run(|c| ctx.destroy(c)).await,
        Err(DeliveryError::InvalidHandle)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end() {
    let (ctx, engine) = node(LoopbackOptions::default());
    let mut events = watch(&ctx);

    run(|c| ctx.start(c)).await.unwrap();
    run(|c| ctx.subscribe(TOPIC, c)).await.unwrap();

    let receipt = receipt(run(|c| ctx.send(HELLO, c)).await);
    assert!(receipt.message_hash.as_str().starts_with("0x"));

    let sent = next_event(&mut events).await;
    assert_eq!(
        sent.event,
        DeliveryEvent::MessageSent {
            request_id: receipt.request_id.clone(),
            message_hash: receipt.message_hash.clone(),
        }
    );
    let propagated = next_event(&mut events).await;
    assert_eq!(propagated.event.event_type(), "message_propagated");
    assert_eq!(propagated.event.request_id(), Some(&receipt.request_id));
    assert_eq!(
        DeliveryEvent::from_json(&propagated.json).unwrap(),
        propagated.event
    );
    assert_eq!(ctx.pending_requests(), 0);

    let stored = engine.stored_messages();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].payload, b"Hello");
    assert_eq!(stored[0].pubsub_topic.cluster_id, 42);

    run(|c| ctx.unsubscribe(TOPIC, c)).await.unwrap();
    run(|c| ctx.stop(c)).await.unwrap();
    run(|c| ctx.destroy(c)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_delivery_is_terminal() {
    let (ctx, _) = node(LoopbackOptions::default().failing_delivery("no peers"));
    let mut events = watch(&ctx);
    run(|c| ctx.start(c)).await.unwrap();

    let receipt = receipt(run(|c| ctx.send(HELLO, c)).await);
    let failed = next_event(&mut events).await;
    assert_eq!(
        failed.event,
        DeliveryEvent::MessageError {
            request_id: receipt.request_id,
            message_hash: receipt.message_hash,
            error: "no peers".to_string(),
        }
    );
    assert!(failed.json.contains(r#""error":"no peers""#));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscribe_idempotent() {
    let (ctx, engine) = node(LoopbackOptions::default());
    run(|c| ctx.start(c)).await.unwrap();

    run(|c| ctx.subscribe(TOPIC, c)).await.unwrap();
    run(|c| ctx.subscribe(TOPIC, c)).await.unwrap();
    assert_eq!(ctx.subscriptions().len(), 1);
    assert_eq!(engine.subscribed_topics().len(), 1);

    run(|c| ctx.unsubscribe(TOPIC, c)).await.unwrap();
    assert!(ctx.subscriptions().is_empty());
    assert!(engine.subscribed_topics().is_empty());

    // not a member any more
    run(|c| ctx.unsubscribe(TOPIC, c)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commands_outside_running() {
    let (ctx, engine) = node(LoopbackOptions::default());

    let before = run(|c| ctx.subscribe(TOPIC, c)).await.unwrap_err();
    assert!(matches!(before, DeliveryError::InvalidState { state: "created", .. }));
    let before = run(|c| ctx.send(HELLO, c)).await.unwrap_err();
    assert!(matches!(before, DeliveryError::InvalidState { state: "created", .. }));
    assert!(matches!(
        run(|c| ctx.stop(c)).await,
        Err(DeliveryError::InvalidState { command: "stop", .. })
    ));

    run(|c| ctx.start(c)).await.unwrap();
    assert!(matches!(
        run(|c| ctx.start(c)).await,
        Err(DeliveryError::InvalidState { command: "start", state: "running" })
    ));
    run(|c| ctx.stop(c)).await.unwrap();

    let after = run(|c| ctx.send(HELLO, c)).await.unwrap_err();
    assert!(matches!(after, DeliveryError::InvalidState { state: "stopped", .. }));

    run(|c| ctx.destroy(c)).await.unwrap();
    assert_eq!(run(|c| ctx.subscribe(TOPIC, c)).await, Err(DeliveryError::InvalidHandle));
    assert_eq!(run(|c| ctx.send(HELLO, c)).await, Err(DeliveryError::InvalidHandle));

    assert_eq!(engine.accepted_count(), 0);
    assert!(engine.subscribed_topics().is_empty());
    assert!(ctx.subscriptions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_messages() {
    let (ctx, _) = node(LoopbackOptions::default());
    run(|c| ctx.start(c)).await.unwrap();

    assert_eq!(
        run(|c| ctx.send(r#"{"payload":"SGVsbG8="}"#, c)).await,
        Err(DeliveryError::MissingField("contentTopic"))
    );
    assert!(matches!(
        run(|c| ctx.send(r#"{"contentTopic":"/a/1/b/c","payload":"%%%"}"#, c)).await,
        Err(DeliveryError::InvalidBase64(_))
    ));
    assert!(matches!(
        run(|c| ctx.send("{", c)).await,
        Err(DeliveryError::Json(_))
    ));
    assert_eq!(ctx.pending_requests(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_abandons_pending_sends() {
    let slow = LoopbackOptions::default().with_delays(Duration::from_secs(60), Duration::from_secs(60));
    let (ctx, _) = node(slow);
    let mut events = watch(&ctx);
    run(|c| ctx.start(c)).await.unwrap();

    let receipt = receipt(run(|c| ctx.send(HELLO, c)).await);
    assert!(ctx.is_pending(&receipt.request_id));

    run(|c| ctx.stop(c)).await.unwrap();
    let abandoned = next_event(&mut events).await;
    assert_eq!(
        abandoned.event,
        DeliveryEvent::MessageError {
            request_id: receipt.request_id,
            message_hash: receipt.message_hash,
            error: ABANDONED_ON_STOP.to_string(),
        }
    );
    assert_eq!(ctx.pending_requests(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replaced_callback_gets_later_events() {
    let (ctx, _) = node(LoopbackOptions::default().with_delays(
        Duration::from_millis(5),
        Duration::from_millis(300),
    ));
    let mut first = watch(&ctx);
    run(|c| ctx.start(c)).await.unwrap();
    receipt(run(|c| ctx.send(HELLO, c)).await);

    let sent = next_event(&mut first).await;
    assert_eq!(sent.event.event_type(), "message_sent");

    let mut second = watch(&ctx);
    let propagated = next_event(&mut second).await;
    assert_eq!(propagated.event.event_type(), "message_propagated");
    assert!(first.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_sends_correlate() {
    let (ctx, _) = node(LoopbackOptions::default().with_jitter(Duration::from_millis(10)));
    let mut events = watch(&ctx);
    run(|c| ctx.start(c)).await.unwrap();

    const SENDS: usize = 20;
    let mut ids = std::collections::HashSet::new();
    for _ in 0..SENDS {
        ids.insert(receipt(run(|c| ctx.send(HELLO, c)).await).request_id);
    }
    assert_eq!(ids.len(), SENDS);

    let mut terminal = std::collections::HashSet::new();
    while terminal.len() < SENDS {
        let event = next_event(&mut events).await;
        let id = event.event.request_id().unwrap().clone();
        assert!(ids.contains(&id));
        if event.event.is_terminal() {
            assert!(terminal.insert(id), "request resolved twice");
        }
    }
    assert_eq!(ctx.pending_requests(), 0);
}

/// Engine whose start and subscribe take a while, for destroy-during-flight
struct SlowEngine {
    inner: LoopbackEngine,
    delay: Duration,
}

#[async_trait]
impl DeliveryEngine for SlowEngine {
    async fn start(&self, config: &NodeConfig, events: EventEmitter) -> EngineResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.start(config, events).await
    }

    async fn stop(&self) -> EngineResult<()> {
        self.inner.stop().await
    }

    async fn subscribe(&self, topic: &ContentTopic) -> EngineResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.subscribe(topic).await
    }

    async fn unsubscribe(&self, topic: &ContentTopic) -> EngineResult<()> {
        self.inner.unsubscribe(topic).await
    }

    async fn send(&self, request_id: &RequestId, message: OutboundMessage) -> EngineResult<MessageHash> {
        self.inner.send(request_id, message).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_destroy_during_flight() {
    let engine = Arc::new(SlowEngine {
        inner: LoopbackEngine::default(),
        delay: Duration::from_secs(30),
    });
    let ctx = Context::create(CONFIG, engine, Handle::current()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut outcomes) = mpsc::unbounded_channel::<(&'static str, CommandOutcome)>();

    let completion = |name: &'static str| {
        let calls = calls.clone();
        let tx = tx.clone();
        Completion::new(name, move |outcome| {
            calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send((name, outcome));
        })
    };

    ctx.start(completion("start")).unwrap();
    assert_eq!(ctx.state(), NodeState::Starting);
    // a transitional node refuses everything but destroy
    assert!(ctx.stop(completion("stop")).is_err());
    ctx.destroy(completion("destroy")).unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        let (name, outcome) = timeout(WAIT, outcomes.recv()).await.unwrap().unwrap();
        match name {
            "start" => assert_eq!(outcome, Err(DeliveryError::Cancelled)),
            "stop" => assert!(matches!(outcome, Err(DeliveryError::InvalidState { .. }))),
            "destroy" => assert_eq!(outcome, Ok(None)),
            other => panic!("unexpected completion {other}"),
        }
        order.push(name);
    }
    assert_eq!(order.last(), Some(&"destroy"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(outcomes.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_edge_mode_without_entry_nodes_fails() {
    let engine = Arc::new(LoopbackEngine::default());
    let ctx = Context::create(
        r#"{"mode":"Edge","clusterId":1,"shards":[0]}"#,
        engine,
        Handle::current(),
    )
    .unwrap();

    assert!(matches!(run(|c| ctx.start(c)).await, Err(DeliveryError::Engine(_))));
    assert_eq!(ctx.state(), NodeState::Failed);

    // a failed node can be stopped, leaving it restartable
    run(|c| ctx.stop(c)).await.unwrap();
    assert_eq!(ctx.state(), NodeState::Stopped);
    run(|c| ctx.destroy(c)).await.unwrap();
}

/// Loopback engine with injectable failures and a slow send
#[derive(Default)]
struct FaultyEngine {
    inner: LoopbackEngine,
    send_delay: Duration,
    fail_subscribe: bool,
    fail_send: bool,
    fail_next_stop: AtomicBool,
    emitter: Mutex<Option<EventEmitter>>,
}

impl FaultyEngine {
    fn quiet() -> LoopbackEngine {
        LoopbackEngine::new(
            LoopbackOptions::default().with_delays(Duration::from_secs(60), Duration::from_secs(60)),
        )
    }
}

#[async_trait]
impl DeliveryEngine for FaultyEngine {
    async fn start(&self, config: &NodeConfig, events: EventEmitter) -> EngineResult<()> {
        *self.emitter.lock() = Some(events.clone());
        self.inner.start(config, events).await
    }

    async fn stop(&self) -> EngineResult<()> {
        if self.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Network("peer manager did not shut down".to_string()));
        }
        self.inner.stop().await
    }

    async fn subscribe(&self, topic: &ContentTopic) -> EngineResult<()> {
        if self.fail_subscribe {
            return Err(EngineError::Rejected("filter service unavailable".to_string()));
        }
        self.inner.subscribe(topic).await
    }

    async fn unsubscribe(&self, topic: &ContentTopic) -> EngineResult<()> {
        self.inner.unsubscribe(topic).await
    }

    async fn send(&self, request_id: &RequestId, message: OutboundMessage) -> EngineResult<MessageHash> {
        if self.fail_send {
            return Err(EngineError::Network("no relay peers".to_string()));
        }
        let hash = self.inner.send(request_id, message).await?;
        tokio::time::sleep(self.send_delay).await;
        Ok(hash)
    }
}

fn faulty(engine: FaultyEngine) -> (Context, Arc<FaultyEngine>) {
    let engine = Arc::new(engine);
    let ctx = Context::create(CONFIG, engine.clone(), Handle::current()).unwrap();
    (ctx, engine)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_accepted_during_stop_is_abandoned() {
    let (ctx, _) = faulty(FaultyEngine {
        inner: FaultyEngine::quiet(),
        send_delay: Duration::from_millis(200),
        ..FaultyEngine::default()
    });
    let mut events = watch(&ctx);
    run(|c| ctx.start(c)).await.unwrap();

    let (tx, rx) = oneshot::channel();
    ctx.send(
        HELLO,
        Completion::new("send", move |outcome| {
            let _ = tx.send(outcome);
        }),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    run(|c| ctx.stop(c)).await.unwrap();
    assert_eq!(ctx.state(), NodeState::Stopped);

    let receipt = receipt(timeout(WAIT, rx).await.unwrap().unwrap());
    let abandoned = next_event(&mut events).await;
    assert_eq!(
        abandoned.event,
        DeliveryEvent::MessageError {
            request_id: receipt.request_id,
            message_hash: receipt.message_hash,
            error: ABANDONED_ON_STOP.to_string(),
        }
    );
    assert_eq!(ctx.pending_requests(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_subscribe_leaves_set_unchanged() {
    let (ctx, engine) = faulty(FaultyEngine {
        fail_subscribe: true,
        ..FaultyEngine::default()
    });
    run(|c| ctx.start(c)).await.unwrap();

    let err = run(|c| ctx.subscribe(TOPIC, c)).await.unwrap_err();
    assert_eq!(
        err,
        DeliveryError::Engine("rejected: filter service unavailable".to_string())
    );
    assert!(ctx.subscriptions().is_empty());
    assert!(engine.inner.subscribed_topics().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refused_send_leaves_nothing_pending() {
    let (ctx, _) = faulty(FaultyEngine {
        fail_send: true,
        ..FaultyEngine::default()
    });
    let mut events = watch(&ctx);
    run(|c| ctx.start(c)).await.unwrap();

    assert!(matches!(
        run(|c| ctx.send(HELLO, c)).await,
        Err(DeliveryError::Engine(_))
    ));
    assert_eq!(ctx.pending_requests(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_events_reach_host_verbatim() {
    let (ctx, engine) = faulty(FaultyEngine::default());
    let mut events = watch(&ctx);
    run(|c| ctx.start(c)).await.unwrap();

    let raw = r#"{"eventType":"connection_change","peerId":"16Uiu2","connected":true,"peers":3}"#;
    let emitter = engine.emitter.lock().clone().unwrap();
    assert!(emitter.emit(DeliveryEvent::from_json(raw).unwrap()));

    let received = next_event(&mut events).await;
    assert_eq!(received.event.event_type(), "connection_change");
    assert_eq!(
        serde_json::from_str::<Value>(&received.json).unwrap(),
        serde_json::from_str::<Value>(raw).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_after_failed_stop() {
    let (ctx, engine) = faulty(FaultyEngine::default());
    run(|c| ctx.start(c)).await.unwrap();

    engine.fail_next_stop.store(true, Ordering::SeqCst);
    assert!(matches!(run(|c| ctx.stop(c)).await, Err(DeliveryError::Engine(_))));
    assert_eq!(ctx.state(), NodeState::Failed);

    run(|c| ctx.stop(c)).await.unwrap();
    assert_eq!(ctx.state(), NodeState::Stopped);
    run(|c| ctx.start(c)).await.unwrap();
    assert_eq!(ctx.state(), NodeState::Running);
}
