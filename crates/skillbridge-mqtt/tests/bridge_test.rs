//! Bridge invocation tests against an in-memory transport.
//!
//! Covers:
//! - One-way, synchronous and asynchronous contracts
//! - Timeouts and cleanup of the registry and subscriptions
//! - Abandoned invocations and slow progress updates
//! - Schema-driven array packing on the wire
//! - Broker failures

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use skillbridge_core::{BridgeError, ErrorKind, OperationVariable, Result, xs};
use skillbridge_mqtt::{
    Dispatch, InvocationRequest, MqttOperationBridge, MqttTransport, PendingOperationRegistry,
    ProgressReporter, StateUpdateError, states,
};
use skillbridge_schema::SchemaParser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records broker traffic and forwards publishes to the test.
struct MockTransport {
    published: mpsc::UnboundedSender<(String, Value)>,
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    fail_publish: AtomicBool,
}

#[async_trait]
impl MqttTransport for MockTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Broker("connection reset".to_string()));
        }
        let value: Value = serde_json::from_slice(&payload)?;
        let _ = self.published.send((topic.to_string(), value));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscribed.lock().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.unsubscribed.lock().push(topic.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct RecordingReporter {
    states: Mutex<Vec<(String, String)>>,
    /// Hold up the update for this state, after recording it
    delay: Mutex<Option<(String, Duration)>>,
}

impl RecordingReporter {
    fn states(&self) -> Vec<String> {
        self.states.lock().iter().map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(&self, path: &str, state: &str) -> std::result::Result<(), StateUpdateError> {
        self.states.lock().push((path.to_string(), state.to_string()));
        let delay = self.delay.lock().clone();
        if let Some((slow_state, pause)) = delay {
            if slow_state == state {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }
}

struct Harness {
    bridge: Arc<MqttOperationBridge>,
    transport: Arc<MockTransport>,
    registry: Arc<PendingOperationRegistry>,
    reporter: Arc<RecordingReporter>,
    published: mpsc::UnboundedReceiver<(String, Value)>,
}

fn harness() -> Harness {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        published: tx,
        subscribed: Mutex::new(Vec::new()),
        unsubscribed: Mutex::new(Vec::new()),
        fail_publish: AtomicBool::new(false),
    });
    let registry = Arc::new(PendingOperationRegistry::new());
    let reporter = Arc::new(RecordingReporter::default());
    let bridge = Arc::new(MqttOperationBridge::new(
        transport.clone(),
        registry.clone(),
        Arc::new(SchemaParser::new(Duration::from_secs(1))),
        reporter.clone(),
        Duration::from_secs(5),
    ));
    Harness {
        bridge,
        transport,
        registry,
        reporter,
        published: rx,
    }
}

/// Answer the next command with `responses`, in order.
fn respond(
    registry: Arc<PendingOperationRegistry>,
    mut published: mpsc::UnboundedReceiver<(String, Value)>,
    response_topic: &'static str,
    responses: Vec<Value>,
) -> tokio::task::JoinHandle<(Value, Vec<Dispatch>)> {
    tokio::spawn(async move {
        let (_, command) = published.recv().await.unwrap();
        let mut outcomes = Vec::new();
        for response in responses {
            let bytes = serde_json::to_vec(&response).unwrap();
            outcomes.push(registry.handle_message(response_topic, &bytes));
        }
        (command, outcomes)
    })
}

#[tokio::test]
async fn test_one_way_publishes_once_without_waiting() {
    let mut h = harness();
    let request = InvocationRequest::one_way(
        "conveyor/skills/Start/cmd",
        vec![OperationVariable::new("Speed", xs::INT, "3")],
    );

    let outputs = h.bridge.invoke(request).await.unwrap();

    assert!(outputs.is_empty());
    let (topic, payload) = h.published.try_recv().unwrap();
    assert_eq!(topic, "conveyor/skills/Start/cmd");
    assert_eq!(payload["Speed"], json!(3));
    assert!(payload["Uuid"].is_string());
    assert!(h.published.try_recv().is_err());
    assert!(h.transport.subscribed.lock().is_empty());
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_synchronous_waits_for_terminal_state() {
    let h = harness();
    let device = respond(
        h.registry.clone(),
        h.published,
        "scale/skills/Weigh/data",
        vec![
            json!({"State": "RUNNING"}),
            json!({"State": "SUCCESS", "Weight": 2.1}),
        ],
    );

    let outputs = h
        .bridge
        .invoke(InvocationRequest::synchronous(
            "scale/skills/Weigh/cmd",
            "scale/skills/Weigh/data",
            Vec::new(),
        ))
        .await
        .unwrap();

    let (_, outcomes) = device.await.unwrap();
    assert_eq!(outcomes, vec![Dispatch::Progress, Dispatch::Completed]);

    let weight = outputs.iter().find(|v| v.name == "Weight").unwrap();
    assert_eq!(weight.value_type, xs::DOUBLE);
    assert_eq!(weight.value, "2.1");
    assert!(h.registry.is_empty());
    assert_eq!(*h.transport.subscribed.lock(), vec!["scale/skills/Weigh/data"]);
    assert_eq!(*h.transport.unsubscribed.lock(), vec!["scale/skills/Weigh/data"]);
    assert!(h.reporter.states().is_empty());
}

#[tokio::test]
async fn test_timeout_cleans_up() {
    let h = harness();
    let request = InvocationRequest::synchronous("robot/cmd", "robot/data", Vec::new())
        .with_timeout(Some(Duration::from_millis(50)));

    let err = h.bridge.invoke(request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(h.registry.is_empty());
    assert_eq!(h.bridge.active_subscriptions().await, 0);
    assert_eq!(*h.transport.unsubscribed.lock(), vec!["robot/data"]);

    // a late answer finds nobody waiting
    let late = h.registry.handle_message("robot/data", br#"{"State":"SUCCESS"}"#);
    assert_eq!(late, Dispatch::Dropped);
}

#[tokio::test]
async fn test_asynchronous_mirrors_progress() {
    let h = harness();
    let device = respond(
        h.registry.clone(),
        h.published,
        "mill/skills/Drill/data",
        vec![
            json!({"State": "EXECUTING"}),
            json!({"State": "COMPLETED", "Depth": 12}),
        ],
    );

    let outputs = h
        .bridge
        .invoke(InvocationRequest::asynchronous(
            "mill/skills/Drill/cmd",
            "mill/skills/Drill/data",
            "/submodels/abc/submodel-elements/Drill.State/$value",
            Vec::new(),
        ))
        .await
        .unwrap();
    device.await.unwrap();

    assert_eq!(
        h.reporter.states(),
        vec![states::RUNNING, "EXECUTING", states::IDLE]
    );
    assert!(
        h.reporter
            .states
            .lock()
            .iter()
            .all(|(path, _)| path == "/submodels/abc/submodel-elements/Drill.State/$value")
    );
    let depth = outputs.iter().find(|v| v.name == "Depth").unwrap();
    assert_eq!(depth.value_type, xs::INT);
}

#[tokio::test]
async fn test_asynchronous_timeout_sets_timeout_state() {
    let h = harness();
    let request =
        InvocationRequest::asynchronous("mill/cmd", "mill/data", "/p", Vec::new())
            .with_timeout(Some(Duration::from_millis(50)));

    let err = h.bridge.invoke(request).await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(h.reporter.states(), vec![states::RUNNING, states::TIMEOUT]);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_terminal_failure_is_pushed_and_returned() {
    let h = harness();
    let device = respond(
        h.registry.clone(),
        h.published,
        "mill/data",
        vec![json!({"State": "FAILURE", "Reason": "jammed"})],
    );

    let outputs = h
        .bridge
        .invoke(InvocationRequest::asynchronous("mill/cmd", "mill/data", "/p", Vec::new()))
        .await
        .unwrap();
    device.await.unwrap();

    assert_eq!(h.reporter.states(), vec![states::RUNNING, "FAILURE"]);
    let reason = outputs.iter().find(|v| v.name == "Reason").unwrap();
    assert_eq!(reason.value, "jammed");
}

#[tokio::test]
async fn test_schema_packs_position_array() {
    let dir = tempfile::tempdir().unwrap();
    let schema_path = dir.path().join("move.json");
    std::fs::write(
        &schema_path,
        serde_json::to_vec(&json!({
            "type": "object",
            "properties": {
                "Position": {
                    "type": "array",
                    "minItems": 2,
                    "prefixItems": [
                        {"title": "X", "type": "number"},
                        {"title": "Y", "type": "number"},
                        {"title": "Theta", "type": "number"}
                    ]
                }
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let mut h = harness();
    let request = InvocationRequest::one_way(
        "robot/skills/Move/cmd",
        vec![
            OperationVariable::new("X", xs::DOUBLE, "1.0"),
            OperationVariable::new("Y", xs::DOUBLE, "2.0"),
            OperationVariable::string("Comment", "ignored"),
        ],
    )
    .with_schemas(Some(schema_path.to_string_lossy().into_owned()), None);

    h.bridge.invoke(request).await.unwrap();

    let (_, payload) = h.published.try_recv().unwrap();
    assert_eq!(payload["Position"], json!([1.0, 2.0]));
    let keys: Vec<&String> = payload.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["Position", "Uuid"]);
}

#[tokio::test]
async fn test_unreachable_schema_falls_back_to_pass_through() {
    let mut h = harness();
    let request = InvocationRequest::one_way(
        "robot/cmd",
        vec![OperationVariable::new("X", xs::DOUBLE, "1.5")],
    )
    .with_schemas(Some("/nonexistent/schema.json".to_string()), None);

    h.bridge.invoke(request).await.unwrap();

    let (_, payload) = h.published.try_recv().unwrap();
    assert_eq!(payload["X"], json!(1.5));
}

#[tokio::test]
async fn test_publish_failure_is_broker_error() {
    let h = harness();
    h.transport.fail_publish.store(true, Ordering::SeqCst);

    let err = h
        .bridge
        .invoke(InvocationRequest::asynchronous("a/cmd", "a/data", "/p", Vec::new()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Broker);
    assert!(h.registry.is_empty());
    assert_eq!(h.bridge.active_subscriptions().await, 0);
    assert_eq!(h.reporter.states(), vec![states::RUNNING, states::ERROR]);
}

#[tokio::test]
async fn test_concurrent_invocations_share_subscription() {
    let h = harness();
    let bridge = h.bridge.clone();
    let registry = h.registry.clone();
    let mut published = h.published;

    let first = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            bridge
                .invoke(InvocationRequest::synchronous("cell/cmd", "cell/data", Vec::new()))
                .await
        }
    });
    let second = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            bridge
                .invoke(InvocationRequest::synchronous("cell/cmd", "cell/data", Vec::new()))
                .await
        }
    });

    // both are subscribed once both commands are out; answer each by correlation id
    let mut commands = Vec::new();
    for _ in 0..2 {
        commands.push(published.recv().await.unwrap().1);
    }
    for command in commands {
        let uuid = command["Uuid"].as_str().unwrap().to_string();
        let reply = json!({"Uuid": uuid, "State": "SUCCESS", "Tag": uuid});
        registry.handle_message("cell/data", &serde_json::to_vec(&reply).unwrap());
    }

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    let tag = |outputs: &[OperationVariable]| {
        outputs.iter().find(|v| v.name == "Tag").unwrap().value.clone()
    };
    assert_ne!(tag(&first), tag(&second));
    assert_eq!(h.transport.subscribed.lock().len(), 1);
    assert_eq!(h.transport.unsubscribed.lock().len(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_abandoned_invocation_releases_subscription_and_reports_error() {
    let mut h = harness();
    let task = tokio::spawn({
        let bridge = h.bridge.clone();
        async move {
            bridge
                .invoke(InvocationRequest::asynchronous(
                    "oven/cmd",
                    "oven/data",
                    "/p",
                    Vec::new(),
                ))
                .await
        }
    });

    // the command is out, so the invocation is subscribed and waiting
    h.published.recv().await.unwrap();
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    // release and the final progress update run on background tasks
    for _ in 0..100 {
        if h.bridge.active_subscriptions().await == 0 && h.reporter.states().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.bridge.active_subscriptions().await, 0);
    assert_eq!(*h.transport.unsubscribed.lock(), vec!["oven/data"]);
    assert!(h.registry.is_empty());
    assert_eq!(h.reporter.states(), vec![states::RUNNING, states::ERROR]);

    // the next invocation on the topic subscribes again and completes
    let device = respond(
        h.registry.clone(),
        h.published,
        "oven/data",
        vec![json!({"State": "SUCCESS"})],
    );
    h.bridge
        .invoke(InvocationRequest::synchronous("oven/cmd", "oven/data", Vec::new()))
        .await
        .unwrap();
    device.await.unwrap();
    assert_eq!(h.transport.subscribed.lock().len(), 2);
    assert_eq!(h.bridge.active_subscriptions().await, 0);
}

#[tokio::test]
async fn test_slow_progress_update_does_not_extend_timeout() {
    let h = harness();
    *h.reporter.delay.lock() = Some(("EXECUTING".to_string(), Duration::from_millis(500)));
    let registry = h.registry.clone();
    let mut published = h.published;
    let device = tokio::spawn(async move {
        published.recv().await.unwrap();
        registry.handle_message("kiln/data", br#"{"State":"EXECUTING"}"#);
        tokio::time::sleep(Duration::from_millis(200)).await;
        registry.handle_message("kiln/data", br#"{"State":"SUCCESS"}"#)
    });

    let err = h
        .bridge
        .invoke(
            InvocationRequest::asynchronous("kiln/cmd", "kiln/data", "/p", Vec::new())
                .with_timeout(Some(Duration::from_millis(100))),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(
        h.reporter.states(),
        vec![states::RUNNING, "EXECUTING", states::TIMEOUT]
    );
    // the success arrived after the deadline and found nobody waiting
    assert_eq!(device.await.unwrap(), Dispatch::Dropped);
}
