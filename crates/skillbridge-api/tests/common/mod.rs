//! Common test utilities for API tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use skillbridge_core::{BridgeError, InvocationConfig, Result, SkillTopicTable};
use skillbridge_mqtt::{
    MqttOperationBridge, MqttTransport, PendingOperationRegistry, ProgressReporter,
    StateUpdateError,
};
use skillbridge_schema::SchemaParser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use skillbridge_api::ServerState;

/// In-memory broker: publishes go to the test, subscriptions are recorded.
pub struct MockTransport {
    pub published: mpsc::UnboundedSender<(String, Value)>,
    pub subscribed: Mutex<Vec<String>>,
    pub connected: AtomicBool,
    pub fail_publish: AtomicBool,
}

#[async_trait]
impl MqttTransport for MockTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Broker("not connected".to_string()));
        }
        let value: Value = serde_json::from_slice(&payload)?;
        let _ = self.published.send((topic.to_string(), value));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscribed.lock().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub states: Mutex<Vec<String>>,
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(&self, _path: &str, state: &str) -> std::result::Result<(), StateUpdateError> {
        self.states.lock().push(state.to_string());
        Ok(())
    }
}

pub struct TestContext {
    pub state: ServerState,
    pub transport: Arc<MockTransport>,
    pub registry: Arc<PendingOperationRegistry>,
    pub reporter: Arc<RecordingReporter>,
    pub published: mpsc::UnboundedReceiver<(String, Value)>,
}

/// Create a server state around an in-memory transport.
pub fn create_test_context(skills: SkillTopicTable) -> TestContext {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        published: tx,
        subscribed: Mutex::new(Vec::new()),
        connected: AtomicBool::new(true),
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

    TestContext {
        state: ServerState::new(bridge, Arc::new(skills), InvocationConfig::default()),
        transport,
        registry,
        reporter,
        published: rx,
    }
}

/// Answer the next published command with `responses` on `response_topic`.
pub fn spawn_device(
    registry: Arc<PendingOperationRegistry>,
    mut published: mpsc::UnboundedReceiver<(String, Value)>,
    response_topic: &'static str,
    responses: Vec<Value>,
) -> tokio::task::JoinHandle<(String, Value)> {
    tokio::spawn(async move {
        let (topic, command) = published.recv().await.unwrap();
        for response in responses {
            registry.handle_message(response_topic, &serde_json::to_vec(&response).unwrap());
        }
        (topic, command)
    })
}
