//! End-to-end Operation invocation over MQTT.

use serde_json::Value;
use skillbridge_core::{ArrayMappingsOverride, BridgeError, OperationVariable, Result};
use skillbridge_schema::{SchemaParser, SchemaStructure};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::{
    CommandMessage, MessageLayout, build_response_variables, compose_command,
};
use crate::pending::{PendingHandle, PendingOperationRegistry, extract_state, is_success_state};
use crate::state::{ProgressReporter, states};
use crate::transport::MqttTransport;

/// Invocation contract of a skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationMode {
    /// Publish and return immediately
    OneWay,
    /// Publish and wait for a terminal response
    Synchronous,
    /// Wait like `Synchronous` and mirror progress to the shell server
    Asynchronous { state_update_path: String },
}

/// One invocation as resolved by the HTTP layer.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub command_topic: String,
    pub response_topic: Option<String>,
    pub mode: InvocationMode,
    pub input_schema: Option<String>,
    pub output_schema: Option<String>,
    pub array_override: Option<ArrayMappingsOverride>,
    /// Overrides the bridge's default wait
    pub timeout: Option<Duration>,
    pub variables: Vec<OperationVariable>,
}

impl InvocationRequest {
    pub fn one_way(command_topic: impl Into<String>, variables: Vec<OperationVariable>) -> Self {
        Self {
            command_topic: command_topic.into(),
            response_topic: None,
            mode: InvocationMode::OneWay,
            input_schema: None,
            output_schema: None,
            array_override: None,
            timeout: None,
            variables,
        }
    }

    pub fn synchronous(
        command_topic: impl Into<String>,
        response_topic: impl Into<String>,
        variables: Vec<OperationVariable>,
    ) -> Self {
        Self {
            response_topic: Some(response_topic.into()),
            mode: InvocationMode::Synchronous,
            ..Self::one_way(command_topic, variables)
        }
    }

    pub fn asynchronous(
        command_topic: impl Into<String>,
        response_topic: impl Into<String>,
        state_update_path: impl Into<String>,
        variables: Vec<OperationVariable>,
    ) -> Self {
        Self {
            mode: InvocationMode::Asynchronous {
                state_update_path: state_update_path.into(),
            },
            ..Self::synchronous(command_topic, response_topic, variables)
        }
    }

    pub fn with_schemas(mut self, input: Option<String>, output: Option<String>) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }

    pub fn with_array_override(mut self, overrides: Option<ArrayMappingsOverride>) -> Self {
        self.array_override = overrides;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn state_update_path(&self) -> Option<&str> {
        match &self.mode {
            InvocationMode::Asynchronous { state_update_path } => Some(state_update_path),
            _ => None,
        }
    }
}

/// Bridges blocking Operation calls onto publish/subscribe.
///
/// One instance owns the shared transport and registry for the process.
pub struct MqttOperationBridge {
    transport: Arc<dyn MqttTransport>,
    registry: Arc<PendingOperationRegistry>,
    schemas: Arc<SchemaParser>,
    progress: Arc<dyn ProgressReporter>,
    default_timeout: Duration,
    /// Response topic -> number of invocations waiting on it
    subscriptions: Arc<Mutex<HashMap<String, usize>>>,
}

impl MqttOperationBridge {
    pub fn new(
        transport: Arc<dyn MqttTransport>,
        registry: Arc<PendingOperationRegistry>,
        schemas: Arc<SchemaParser>,
        progress: Arc<dyn ProgressReporter>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            schemas,
            progress,
            default_timeout,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<PendingOperationRegistry> {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Number of response topics currently subscribed.
    pub async fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Compose the command payload for one invocation.
    ///
    /// An explicit array override wins over the input schema. A schema that
    /// cannot be loaded degrades to pass-through.
    pub async fn build_command_message(
        &self,
        correlation_id: &str,
        variables: &[OperationVariable],
        input_schema: Option<&str>,
        array_override: Option<&ArrayMappingsOverride>,
    ) -> CommandMessage {
        let structure = match (array_override, input_schema) {
            (None, Some(reference)) => self.load_structure(reference).await,
            _ => None,
        };

        let layout = match (array_override, structure.as_deref()) {
            (Some(overrides), _) => MessageLayout::Override(overrides),
            (None, Some(structure)) => MessageLayout::Schema(structure),
            (None, None) => MessageLayout::PassThrough,
        };

        let message = compose_command(correlation_id, variables, layout);
        for warning in &message.warnings {
            warn!("Command {}: {}", correlation_id, warning);
        }
        message
    }

    async fn load_structure(&self, reference: &str) -> Option<Arc<SchemaStructure>> {
        match self.schemas.extract_structure(reference).await {
            Ok(structure) => Some(structure),
            Err(e) => {
                warn!("Schema {} unavailable, passing values through: {}", reference, e);
                None
            }
        }
    }

    /// Run one invocation and translate the terminal response.
    ///
    /// One-way invocations return an empty output list right after publishing.
    /// A terminal failure state reported by the device is not an error; its
    /// payload is returned like any other result.
    ///
    /// Dropping the returned future releases the response subscription and,
    /// for asynchronous skills, pushes `ERROR` to the progress property.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<Vec<OperationVariable>> {
        let correlation_id = Uuid::new_v4().to_string();
        let message = self
            .build_command_message(
                &correlation_id,
                &request.variables,
                request.input_schema.as_deref(),
                request.array_override.as_ref(),
            )
            .await;
        let payload = message.to_bytes();

        if request.mode == InvocationMode::OneWay {
            self.transport.publish(&request.command_topic, payload).await?;
            info!(
                "Published one-way command {} to {}",
                correlation_id, request.command_topic
            );
            return Ok(Vec::new());
        }

        let response_topic = request.response_topic.clone().ok_or_else(|| {
            BridgeError::Validation(format!(
                "No response topic for command topic {}",
                request.command_topic
            ))
        })?;
        let state_path = request.state_update_path().map(str::to_string);
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let handle = self
            .registry
            .register(&correlation_id, &response_topic, state_path.clone())?;
        let registration = scopeguard::guard(
            (self.registry.clone(), correlation_id.clone(), response_topic.clone()),
            |(registry, id, topic)| {
                registry.unregister(&id, &topic);
            },
        );

        let progress = state_path.map(|path| ProgressForwarder::new(self.progress.clone(), path));
        if let Some(progress) = &progress {
            progress.report_now(states::RUNNING).await;
        }

        let subscription = match self.acquire_subscription(&response_topic).await {
            Ok(lease) => lease,
            Err(e) => {
                finish_progress(progress, states::ERROR).await;
                return Err(e);
            }
        };

        info!(
            "Invoking {} -> {} (correlation {}, timeout {:?})",
            request.command_topic, response_topic, correlation_id, timeout
        );
        if let Err(e) = self.transport.publish(&request.command_topic, payload).await {
            subscription.release().await;
            finish_progress(progress, states::ERROR).await;
            return Err(e);
        }

        let outcome = await_terminal(handle, progress.as_ref(), timeout).await;
        drop(registration);
        subscription.release().await;

        match outcome {
            Ok(response) => {
                let state = extract_state(&response);
                let final_state = match state.as_deref() {
                    Some(s) if !is_success_state(s) => s,
                    _ => states::IDLE,
                };
                finish_progress(progress, final_state).await;

                let output = match request.output_schema.as_deref() {
                    Some(reference) => self.load_structure(reference).await,
                    None => None,
                };
                let outputs = build_response_variables(&response, output.as_deref());
                info!(
                    "Invocation {} finished with {} ({} outputs)",
                    correlation_id,
                    state.as_deref().unwrap_or("no state"),
                    outputs.len()
                );
                Ok(outputs)
            }
            Err(e) => {
                let state = if e.is_timeout() { states::TIMEOUT } else { states::ERROR };
                finish_progress(progress, state).await;
                warn!("Invocation {} failed: {}", correlation_id, e);
                Err(e)
            }
        }
    }

    async fn acquire_subscription(&self, topic: &str) -> Result<SubscriptionLease> {
        let mut subscriptions = self.subscriptions.lock().await;
        match subscriptions.get_mut(topic) {
            Some(count) => *count += 1,
            None => {
                self.transport.subscribe(topic).await?;
                subscriptions.insert(topic.to_string(), 1);
            }
        }
        Ok(SubscriptionLease {
            topic: topic.to_string(),
            subscriptions: self.subscriptions.clone(),
            transport: self.transport.clone(),
            released: false,
        })
    }
}

/// Wait for the terminal payload, forwarding progress states meanwhile.
async fn await_terminal(
    handle: PendingHandle,
    progress_out: Option<&ProgressForwarder>,
    timeout: Duration,
) -> Result<Value> {
    let PendingHandle {
        response_topic,
        mut completion,
        mut progress,
        ..
    } = handle;
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            Some(state) = progress.recv() => {
                debug!("Progress on {}: {}", response_topic, state);
                if let Some(out) = progress_out {
                    out.push(&state);
                }
            }
            result = &mut completion => {
                return result.map_err(|_| {
                    BridgeError::Broker(format!(
                        "Pending operation on {} was dropped before completion",
                        response_topic
                    ))
                });
            }
            _ = &mut deadline => {
                return Err(BridgeError::Timeout {
                    topic: response_topic,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
    }
}

async fn finish_progress(progress: Option<ProgressForwarder>, state: &str) {
    if let Some(progress) = progress {
        progress.finish(state).await;
    }
}

async fn release_subscription(
    subscriptions: &Mutex<HashMap<String, usize>>,
    transport: &dyn MqttTransport,
    topic: &str,
) {
    let mut subscriptions = subscriptions.lock().await;
    match subscriptions.get_mut(topic) {
        Some(count) if *count > 1 => *count -= 1,
        Some(_) => {
            subscriptions.remove(topic);
            if let Err(e) = transport.unsubscribe(topic).await {
                warn!("Failed to unsubscribe from {}: {}", topic, e);
            }
        }
        None => {}
    }
}

/// One invocation's share of a response-topic subscription.
///
/// Released explicitly on every completed path; a lease dropped unreleased
/// hands the release to a background task.
struct SubscriptionLease {
    topic: String,
    subscriptions: Arc<Mutex<HashMap<String, usize>>>,
    transport: Arc<dyn MqttTransport>,
    released: bool,
}

impl SubscriptionLease {
    async fn release(mut self) {
        self.released = true;
        release_subscription(&self.subscriptions, self.transport.as_ref(), &self.topic).await;
    }
}

impl Drop for SubscriptionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let topic = std::mem::take(&mut self.topic);
        let subscriptions = self.subscriptions.clone();
        let transport = self.transport.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Invocation on {} abandoned, releasing subscription", topic);
                runtime.spawn(async move {
                    release_subscription(&subscriptions, transport.as_ref(), &topic).await;
                });
            }
            Err(_) => warn!("No runtime left to release subscription on {}", topic),
        }
    }
}

/// Sends one invocation's progress states in order on a background task.
///
/// The wait loop only enqueues, so a slow shell server never delays the
/// deadline. Dropping an unfinished forwarder enqueues `ERROR`.
struct ProgressForwarder {
    reporter: Arc<dyn ProgressReporter>,
    path: String,
    queue: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl ProgressForwarder {
    fn new(reporter: Arc<dyn ProgressReporter>, path: String) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<String>();
        let task = tokio::spawn({
            let reporter = reporter.clone();
            let path = path.clone();
            async move {
                while let Some(state) = rx.recv().await {
                    report(reporter.as_ref(), &path, &state).await;
                }
            }
        });
        Self {
            reporter,
            path,
            queue: Some(queue),
            task: Some(task),
        }
    }

    /// Report and wait, bypassing the queue. Only valid before anything was pushed.
    async fn report_now(&self, state: &str) {
        report(self.reporter.as_ref(), &self.path, state).await;
    }

    fn push(&self, state: &str) {
        if let Some(queue) = &self.queue {
            let _ = queue.send(state.to_string());
        }
    }

    /// Enqueue the final state and wait until the queue is drained.
    async fn finish(mut self, state: &str) {
        self.push(state);
        self.queue.take();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Progress task for {} failed: {}", self.path, e);
            }
        }
    }
}

impl Drop for ProgressForwarder {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            let _ = queue.send(states::ERROR.to_string());
        }
    }
}

async fn report(reporter: &dyn ProgressReporter, path: &str, state: &str) {
    if let Err(e) = reporter.report(path, state).await {
        warn!("Failed to set progress {} at {}: {}", state, path, e);
    }
}
