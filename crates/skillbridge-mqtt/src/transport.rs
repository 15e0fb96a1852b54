//! Publish/subscribe transport.
//!
//! [`MqttTransport`] is the seam the bridge talks to. [`RumqttTransport`]
//! owns one broker connection and a single receive task that feeds every
//! inbound publish into the [`PendingOperationRegistry`].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use skillbridge_core::{BridgeError, MqttConfig, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::pending::PendingOperationRegistry;

/// Invoked with the failure reason when the broker connection is lost.
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker operations used by the bridge.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Publish with at-least-once delivery.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// rumqttc-backed transport.
///
/// Reconnection is never attempted internally: after a broker failure the
/// disconnect callback fires once and [`RumqttTransport::reconnect`] must be
/// called explicitly.
pub struct RumqttTransport {
    config: MqttConfig,
    registry: Arc<PendingOperationRegistry>,
    client: RwLock<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    on_disconnect: Option<DisconnectCallback>,
}

impl RumqttTransport {
    pub fn new(config: MqttConfig, registry: Arc<PendingOperationRegistry>) -> Self {
        Self {
            config,
            registry,
            client: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            on_disconnect: None,
        }
    }

    /// Register the broker-failure callback.
    pub fn with_disconnect_callback(mut self, callback: DisconnectCallback) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }
        options
    }

    /// Open the broker connection and start the receive task.
    ///
    /// Returns once the broker acknowledged the connection.
    pub async fn connect(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let broker = format!("{}:{}", self.config.host, self.config.port);
        let (client, eventloop) =
            AsyncClient::new(self.options(), self.config.channel_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();

        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(receive_loop(
            eventloop,
            broker.clone(),
            self.registry.clone(),
            self.connected.clone(),
            self.running.clone(),
            self.on_disconnect.clone(),
            ready_tx,
        ));
        *self.client.write() = Some(client);
        *self.task.lock() = Some(handle);

        let outcome = match tokio::time::timeout(CONNECT_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(BridgeError::Broker(reason)),
            Ok(Err(_)) => Err(BridgeError::Broker(format!(
                "Receive task for {} ended before connecting",
                broker
            ))),
            Err(_) => Err(BridgeError::Broker(format!(
                "No connection acknowledgement from {} within {:?}",
                broker, CONNECT_TIMEOUT
            ))),
        };

        match outcome {
            Ok(()) => {
                info!("Connected to MQTT broker {}", broker);
                Ok(())
            }
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.client.write().take();
    }

    /// Close the connection and stop the receive task.
    pub async fn disconnect(&self) -> Result<()> {
        // cleared first so the receive task does not report this as a failure
        self.running.store(false, Ordering::SeqCst);
        let client = self.client.read().clone();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!("MQTT disconnect request failed: {}", e);
            }
        }
        self.stop();
        info!("Disconnected from MQTT broker {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    /// Tear down whatever is left of the old connection and connect again.
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await?;
        self.connect().await
    }

    fn client(&self) -> Result<AsyncClient> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| BridgeError::Broker("MQTT client is not connected".to_string()))
    }
}

#[async_trait]
impl MqttTransport for RumqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Broker(format!("Publish to {} failed: {}", topic, e)))
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client()?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BridgeError::Broker(format!("Subscribe to {} failed: {}", topic, e)))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| BridgeError::Broker(format!("Unsubscribe from {} failed: {}", topic, e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn receive_loop(
    mut eventloop: EventLoop,
    broker: String,
    registry: Arc<PendingOperationRegistry>,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    on_disconnect: Option<DisconnectCallback>,
    ready: oneshot::Sender<std::result::Result<(), String>>,
) {
    let mut ready = Some(ready);

    while running.load(Ordering::SeqCst) {
        let reason = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received MQTT message on topic: {}, payload length: {}",
                    publish.topic,
                    publish.payload.len()
                );
                registry.handle_message(&publish.topic, &publish.payload);
                continue;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                continue;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => "broker closed the connection".to_string(),
            Ok(_) => continue,
            Err(e) => e.to_string(),
        };

        connected.store(false, Ordering::SeqCst);
        if let Some(tx) = ready.take() {
            let _ = tx.send(Err(format!("Connection to {} failed: {}", broker, reason)));
            return;
        }
        if running.swap(false, Ordering::SeqCst) {
            error!("MQTT broker {} connection lost: {}", broker, reason);
            if let Some(callback) = &on_disconnect {
                callback(&reason);
            }
        }
        break;
    }

    connected.store(false, Ordering::SeqCst);
    info!("MQTT receive task for {} stopped", broker);
}
