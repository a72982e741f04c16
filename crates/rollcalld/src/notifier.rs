//! Best-effort LED status notifications over MQTT.
//!
//! The broker connection lives in a background task that keeps retrying while
//! disconnected. Publishing never blocks and never reports failure to the
//! caller: events published while disconnected are dropped and logged.

use chrono::{DateTime, Local};
use rollcall_core::Operator;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("channel not connected")]
    Disconnected,
    #[error("publish rejected: {0}")]
    Publish(String),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

/// Message published for an accepted match.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub led_index: Option<u32>,
    pub status: AttendanceStatus,
    pub operator_name: String,
    pub employee_id: String,
    pub station: String,
    pub timestamp: String,
}

impl NotificationEvent {
    /// Build the event from the matched operator only.
    pub fn present(operator: &Operator, at: DateTime<Local>) -> Self {
        Self {
            led_index: operator.led_index,
            status: AttendanceStatus::Present,
            operator_name: operator.name.clone(),
            employee_id: operator.employee_id.clone(),
            station: operator.station.clone(),
            timestamp: at.to_rfc3339(),
        }
    }
}

/// Publish side of a message channel.
pub trait Channel: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue a message without waiting for delivery.
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError>;
}

/// Publishes notification events to one topic.
#[derive(Clone)]
pub struct Notifier {
    channel: Arc<dyn Channel>,
    topic: String,
}

impl Notifier {
    pub fn new(channel: Arc<dyn Channel>, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Fire-and-forget publish. Failures are logged, never returned.
    pub fn publish(&self, event: &NotificationEvent) {
        if let Err(e) = self.try_send(event) {
            tracing::warn!(
                topic = %self.topic,
                operator = %event.operator_name,
                error = %e,
                "notification dropped"
            );
        }
    }

    fn try_send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        if !self.channel.is_connected() {
            return Err(NotifyError::Disconnected);
        }
        let payload = serde_json::to_vec(event)?;
        self.channel.try_publish(&self.topic, payload)?;
        tracing::debug!(topic = %self.topic, led = ?event.led_index, "notification queued");
        Ok(())
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub reconnect_interval: Duration,
}

/// MQTT channel with a self-reconnecting background event loop.
pub struct ChannelService {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelService {
    /// Start connecting in the background. Returns immediately.
    pub fn connect(settings: &MqttSettings) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();
        let retry = settings.reconnect_interval;
        let broker = format!("{}:{}", settings.host, settings.port);

        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        flag.store(true, Ordering::SeqCst);
                        tracing::info!(%broker, "notification channel connected");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        flag.store(false, Ordering::SeqCst);
                        tracing::warn!(%broker, "broker closed the connection");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        flag.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::SeqCst) {
                            tracing::warn!(%broker, error = %e, "notification channel lost");
                        } else {
                            tracing::debug!(%broker, error = %e, "broker unreachable; retrying");
                        }
                        tokio::time::sleep(retry).await;
                    }
                }
            }
            tracing::info!(%broker, "notification channel closed");
        });

        Self {
            client,
            connected,
            task: Mutex::new(Some(task)),
        }
    }

    /// Send DISCONNECT if possible and stop the event loop.
    pub async fn disconnect(&self) {
        let _ = self.client.try_disconnect();
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            // Give the loop a moment to flush DISCONNECT, then stop it regardless.
            tokio::time::sleep(Duration::from_millis(100)).await;
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Channel for ChannelService {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| NotifyError::Publish(e.to_string()))
    }
}
