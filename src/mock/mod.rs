//! Mock implementations for testing
//!
//! [`RecordingTransport`] stands in for the broker session: it acknowledges
//! everything immediately (or after a configured delay) and records what was
//! sent so tests can assert on topics, QoS and retain flags.

use crate::error::{DetectorError, Result};
use crate::mqtt::{MqttTransport, QoS};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// In-memory transport that records publishes and subscriptions
#[derive(Debug, Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    failing_topics: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    disconnected: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish or subscribe on `topic`
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_topics.lock().unwrap().clear();
    }

    /// Hold every operation for `delay` before acknowledging it
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    async fn settle(&self, topic: &str) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_disconnected() {
            return Err(DetectorError::publish("session closed"));
        }
        if self.failing_topics.lock().unwrap().contains(topic) {
            return Err(DetectorError::publish(format!("broker rejected {topic}")));
        }
        Ok(())
    }
}

#[async_trait]
impl MqttTransport for RecordingTransport {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<()> {
        self.settle(topic).await?;
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        self.settle(topic).await?;
        self.subscriptions
            .lock()
            .unwrap()
            .push((topic.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
