//! Lux publishing with Home Assistant discovery
//!
//! [`DiscoveryPublisher`] owns the broker session for the lifetime of the
//! service. Every reading goes to the state topic; the discovery document is
//! (re)published after the first reading and after every Home Assistant
//! restart announced on the birth topic.

use super::discovery::DiscoveryDocument;
use super::session::{MqttSession, SessionHandler, SessionOptions};
use super::topics::Topics;
use super::transport::{MqttTransport, QoS};
use crate::acquisition::Lux;
use crate::config::{HassConfig, MqttConfig};
use crate::error::{DetectorError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Availability payload while the service runs
pub const PAYLOAD_ONLINE: &str = "online";

/// Availability payload after shutdown, also used as last will
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Set when Home Assistant needs the discovery document again.
///
/// Starts pending so the first successful reading also announces the entity.
#[derive(Debug, Clone)]
pub struct DiscoveryFlag(Arc<AtomicBool>);

impl Default for DiscoveryFlag {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl DiscoveryFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_pending(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `op` within `limit`, giving up early when `cancel` fires
async fn bounded<F>(what: &str, limit: Duration, cancel: &CancellationToken, op: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DetectorError::cancelled(format!("{what} cancelled"))),
        result = tokio::time::timeout(limit, op) => match result {
            Ok(result) => result,
            Err(_) => Err(DetectorError::publish(format!("{what} timed out after {limit:?}"))),
        },
    }
}

/// Actions taken on every (re)connect and on incoming messages
#[derive(Debug, Clone)]
pub struct ConnectHooks {
    topics: Topics,
    discovery_enabled: bool,
    flag: DiscoveryFlag,
    timeout: Duration,
}

impl ConnectHooks {
    pub fn new(topics: Topics, discovery_enabled: bool, flag: DiscoveryFlag, timeout: Duration) -> Self {
        Self {
            topics,
            discovery_enabled,
            flag,
            timeout,
        }
    }

    /// Mark the service online and follow the Home Assistant birth topic
    pub async fn announce<T: MqttTransport + ?Sized>(&self, transport: &T) -> Result<()> {
        let never = CancellationToken::new();

        bounded(
            "availability publish",
            self.timeout,
            &never,
            transport.publish(
                &self.topics.availability,
                QoS::ExactlyOnce,
                true,
                PAYLOAD_ONLINE.as_bytes().to_vec(),
            ),
        )
        .await?;

        if self.discovery_enabled {
            bounded(
                "birth topic subscription",
                self.timeout,
                &never,
                transport.subscribe(&self.topics.birth, QoS::AtLeastOnce),
            )
            .await?;
            debug!(topic = %self.topics.birth, "Subscribed to Home Assistant status");
        }

        Ok(())
    }

    /// Returns true when the message asked for a new discovery document
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> bool {
        if !self.discovery_enabled || topic != self.topics.birth {
            return false;
        }
        if payload == PAYLOAD_ONLINE.as_bytes() {
            info!("Home Assistant came online, discovery will be republished");
            self.flag.mark_pending();
            true
        } else {
            debug!(
                payload = %String::from_utf8_lossy(payload),
                "Ignoring Home Assistant status"
            );
            false
        }
    }
}

#[async_trait]
impl SessionHandler for ConnectHooks {
    async fn on_connected(&self, session: &MqttSession) {
        if let Err(e) = self.announce(session).await {
            warn!("Connect actions failed: {}", e);
        }
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.handle_message(topic, payload);
    }
}

/// Publishes readings and keeps Home Assistant informed about the sensor
pub struct DiscoveryPublisher<T: MqttTransport> {
    transport: Arc<T>,
    topics: Topics,
    entity_name: String,
    discovery_enabled: bool,
    flag: DiscoveryFlag,
    timeout: Duration,
}

impl DiscoveryPublisher<MqttSession> {
    /// Connect to the broker and wait for the first handshake
    pub async fn connect(
        mqtt: &MqttConfig,
        hass: &HassConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let topics = Topics::from_config(mqtt, hass);
        let options = SessionOptions::from_config(mqtt, hass, &topics.availability);
        Self::connect_with(mqtt, hass, options, cancel).await
    }

    /// Connect with explicit session options, e.g. a custom reconnect schedule
    pub async fn connect_with(
        mqtt: &MqttConfig,
        hass: &HassConfig,
        options: SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let topics = Topics::from_config(mqtt, hass);
        let flag = DiscoveryFlag::new();
        let hooks = ConnectHooks::new(
            topics.clone(),
            hass.discovery_enabled,
            flag.clone(),
            mqtt.publish_timeout,
        );

        let session = MqttSession::start(options, Arc::new(hooks));

        if let Err(e) = session.wait_connected(mqtt.connect_timeout, cancel).await {
            session.close().await;
            return Err(e);
        }

        Ok(Self::with_flag(Arc::new(session), mqtt, hass, flag))
    }
}

impl<T: MqttTransport> DiscoveryPublisher<T> {
    pub fn new(transport: Arc<T>, mqtt: &MqttConfig, hass: &HassConfig) -> Self {
        Self::with_flag(transport, mqtt, hass, DiscoveryFlag::new())
    }

    /// Build a publisher sharing `flag` with the connect hooks
    pub fn with_flag(
        transport: Arc<T>,
        mqtt: &MqttConfig,
        hass: &HassConfig,
        flag: DiscoveryFlag,
    ) -> Self {
        Self {
            transport,
            topics: Topics::from_config(mqtt, hass),
            entity_name: hass.entity_name.clone(),
            discovery_enabled: hass.discovery_enabled,
            flag,
            timeout: mqtt.publish_timeout,
        }
    }

    /// Hooks bound to this publisher's topics and discovery flag
    pub fn hooks(&self) -> ConnectHooks {
        ConnectHooks::new(
            self.topics.clone(),
            self.discovery_enabled,
            self.flag.clone(),
            self.timeout,
        )
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn discovery_pending(&self) -> bool {
        self.discovery_enabled && self.flag.is_pending()
    }

    /// Publish one reading, followed by the discovery document when pending
    pub async fn publish_lux(&self, lux: Lux, cancel: &CancellationToken) -> Result<()> {
        bounded(
            "state publish",
            self.timeout,
            cancel,
            self.transport.publish(
                &self.topics.state,
                QoS::AtLeastOnce,
                false,
                lux.to_string().into_bytes(),
            ),
        )
        .await?;
        debug!(lux, topic = %self.topics.state, "Published reading");

        if self.discovery_pending() {
            self.publish_discovery(cancel).await?;
        }
        Ok(())
    }

    /// Publish the retained discovery document
    pub async fn publish_discovery(&self, cancel: &CancellationToken) -> Result<()> {
        let payload = DiscoveryDocument::new(&self.entity_name, &self.topics).to_payload()?;

        bounded(
            "discovery publish",
            self.timeout,
            cancel,
            self.transport
                .publish(&self.topics.discovery_config, QoS::AtLeastOnce, true, payload),
        )
        .await?;

        self.flag.clear();
        info!(topic = %self.topics.discovery_config, "Published discovery document");
        Ok(())
    }

    /// Mark the service offline and close the session.
    ///
    /// Best effort: failures are logged, never returned.
    pub async fn disconnect(&self) {
        let never = CancellationToken::new();
        let offline = bounded(
            "availability publish",
            self.timeout,
            &never,
            self.transport.publish(
                &self.topics.availability,
                QoS::ExactlyOnce,
                true,
                PAYLOAD_OFFLINE.as_bytes().to_vec(),
            ),
        )
        .await;
        if let Err(e) = offline {
            warn!("Could not publish offline status: {}", e);
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
    }
}
