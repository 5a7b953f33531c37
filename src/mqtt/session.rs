//! Owned MQTT session backed by rumqttc
//!
//! The session drives the rumqttc event loop in a background task. That task
//! reconnects with capped exponential backoff, correlates publish and
//! subscribe requests with their broker acknowledgements, and hands
//! connection and message events to a [`SessionHandler`].

use super::transport::{MqttTransport, QoS};
use crate::config::{HassConfig, MqttConfig};
use crate::error::{DetectorError, Result};
use crate::error_recovery::{Backoff, RetryPolicy};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    Request, SubscribeReasonCode,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the request channel between client handles and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// How long a graceful disconnect waits for the event loop to wind down
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Callbacks invoked by the event loop
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Runs in its own task after every CONNACK, including reconnects
    async fn on_connected(&self, session: &MqttSession);

    /// Runs inline in the event loop for every incoming PUBLISH
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Connection parameters for [`MqttSession::start`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    /// Retained message the broker publishes if the connection drops uncleanly
    pub last_will: Option<(String, String)>,
    pub reconnect: RetryPolicy,
}

impl SessionOptions {
    pub fn from_config(mqtt: &MqttConfig, hass: &HassConfig, availability_topic: &str) -> Self {
        Self {
            host: mqtt.host.clone(),
            port: mqtt.port,
            client_id: super::topics::client_id(&mqtt.client_id, &hass.entity_name),
            credentials: mqtt
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            keep_alive: mqtt.keep_alive,
            last_will: Some((
                availability_topic.to_string(),
                super::publisher::PAYLOAD_OFFLINE.to_string(),
            )),
            reconnect: RetryPolicy::reconnect(),
        }
    }

    fn to_mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((user, pass)) = &self.credentials {
            options.set_credentials(user, pass);
        }
        if let Some((topic, payload)) = &self.last_will {
            options.set_last_will(LastWill::new(
                topic,
                payload.as_bytes().to_vec(),
                QoS::ExactlyOnce,
                true,
            ));
        }
        options
    }
}

type Waiter = oneshot::Sender<Result<()>>;

/// Correlates requests with acknowledgements.
///
/// rumqttc handles requests strictly in submission order and emits one
/// outgoing event per request, so queued waiters are matched to packet ids
/// as the outgoing events arrive.
#[derive(Default)]
struct AckTracker {
    queued_publishes: VecDeque<Waiter>,
    queued_subscribes: VecDeque<Waiter>,
    awaiting_ack: HashMap<u16, Waiter>,
}

impl AckTracker {
    fn publish_sent(&mut self, pkid: u16) {
        let Some(waiter) = self.queued_publishes.pop_front() else {
            debug!(pkid, "Outgoing publish without a local waiter");
            return;
        };
        // QoS 0 packets carry no id and are done once written
        if pkid == 0 {
            let _ = waiter.send(Ok(()));
        } else {
            self.awaiting_ack.insert(pkid, waiter);
        }
    }

    fn subscribe_sent(&mut self, pkid: u16) {
        match self.queued_subscribes.pop_front() {
            Some(waiter) => {
                self.awaiting_ack.insert(pkid, waiter);
            }
            None => debug!(pkid, "Outgoing subscribe without a local waiter"),
        }
    }

    fn acknowledged(&mut self, pkid: u16, result: Result<()>) {
        if let Some(waiter) = self.awaiting_ack.remove(&pkid) {
            let _ = waiter.send(result);
        }
    }

    /// Clean sessions drop in-flight packets, so their acks never arrive
    fn fail_in_flight(&mut self, reason: &str) {
        for (_, waiter) in self.awaiting_ack.drain() {
            let _ = waiter.send(Err(DetectorError::publish(reason)));
        }
    }

    /// Fail everything a broken connection took with it.
    ///
    /// `unsent_publishes` and `unsent_subscribes` count the requests rumqttc
    /// pulled off the channel but never wrote. They were queued first, so they
    /// own the oldest waiters. Requests still in the channel keep theirs.
    fn connection_lost(
        &mut self,
        unsent_publishes: usize,
        unsent_subscribes: usize,
        reason: &str,
    ) {
        self.fail_in_flight(reason);

        let publishes = unsent_publishes.min(self.queued_publishes.len());
        let subscribes = unsent_subscribes.min(self.queued_subscribes.len());
        for waiter in self
            .queued_publishes
            .drain(..publishes)
            .chain(self.queued_subscribes.drain(..subscribes))
        {
            let _ = waiter.send(Err(DetectorError::publish(reason)));
        }
    }

    fn fail_all(&mut self, reason: &str) {
        self.fail_in_flight(reason);
        for waiter in self
            .queued_publishes
            .drain(..)
            .chain(self.queued_subscribes.drain(..))
        {
            let _ = waiter.send(Err(DetectorError::publish(reason)));
        }
    }
}

struct SessionInner {
    client: AsyncClient,
    acks: Mutex<AckTracker>,
    state: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to one broker session
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MqttSession {
    /// Create the client and spawn its event loop.
    ///
    /// The event loop keeps running, reconnecting as needed, until
    /// [`MqttSession::close`] or [`MqttTransport::disconnect`] is called.
    pub fn start(options: SessionOptions, handler: Arc<dyn SessionHandler>) -> Self {
        let (client, event_loop) =
            AsyncClient::new(options.to_mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let session = Self {
            inner: Arc::new(SessionInner {
                client,
                acks: Mutex::new(AckTracker::default()),
                state,
                last_error: Mutex::new(None),
                shutdown: CancellationToken::new(),
                event_loop: Mutex::new(None),
            }),
        };

        info!(
            host = %options.host,
            port = options.port,
            client_id = %options.client_id,
            "Connecting to MQTT broker"
        );

        let task = tokio::spawn(run_event_loop(
            event_loop,
            session.clone(),
            handler,
            Backoff::new(options.reconnect),
        ));
        *lock(&session.inner.event_loop) = Some(task);

        session
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait for the broker handshake
    pub async fn wait_connected(&self, limit: Duration, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.inner.state.subscribe();

        let wait = async {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected if self.inner.shutdown.is_cancelled() => {
                        return Err(DetectorError::connection("session closed"));
                    }
                    _ => {}
                }
                if state.changed().await.is_err() {
                    return Err(DetectorError::connection("session closed"));
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DetectorError::cancelled("MQTT connection cancelled")),
            result = tokio::time::timeout(limit, wait) => match result {
                Ok(result) => result,
                Err(_) => {
                    let cause = lock(&self.inner.last_error)
                        .clone()
                        .unwrap_or_else(|| "no response from broker".to_string());
                    Err(DetectorError::connection(format!(
                        "timed out after {limit:?}: {cause}"
                    )))
                }
            },
        }
    }

    /// Stop the event loop without the MQTT DISCONNECT handshake
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.join_event_loop().await;
    }

    async fn join_event_loop(&self) {
        let task = lock(&self.inner.event_loop).take();
        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("MQTT event loop did not stop in time, aborting it");
                self.inner.shutdown.cancel();
                task.abort();
            }
        }
    }

    fn record_error(&self, error: &ConnectionError) {
        *lock(&self.inner.last_error) = Some(error.to_string());
    }
}

/// Requests are queued without waiting for channel space.
///
/// The request and its waiter are queued under the tracker lock, so the event
/// loop never sees one without the other. A full channel means the broker has
/// been unreachable for a while and the request fails right away.
#[async_trait]
impl MqttTransport for MqttSession {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<()> {
        let done = {
            let mut acks = lock(&self.inner.acks);
            self.inner
                .client
                .try_publish(topic, qos, retain, payload)
                .map_err(|e| {
                    DetectorError::publish(format!("failed to queue publish to {topic}: {e}"))
                })?;
            let (tx, rx) = oneshot::channel();
            acks.queued_publishes.push_back(tx);
            rx
        };

        done.await
            .map_err(|_| DetectorError::publish("session closed before acknowledgement"))?
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        let done = {
            let mut acks = lock(&self.inner.acks);
            self.inner.client.try_subscribe(topic, qos).map_err(|e| {
                DetectorError::publish(format!("failed to queue subscription to {topic}: {e}"))
            })?;
            let (tx, rx) = oneshot::channel();
            acks.queued_subscribes.push_back(tx);
            rx
        };

        done.await
            .map_err(|_| DetectorError::publish("session closed before acknowledgement"))?
    }

    async fn disconnect(&self) -> Result<()> {
        // Without a live connection there is nobody to say goodbye to
        let requested = self.state() == ConnectionState::Connected
            && match self.inner.client.try_disconnect() {
                Ok(()) => true,
                Err(e) => {
                    debug!("Disconnect request could not be queued: {}", e);
                    false
                }
            };
        if !requested {
            self.inner.shutdown.cancel();
        }

        self.join_event_loop().await;
        self.inner.shutdown.cancel();
        info!("Disconnected from MQTT broker");
        Ok(())
    }
}

/// Drop the requests rumqttc would replay after reconnecting.
///
/// Returns how many of them had never been written, per kind. Those still
/// carry packet id 0; replayed in-flight publishes keep their id.
fn discard_pending(event_loop: &mut EventLoop) -> (usize, usize) {
    let mut unsent = (0, 0);
    for request in event_loop.pending.drain(..) {
        match request {
            Request::Publish(publish) if publish.pkid == 0 => unsent.0 += 1,
            Request::Subscribe(subscribe) if subscribe.pkid == 0 => unsent.1 += 1,
            _ => {}
        }
    }
    unsent
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    session: MqttSession,
    handler: Arc<dyn SessionHandler>,
    mut backoff: Backoff,
) {
    let inner = &session.inner;

    loop {
        let event = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                backoff.reset();
                *lock(&inner.last_error) = None;
                inner.state.send_replace(ConnectionState::Connected);
                info!(session_present = ack.session_present, "Connected to MQTT broker");

                let session = session.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.on_connected(&session).await;
                });
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "Message received");
                handler.on_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                lock(&inner.acks).acknowledged(ack.pkid, Ok(()));
            }
            Ok(Event::Incoming(Packet::PubComp(comp))) => {
                lock(&inner.acks).acknowledged(comp.pkid, Ok(()));
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let result = if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    Err(DetectorError::publish("broker rejected subscription"))
                } else {
                    Ok(())
                };
                lock(&inner.acks).acknowledged(ack.pkid, result);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                lock(&inner.acks).publish_sent(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                lock(&inner.acks).subscribe_sent(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(error) => {
                if inner.shutdown.is_cancelled() {
                    break;
                }
                session.record_error(&error);

                let (publishes, subscribes) = discard_pending(&mut event_loop);
                lock(&inner.acks).connection_lost(
                    publishes,
                    subscribes,
                    "connection lost before acknowledgement",
                );

                let was_connected = inner.state.send_replace(ConnectionState::Connecting)
                    == ConnectionState::Connected;
                let delay = backoff.next_delay();
                if was_connected {
                    warn!("Connection to MQTT broker lost: {}", error);
                }
                warn!(
                    attempt = backoff.failures(),
                    "MQTT connection error: {}; reconnecting in {:?}", error, delay
                );
                drop(error);

                tokio::select! {
                    biased;
                    _ = inner.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    inner.state.send_replace(ConnectionState::Disconnected);
    lock(&inner.acks).fail_all("session closed");
    debug!("MQTT event loop stopped");
}
