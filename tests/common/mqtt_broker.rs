//! In-process MQTT 3.1.1 broker for session tests
//!
//! Decodes client packets with rumqttc's own codec and answers with the
//! minimal acknowledgements a broker owes: CONNACK, PUBACK, the QoS 2
//! PUBREC/PUBCOMP pair, SUBACK and PINGRESP. Everything received is
//! recorded. The broker can simulate outages and drop a connection right
//! after a chosen publish, before acknowledging it.

use bytes::BytesMut;
use rumqttc::mqttbytes::{self, v4};
use rumqttc::QoS;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// CONNECT as seen by the broker
#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    /// (topic, payload, qos, retain)
    pub last_will: Option<(String, String, QoS, bool)>,
}

/// PUBLISH as seen by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Default)]
struct BrokerState {
    refusing: bool,
    drop_on: Option<(String, String)>,
    connects: Vec<ConnectRecord>,
    publishes: Vec<ReceivedPublish>,
    subscriptions: Vec<(String, QoS)>,
    disconnects: usize,
}

#[derive(Debug, Clone)]
enum Command {
    DropConnections,
    Deliver { topic: String, payload: Vec<u8> },
}

/// Fake broker listening on an ephemeral localhost port
pub struct FakeBroker {
    addr: SocketAddr,
    state: Arc<Mutex<BrokerState>>,
    commands: broadcast::Sender<Command>,
    accept_loop: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(BrokerState::default()));
        let (commands, _) = broadcast::channel(64);

        let accept_loop = {
            let state = state.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve(socket, state.clone(), commands.subscribe()));
                }
            })
        };

        Self {
            addr,
            state,
            commands,
            accept_loop,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Close every open connection; clients may reconnect right away
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::DropConnections);
    }

    /// Close every connection and refuse new sessions until [`FakeBroker::recover`]
    pub fn outage(&self) {
        self.state().refusing = true;
        self.drop_connections();
    }

    pub fn recover(&self) {
        self.state().refusing = false;
    }

    /// Close the connection that delivers `payload` to `topic`, without
    /// acknowledging it. Fires once.
    pub fn drop_connection_on(&self, topic: &str, payload: &str) {
        self.state().drop_on = Some((topic.to_string(), payload.to_string()));
    }

    /// Send a QoS 0 PUBLISH to every connected client
    pub fn deliver(&self, topic: &str, payload: &str) {
        let _ = self.commands.send(Command::Deliver {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn connects(&self) -> Vec<ConnectRecord> {
        self.state().connects.clone()
    }

    pub fn publishes(&self) -> Vec<ReceivedPublish> {
        self.state().publishes.clone()
    }

    /// Payloads received on `topic`, in arrival order
    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.state()
            .publishes
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state().subscriptions.clone()
    }

    /// Clean DISCONNECT packets received
    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_loop.abort();
        self.drop_connections();
    }
}

/// Poll `check` until it holds, panicking after a few seconds
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn serve(
    mut socket: TcpStream,
    state: Arc<Mutex<BrokerState>>,
    mut commands: broadcast::Receiver<Command>,
) {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        loop {
            match v4::read(&mut buffer, MAX_PACKET_SIZE) {
                Ok(packet) => {
                    let Some(reply) = handle(packet, &state) else {
                        return;
                    };
                    if socket.write_all(&reply).await.is_err() {
                        return;
                    }
                }
                Err(mqttbytes::Error::InsufficientBytes(_)) => break,
                Err(_) => return,
            }
        }

        tokio::select! {
            read = socket.read_buf(&mut buffer) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            command = commands.recv() => match command {
                Ok(Command::Deliver { topic, payload }) => {
                    if socket.write_all(&encode_publish(&topic, &payload)).await.is_err() {
                        return;
                    }
                }
                Ok(Command::DropConnections) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// Bytes to send back, or `None` to close the connection
fn handle(packet: v4::Packet, state: &Mutex<BrokerState>) -> Option<Vec<u8>> {
    let mut state = state.lock().unwrap();

    match packet {
        v4::Packet::Connect(connect) => {
            state.connects.push(ConnectRecord {
                client_id: connect.client_id.clone(),
                clean_session: connect.clean_session,
                keep_alive: connect.keep_alive,
                last_will: connect.last_will.map(|will| {
                    (
                        will.topic,
                        String::from_utf8_lossy(&will.message).into_owned(),
                        will.qos,
                        will.retain,
                    )
                }),
            });
            if state.refusing {
                return None;
            }
            // Accepted, no session present
            Some(vec![0x20, 0x02, 0x00, 0x00])
        }
        v4::Packet::Publish(publish) => {
            let received = ReceivedPublish {
                topic: publish.topic.clone(),
                payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                qos: publish.qos,
                retain: publish.retain,
            };
            let drop_now = state
                .drop_on
                .as_ref()
                .is_some_and(|(topic, payload)| {
                    *topic == received.topic && *payload == received.payload
                });
            state.publishes.push(received);
            if drop_now {
                state.drop_on = None;
                return None;
            }
            match publish.qos {
                QoS::AtMostOnce => Some(Vec::new()),
                QoS::AtLeastOnce => Some(with_pkid(0x40, publish.pkid)),
                QoS::ExactlyOnce => Some(with_pkid(0x50, publish.pkid)),
            }
        }
        v4::Packet::PubRel(rel) => Some(with_pkid(0x70, rel.pkid)),
        v4::Packet::Subscribe(subscribe) => {
            let [hi, lo] = subscribe.pkid.to_be_bytes();
            let mut reply = vec![0x90, (2 + subscribe.filters.len()) as u8, hi, lo];
            for filter in subscribe.filters {
                reply.push(granted(filter.qos));
                state.subscriptions.push((filter.path, filter.qos));
            }
            Some(reply)
        }
        v4::Packet::PingReq => Some(vec![0xD0, 0x00]),
        v4::Packet::Disconnect => {
            state.disconnects += 1;
            None
        }
        _ => Some(Vec::new()),
    }
}

fn granted(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Two-byte acknowledgement carrying a packet id
fn with_pkid(header: u8, pkid: u16) -> Vec<u8> {
    let [hi, lo] = pkid.to_be_bytes();
    vec![header, 0x02, hi, lo]
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut remaining = 2 + topic.len() + payload.len();
    let mut packet = vec![0x30];
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if remaining == 0 {
            break;
        }
    }
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}
