//! MQTT bus client
//!
//! Connects to a broker using the rumqttc crate. The connection is driven on a
//! dedicated event-loop thread which also runs the delivery callbacks.
//! `subscribe` resolves once the broker's SubAck for that request arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use contracts::{BrokerConfig, QoS};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, Publish, SubAck,
    SubscribeReasonCode,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::client::BusClient;
use crate::error::{BusError, Result};
use crate::lock;
use crate::message::{BusMessage, DeliveryCallback};
use crate::routes::RouteTable;

/// Request queue capacity between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Pause between polls after a connection error
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Resolved connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
}

impl MqttSettings {
    /// Build settings from the broker section of the configuration
    pub fn from_config(config: &BrokerConfig, client_id: impl Into<String>) -> Result<Self> {
        let (host, port) = config
            .endpoint()
            .map_err(|e| BusError::connection(e.to_string()))?;

        Ok(Self {
            host,
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            clean_session: config.clean_session,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        options
    }
}

type AckResult = std::result::Result<(), String>;

struct PendingSubscribe {
    pattern: String,
    done: oneshot::Sender<AckResult>,
}

/// Subscribe requests waiting for their SubAck
///
/// Requests leave the client queue in order, so each outgoing SUBSCRIBE packet
/// id belongs to the oldest queued request.
#[derive(Default)]
struct PendingAcks {
    queued: VecDeque<PendingSubscribe>,
    sent: HashMap<u16, PendingSubscribe>,
}

impl PendingAcks {
    fn queue(&mut self, pattern: &str) -> oneshot::Receiver<AckResult> {
        let (done, rx) = oneshot::channel();
        self.queued.push_back(PendingSubscribe {
            pattern: pattern.to_string(),
            done,
        });
        rx
    }

    /// Undo the latest `queue` when the request never made it into the client
    fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    fn on_sent(&mut self, pkid: u16) {
        if let Some(pending) = self.queued.pop_front() {
            self.sent.insert(pkid, pending);
        }
    }

    fn on_ack(&mut self, ack: &SubAck) {
        let Some(pending) = self.sent.remove(&ack.pkid) else {
            debug!(pkid = ack.pkid, "SubAck for unknown request");
            return;
        };

        let refused = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        let outcome = if refused {
            error!(pattern = %pending.pattern, codes = ?ack.return_codes, "broker refused subscription");
            Err("broker refused subscription".to_string())
        } else {
            debug!(pattern = %pending.pattern, "subscription acknowledged");
            Ok(())
        };
        let _ = pending.done.send(outcome);
    }

    /// Fail every waiter; their requests died with the connection
    fn clear(&mut self) {
        for pending in self.queued.drain(..).chain(self.sent.drain().map(|(_, p)| p)) {
            warn!(pattern = %pending.pattern, "connection lost before SubAck");
        }
    }
}

/// MQTT bus client
///
/// Wraps a rumqttc `Client`. Routes incoming publishes to subscription
/// callbacks by compiled pattern, so overlapping subscriptions each see the message.
pub struct MqttBus {
    settings: MqttSettings,
    client: Mutex<Option<Client>>,
    routes: Arc<Mutex<RouteTable>>,
    acks: Arc<Mutex<PendingAcks>>,
}

impl MqttBus {
    /// Create new client (disconnected state)
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: Mutex::new(None),
            routes: Arc::new(Mutex::new(RouteTable::default())),
            acks: Arc::new(Mutex::new(PendingAcks::default())),
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    fn connected_client(&self) -> Result<Client> {
        lock(&self.client).clone().ok_or(BusError::NotConnected)
    }

    /// Disconnect from the broker; the event-loop thread exits afterwards
    pub fn disconnect(&self) -> Result<()> {
        if let Some(client) = lock(&self.client).take() {
            client
                .try_disconnect()
                .map_err(|e| BusError::connection(e.to_string()))?;
        }
        Ok(())
    }
}

impl BusClient for MqttBus {
    fn client_id(&self) -> &str {
        &self.settings.client_id
    }

    #[instrument(
        name = "mqtt_connect",
        skip(self),
        fields(host = %self.settings.host, port = self.settings.port, client_id = %self.settings.client_id)
    )]
    async fn connect(&self) -> Result<()> {
        if lock(&self.client).is_some() {
            return Ok(());
        }

        let (client, connection) = Client::new(self.settings.options(), REQUEST_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let routes = self.routes.clone();
        let acks = self.acks.clone();

        thread::Builder::new()
            .name("mqtt-eventloop".into())
            .spawn(move || run_event_loop(connection, routes, acks, ready_tx))
            .map_err(|e| BusError::connection(format!("failed to start event loop: {e}")))?;

        let outcome = tokio::time::timeout(self.settings.connect_timeout, ready_rx).await;
        let outcome = match outcome {
            Ok(Ok(result)) => result.map_err(BusError::connection),
            Ok(Err(_)) => Err(BusError::connection("event loop stopped before connecting")),
            Err(_) => Err(BusError::connection(format!(
                "timed out after {:?}",
                self.settings.connect_timeout
            ))),
        };

        match outcome {
            Ok(()) => {
                info!("connected to broker");
                *lock(&self.client) = Some(client);
                Ok(())
            }
            Err(e) => {
                // Dropping the only client handle lets the event loop finish
                let _ = client.try_disconnect();
                Err(e)
            }
        }
    }

    #[instrument(name = "mqtt_subscribe", skip(self, callback), fields(pattern = %pattern, qos = %qos))]
    async fn subscribe(&self, pattern: &str, qos: QoS, callback: DeliveryCallback) -> Result<()> {
        let client = self.connected_client()?;

        lock(&self.routes)
            .insert(pattern, callback)
            .map_err(|e| BusError::subscribe(pattern, e.to_string()))?;

        let acked = {
            let mut acks = lock(&self.acks);
            let acked = acks.queue(pattern);
            if let Err(e) = client.try_subscribe(pattern, to_mqtt_qos(qos)) {
                acks.cancel_last();
                lock(&self.routes).remove(pattern);
                return Err(BusError::subscribe(pattern, e.to_string()));
            }
            acked
        };

        debug!("subscribe request queued, waiting for SubAck");
        let outcome = match tokio::time::timeout(self.settings.connect_timeout, acked).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("connection lost before SubAck".to_string()),
            Err(_) => Err(format!(
                "no SubAck within {:?}",
                self.settings.connect_timeout
            )),
        };

        outcome.map_err(|message| {
            lock(&self.routes).remove(pattern);
            BusError::subscribe(pattern, message)
        })
    }

    #[instrument(name = "mqtt_unsubscribe", skip(self), fields(pattern = %pattern))]
    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        let client = self.connected_client()?;

        if !lock(&self.routes).remove(pattern) {
            return Err(BusError::unsubscribe(pattern, "not subscribed"));
        }

        client
            .try_unsubscribe(pattern)
            .map_err(|e| BusError::unsubscribe(pattern, e.to_string()))
    }

    #[instrument(
        name = "mqtt_publish",
        skip(self, payload),
        fields(topic = %topic, qos = %qos, retain, bytes = payload.len())
    )]
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        let client = self.connected_client()?;

        client
            .try_publish(topic, to_mqtt_qos(qos), retain, payload.to_vec())
            .map_err(|e| BusError::publish(topic, e.to_string()))
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Drive the connection until every client handle is gone
///
/// The first ConnAck (or the first error) resolves `ready`. Errors after that
/// are logged and polling resumes, which makes rumqttc reconnect.
fn run_event_loop(
    mut connection: Connection,
    routes: Arc<Mutex<RouteTable>>,
    acks: Arc<Mutex<PendingAcks>>,
    ready: oneshot::Sender<AckResult>,
) {
    let mut ready = Some(ready);

    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                match ready.take() {
                    Some(tx) => {
                        let outcome = if accepted {
                            Ok(())
                        } else {
                            Err(format!("broker refused connection: {:?}", ack.code))
                        };
                        let _ = tx.send(outcome);
                        if !accepted {
                            break;
                        }
                    }
                    None => info!(accepted, "reconnected to broker"),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => route(&routes, publish),
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => lock(&acks).on_sent(pkid),
            Ok(Event::Incoming(Packet::SubAck(ack))) => lock(&acks).on_ack(&ack),
            Ok(event) => trace!(?event, "mqtt event"),
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e.to_string()));
                    break;
                }
                lock(&acks).clear();
                warn!(error = %e, "mqtt connection error, retrying");
                thread::sleep(RETRY_DELAY);
            }
        }
    }

    debug!("mqtt event loop stopped");
}

fn route(routes: &Mutex<RouteTable>, publish: Publish) {
    let callbacks = lock(routes).matching(&publish.topic);
    if callbacks.is_empty() {
        debug!(topic = %publish.topic, "no route for incoming publish");
        return;
    }

    let message = BusMessage {
        topic: publish.topic,
        payload: publish.payload,
        duplicate: publish.dup,
    };
    for callback in &callbacks {
        callback(message.clone());
    }
}
