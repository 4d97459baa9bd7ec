//! rumqttc-backed [`Connector`]. A pump thread drives the rumqttc event loop,
//! confirms the connection and publishes back to the caller, and hands every
//! inbound publish to the delivery thread of the subscription it matches.

use crate::client::{topic_matches, Connection, Connector, Handler, Message};
use crate::config::{Scheme, SessionConfig};
use crate::error::{ConnectError, PublishError, SubscribeError};
use log::{debug, error, warn};
use rumqttc::{
    Client, ConnectReturnCode, ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

const CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

type Status = Result<(), ConnectError>;
type Confirmation = Result<(), PublishError>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Route {
    filter: String,
    tx: Sender<Message>,
}

struct Pending {
    qos: QoS,
    tx: Sender<Confirmation>,
}

#[derive(Default)]
struct Shared {
    routes: Mutex<Vec<Route>>,
    pending: Mutex<Option<Pending>>,
}

impl Shared {
    /// Hands `msg` to the first subscription whose filter matches. A message
    /// that several overlapping filters match is still delivered, and
    /// counted, only once.
    fn route(&self, msg: Message) {
        let routes = lock(&self.routes);
        match routes.iter().find(|r| topic_matches(&r.filter, &msg.topic)) {
            Some(route) => {
                if route.tx.send(msg).is_err() {
                    debug!("delivery thread for {:?} is gone", route.filter);
                }
            }
            None => debug!("no subscription matches {:?}, dropped", msg.topic),
        }
    }

    fn confirm(&self, qos: QoS) {
        let mut pending = lock(&self.pending);
        if pending.as_ref().is_some_and(|p| p.qos == qos) {
            if let Some(p) = pending.take() {
                let _ = p.tx.send(Ok(()));
            }
        }
    }

    fn close(&self) {
        if let Some(p) = lock(&self.pending).take() {
            let _ = p.tx.send(Err(PublishError::Closed));
        }
        lock(&self.routes).clear();
    }
}

fn connect_error(e: ConnectionError) -> ConnectError {
    match e {
        ConnectionError::ConnectionRefused(code) => ConnectError::Refused(format!("{:?}", code)),
        ConnectionError::Tls(e) => ConnectError::Tls(e.to_string()),
        e => ConnectError::Transport(e.to_string()),
    }
}

fn pump(mut connection: rumqttc::Connection, shared: Arc<Shared>, status: Sender<Status>) {
    let mut connected = false;

    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    let _ = status.send(Err(ConnectError::Refused(format!("{:?}", ack.code))));
                    break;
                }
                if !connected {
                    connected = true;
                    let _ = status.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => shared.route(Message {
                topic: p.topic,
                payload: p.payload.to_vec(),
                retained: p.retain,
            }),
            Ok(Event::Incoming(Packet::SubAck(ack))) => debug!("suback {:?}", ack.return_codes),
            Ok(Event::Incoming(Packet::PubAck(_))) => shared.confirm(QoS::AtLeastOnce),
            Ok(Event::Incoming(Packet::PubComp(_))) => shared.confirm(QoS::ExactlyOnce),
            Ok(Event::Outgoing(Outgoing::Publish(_))) => shared.confirm(QoS::AtMostOnce),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent");
                break;
            }
            Ok(event) => debug!("{:?}", event),
            Err(e) => {
                if connected {
                    error!("connection lost: {}", e);
                } else {
                    let _ = status.send(Err(connect_error(e)));
                }
                break;
            }
        }
    }

    shared.close();
}

struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn tls_config(insecure: bool) -> Result<ClientConfig, ConnectError> {
    let mut roots = RootCertStore::empty();
    if !insecure {
        let native = rustls_native_certs::load_native_certs()
            .map_err(|e| ConnectError::Tls(format!("load system root certificates: {}", e)))?;
        let der: Vec<Vec<u8>> = native.into_iter().map(|c| c.0).collect();
        let (added, skipped) = roots.add_parsable_certificates(&der);
        debug!("{} root certificates loaded, {} skipped", added, skipped);
        if added == 0 {
            return Err(ConnectError::Tls("no usable system root certificates".into()));
        }
    }

    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if insecure {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
    }
    Ok(config)
}

fn options(config: &SessionConfig) -> Result<MqttOptions, ConnectError> {
    let broker = &config.broker;
    let mut options = MqttOptions::new(&config.client_id, &broker.host, broker.port);
    options.set_keep_alive(KEEP_ALIVE);

    if let Some(c) = &config.credentials {
        options.set_credentials(&c.username, &c.password);
    }
    if broker.scheme == Scheme::Tls {
        let tls = tls_config(config.insecure)?;
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(tls),
        )));
    }
    Ok(options)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MqttConnector;

impl Connector for MqttConnector {
    type Conn = MqttConnection;

    fn connect(
        &self,
        config: &SessionConfig,
        timeout: Duration,
    ) -> Result<MqttConnection, ConnectError> {
        let (mut client, connection) = Client::new(options(config)?, CHANNEL_CAPACITY);
        let shared = Arc::new(Shared::default());
        let (status_tx, status_rx) = mpsc::channel();

        let pump = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("mqtt-pump".into())
                .spawn(move || pump(connection, shared, status_tx))
                .map_err(|e| ConnectError::Transport(e.to_string()))?
        };

        match status_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(MqttConnection {
                client,
                shared,
                pump: Mutex::new(Some(pump)),
            }),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => {
                let _ = client.disconnect();
                Err(ConnectError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ConnectError::Closed),
        }
    }
}

pub struct MqttConnection {
    client: Client,
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Connection for MqttConnection {
    fn subscribe(&self, filter: &str, qos: QoS, handler: Handler) -> Result<(), SubscribeError> {
        let (tx, rx) = mpsc::channel::<Message>();
        thread::Builder::new()
            .name(format!("sub:{}", filter))
            .spawn(move || {
                for msg in rx {
                    handler(msg);
                }
            })
            .map_err(|e| SubscribeError::Rejected {
                filter: filter.to_owned(),
                reason: e.to_string(),
            })?;

        lock(&self.shared.routes).push(Route {
            filter: filter.to_owned(),
            tx,
        });

        self.client
            .clone()
            .subscribe(filter, qos)
            .map_err(|e| SubscribeError::Rejected {
                filter: filter.to_owned(),
                reason: e.to_string(),
            })
    }

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(), PublishError> {
        let (tx, rx) = mpsc::channel();
        *lock(&self.shared.pending) = Some(Pending { qos, tx });

        self.client
            .clone()
            .publish(topic, qos, retain, body.to_vec())
            .map_err(|e| PublishError::Rejected(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.shared.pending).take();
                Err(PublishError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PublishError::Closed),
        }
    }

    fn disconnect(&self) {
        if let Err(e) = self.client.clone().disconnect() {
            warn!("disconnect: {}", e);
        }
        if let Some(pump) = lock(&self.pump).take() {
            if pump.join().is_err() {
                error!("mqtt pump thread panicked");
            }
        }
    }
}
