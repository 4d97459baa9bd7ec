//! The seam between the session and whatever pub/sub client library carries
//! it. The session only needs to connect, subscribe with a delivery handler,
//! publish once and disconnect.

use crate::config::SessionConfig;
use crate::error::{ConnectError, PublishError, SubscribeError};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;

/// One inbound delivery. Lives for a single pass through the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

/// Invoked once per delivered message, possibly from several threads at once.
pub type Handler = Arc<dyn Fn(Message) + Send + Sync>;

pub trait Connection: Send + Sync {
    fn subscribe(&self, filter: &str, qos: QoS, handler: Handler) -> Result<(), SubscribeError>;

    /// Blocks until the library confirms the publish or `timeout` passes.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(), PublishError>;

    fn disconnect(&self);
}

pub trait Connector {
    type Conn: Connection;

    /// Blocks until the broker confirms the connection or `timeout` passes.
    fn connect(&self, config: &SessionConfig, timeout: Duration)
        -> Result<Self::Conn, ConnectError>;
}

/// Drops the `$share/<group>/` prefix of a shared subscription, brokers
/// deliver such messages under their plain topic name.
pub fn strip_share(filter: &str) -> &str {
    match filter.strip_prefix("$share/") {
        Some(rest) => rest.split_once('/').map_or(rest, |(_, f)| f),
        None => filter,
    }
}

/// MQTT topic filter matching, `+` for one level and `#` for the rest.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter = strip_share(filter);

    // wildcards never match topics starting with '$' at the first level
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match (part, levels.next()) {
            ("#", _) => return true,
            ("+", Some(_)) => {}
            (p, Some(l)) if p == l => {}
            _ => return false,
        }
    }
    levels.next().is_none()
}
