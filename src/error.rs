use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid broker url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme {0:?} (expected tcp, mqtt, ssl, tls, tcps or mqtts)")]
    Scheme(String),
    #[error("broker url {0:?} has no host")]
    NoHost(String),
    #[error("invalid qos {0} (expected 0, 1 or 2)")]
    Qos(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("{0}")]
    Transport(String),
    #[error("tls: {0}")]
    Tls(String),
    #[error("no connection confirmation within {0:?}")]
    Timeout(Duration),
    #[error("connection closed before it was confirmed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish rejected by client: {0}")]
    Rejected(String),
    #[error("no publish confirmation within {0:?}")]
    Timeout(Duration),
    #[error("connection closed while publishing")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed gzip payload on {topic:?}: {source}")]
pub struct DecodeError {
    pub topic: String,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Could not connect: {0}")]
    Connect(#[from] ConnectError),
    #[error("Could not publish: {0}")]
    Publish(#[from] PublishError),
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("subscribe to {filter:?} failed: {reason}")]
    Rejected { filter: String, reason: String },
}
