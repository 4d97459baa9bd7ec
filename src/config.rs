use crate::error::ConfigError;
use clap::Parser;
use rumqttc::QoS;
use url::Url;

pub const DEFAULT_URL: &str = "tcp://localhost:1883";
pub const UNBOUNDED: usize = i32::MAX as usize;

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;

/// Connect to an MQTT broker, optionally subscribe and publish, and exit
/// once enough messages have been received.
#[derive(Parser, Debug, Clone)]
#[command(name = "mqtt-probe", version)]
pub struct Args {
    /// Display debug messages, including the client library's
    #[arg(long)]
    pub debug: bool,

    /// Only consider live (non-retained) messages
    #[arg(long)]
    pub ignore_retained: bool,

    /// Allow TLS connections without certificate and hostname validation
    #[arg(long)]
    pub insecure: bool,

    /// Only print a summary line per message
    #[arg(long)]
    pub ignore_payload: bool,

    /// The server url to connect to
    #[arg(long, default_value = DEFAULT_URL)]
    pub url: String,

    /// The topic(s) to subscribe to (may be a comma separated list)
    #[arg(long, default_value = "")]
    pub sub: String,

    /// The mqtt client id to use
    #[arg(long)]
    pub clientid: Option<String>,

    /// The mqtt username to use
    #[arg(long)]
    pub username: Option<String>,

    /// The mqtt password to use
    #[arg(long)]
    pub password: Option<String>,

    /// The topic to publish to (after subscriptions have been set up)
    #[arg(long = "pub")]
    pub publish: Option<String>,

    /// The message to publish on the --pub topic
    #[arg(long, default_value = "")]
    pub msg: String,

    /// Number of messages to receive before exiting
    #[arg(long, default_value_t = UNBOUNDED)]
    pub msg_count: usize,

    /// QoS for publishes and subscriptions
    #[arg(long, default_value_t = 0)]
    pub qos: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub body: String,
}

/// Everything a session needs, resolved once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub broker: Broker,
    pub filters: Vec<String>,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub qos: QoS,
    pub insecure: bool,
    pub ignore_retained: bool,
    pub ignore_payload: bool,
    pub expected: usize,
    pub publication: Option<Publication>,
}

impl SessionConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let client_id = match args.clientid.as_deref() {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => generate_client_id(),
        };

        let credentials = match args.username.as_deref() {
            Some(name) if !name.is_empty() => Some(Credentials {
                username: name.to_owned(),
                password: args.password.clone().unwrap_or_default(),
            }),
            _ => None,
        };

        let publication = match args.publish.as_deref() {
            Some(topic) if !topic.is_empty() => Some(Publication {
                topic: topic.to_owned(),
                body: args.msg.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            broker: parse_broker(&args.url)?,
            filters: split_filters(&args.sub),
            client_id,
            credentials,
            qos: parse_qos(args.qos)?,
            insecure: args.insecure,
            ignore_retained: args.ignore_retained,
            ignore_payload: args.ignore_payload,
            expected: args.msg_count,
            publication,
        })
    }
}

pub fn split_filters(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|f| !f.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn parse_qos(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        n => Err(ConfigError::Qos(n)),
    }
}

pub fn parse_broker(raw: &str) -> Result<Broker, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::Url {
        url: raw.to_owned(),
        source,
    })?;

    let (scheme, default_port) = match url.scheme() {
        "tcp" | "mqtt" => (Scheme::Tcp, PLAIN_PORT),
        "ssl" | "tls" | "tcps" | "mqtts" => (Scheme::Tls, TLS_PORT),
        other => return Err(ConfigError::Scheme(other.to_owned())),
    };

    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.trim_start_matches('[').trim_end_matches(']'),
        _ => return Err(ConfigError::NoHost(raw.to_owned())),
    };

    Ok(Broker {
        scheme,
        host: host.to_owned(),
        port: url.port().unwrap_or(default_port),
    })
}

fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("mqtt-probe-{}", &id[..8])
}
