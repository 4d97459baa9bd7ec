pub mod barrier;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod logger;
pub mod mqtt;
pub mod pipeline;
pub mod session;

pub use barrier::CompletionBarrier;
pub use config::{Args, SessionConfig};
pub use error::{ConfigError, ConnectError, DecodeError, PublishError, SessionError};
pub use session::{Session, State};

/// Runs one probe session against a real broker, writing payloads to stdout.
pub fn run(config: &SessionConfig) -> Result<(), SessionError> {
    Session::new(mqtt::MqttConnector).run(config, Box::new(std::io::stdout()))
}
