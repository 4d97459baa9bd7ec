use clap::Parser;
use mqtt_probe::{Args, SessionConfig, SessionError};
use std::process::ExitCode;

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_CONNECT_ERROR: u8 = 2;
const EXIT_PUBLISH_ERROR: u8 = 3;

fn main() -> ExitCode {
    let args = Args::parse();
    mqtt_probe::logger::init(args.debug);

    let config = match SessionConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match mqtt_probe::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(exit_code(&e)),
    }
}

fn exit_code(e: &SessionError) -> u8 {
    match e {
        SessionError::Connect(_) => EXIT_CONNECT_ERROR,
        SessionError::Publish(_) => EXIT_PUBLISH_ERROR,
    }
}
