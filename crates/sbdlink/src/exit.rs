use std::fmt;
use std::io;

use sbdlink_gateway::GatewayError;
use sbdlink_transport::TransportError;

use crate::config::ConfigError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { addr, source } => io_error(&format!("{context} ({addr})"), source),
        TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint(_)
        | TransportError::InvalidHex(_)
        | TransportError::InvalidBase64(_)
        | TransportError::InvalidJson(_)
        | TransportError::InvalidTimestamp(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn config_error(err: ConfigError) -> CliError {
    let code = match &err {
        ConfigError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => USAGE,
        ConfigError::Io { .. } => FAILURE,
        _ => DATA_INVALID,
    };
    CliError::new(code, err.to_string())
}

pub fn gateway_error(context: &str, err: GatewayError) -> CliError {
    match err {
        GatewayError::Transport(err) => transport_error(context, err),
        GatewayError::Task(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn missing_config_is_a_usage_error() {
        let err = config_error(ConfigError::Io {
            path: PathBuf::from("/nope.toml"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("/nope.toml"));

        let err = config_error(ConfigError::Invalid("queue.capacity must be positive".into()));
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn bind_failures_keep_the_address() {
        let err = transport_error(
            "webhook",
            TransportError::Bind {
                addr: ([127, 0, 0, 1], 8080).into(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("webhook (127.0.0.1:8080)"));
    }
}
