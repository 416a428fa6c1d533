use std::net::SocketAddr;

/// Errors raised by channel adapters and the local endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error on a socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP request itself failed (DNS, TLS, connection, body).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote service answered with a non-success status.
    #[error("HTTP status {status} from {service}")]
    HttpStatus {
        service: &'static str,
        status: reqwest::StatusCode,
    },

    /// Hex payload could not be decoded.
    #[error("invalid hex data: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Base64 payload could not be decoded.
    #[error("invalid base64 data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A JSON document had the wrong shape.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A delivery timestamp could not be parsed.
    #[error("invalid transmit time {0:?}")]
    InvalidTimestamp(String),

    /// An endpoint string is not `udpin:<ip>:<port>` or `udpout:<ip>:<port>`.
    #[error("invalid endpoint {0:?} (expected udpin:<ip>:<port> or udpout:<ip>:<port>)")]
    InvalidEndpoint(String),

    /// The receiving side of a channel is gone.
    #[error("{0} channel closed")]
    Closed(&'static str),
}

impl TransportError {
    /// Socket errors a UDP receive loop should log and survive. A GCS that
    /// is not listening yet surfaces as a refused or reset connection.
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            TransportError::Io(err) => matches!(
                err.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::WouldBlock
                    | ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind};

    use super::*;

    #[test]
    fn refused_and_reset_are_transient() {
        for kind in [
            ErrorKind::ConnectionRefused,
            ErrorKind::ConnectionReset,
            ErrorKind::WouldBlock,
            ErrorKind::Interrupted,
        ] {
            assert!(TransportError::from(Error::from(kind)).is_transient(), "{kind:?}");
        }
    }

    #[test]
    fn other_errors_are_fatal() {
        assert!(!TransportError::from(Error::from(ErrorKind::PermissionDenied)).is_transient());
        assert!(!TransportError::Closed("ingress").is_transient());
    }
}
