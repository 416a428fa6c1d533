use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Mutex;

use tokio::net::UdpSocket;

use crate::error::{Result, TransportError};

/// Largest MAVLink datagram accepted from the GCS.
pub const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// Bind the address; reply to whoever sent the latest datagram.
    UdpIn,
    /// Send to a fixed peer from an ephemeral port.
    UdpOut,
}

/// Parsed `udpin:<ip>:<port>` / `udpout:<ip>:<port>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    pub mode: EndpointMode,
    pub addr: SocketAddr,
}

impl FromStr for EndpointSpec {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TransportError::InvalidEndpoint(s.to_string());
        let (mode, addr) = s.split_once(':').ok_or_else(invalid)?;
        let mode = match mode.to_ascii_lowercase().as_str() {
            "udpin" => EndpointMode::UdpIn,
            "udpout" => EndpointMode::UdpOut,
            _ => return Err(invalid()),
        };
        let addr = addr.parse::<SocketAddr>().map_err(|_| invalid())?;
        Ok(Self { mode, addr })
    }
}

impl fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            EndpointMode::UdpIn => "udpin",
            EndpointMode::UdpOut => "udpout",
        };
        write!(f, "{mode}:{}", self.addr)
    }
}

/// UDP socket facing the GCS.
///
/// Shared between the reader task and the inbound pipeline; all methods take
/// `&self`.
#[derive(Debug)]
pub struct LocalEndpoint {
    socket: UdpSocket,
    spec: EndpointSpec,
    peer: Mutex<Option<SocketAddr>>,
}

impl LocalEndpoint {
    pub async fn bind(spec: EndpointSpec) -> Result<Self> {
        let (bind, peer) = match spec.mode {
            EndpointMode::UdpIn => (spec.addr, None),
            EndpointMode::UdpOut => {
                let any: SocketAddr = if spec.addr.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                (any, Some(spec.addr))
            }
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|source| TransportError::Bind { addr: bind, source })?;
        tracing::info!(endpoint = %spec, local = ?socket.local_addr().ok(), "local endpoint ready");
        Ok(Self {
            socket,
            spec,
            peer: Mutex::new(peer),
        })
    }

    pub fn spec(&self) -> EndpointSpec {
        self.spec
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Current GCS address, if known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.lock().ok().and_then(|peer| *peer)
    }

    /// Receive one datagram from the GCS.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let (len, from) = self.socket.recv_from(buf).await?;
        if self.spec.mode == EndpointMode::UdpIn {
            if let Ok(mut peer) = self.peer.lock() {
                if *peer != Some(from) {
                    tracing::info!(gcs = %from, "GCS address learned");
                    *peer = Some(from);
                }
            }
        }
        Ok(len)
    }

    /// Send one datagram to the GCS. Returns `false` when no GCS has been
    /// heard from yet (udpin only).
    pub async fn send(&self, datagram: &[u8]) -> Result<bool> {
        let Some(peer) = self.peer() else {
            return Ok(false);
        };
        self.socket.send_to(datagram, peer).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoint_strings() {
        let spec: EndpointSpec = "udpin:127.0.0.1:16000".parse().unwrap();
        assert_eq!(spec.mode, EndpointMode::UdpIn);
        assert_eq!(spec.addr.port(), 16000);
        assert_eq!(spec.to_string(), "udpin:127.0.0.1:16000");

        let out: EndpointSpec = "UDPOUT:10.0.0.2:14550".parse().unwrap();
        assert_eq!(out.mode, EndpointMode::UdpOut);

        assert!("tcp:127.0.0.1:1".parse::<EndpointSpec>().is_err());
        assert!("udpin:localhost".parse::<EndpointSpec>().is_err());
    }

    #[tokio::test]
    async fn udpin_replies_to_latest_sender() {
        let endpoint = LocalEndpoint::bind("udpin:127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = endpoint.local_addr().unwrap();
        assert!(!endpoint.send(b"early").await.unwrap());

        let gcs = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        gcs.send_to(b"hello", addr).await.unwrap();
        let mut buf = [0u8; 64];
        let len = endpoint.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(endpoint.peer(), Some(gcs.local_addr().unwrap()));

        assert!(endpoint.send(b"reply").await.unwrap());
        let (len, _) = gcs.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"reply");
    }

    #[tokio::test]
    async fn udpout_sends_to_fixed_peer() {
        let gcs = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let spec = EndpointSpec {
            mode: EndpointMode::UdpOut,
            addr: gcs.local_addr().unwrap(),
        };
        let endpoint = LocalEndpoint::bind(spec).await.unwrap();
        assert!(endpoint.send(b"telemetry").await.unwrap());
        let mut buf = [0u8; 64];
        let (len, _) = gcs.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"telemetry");
    }
}
