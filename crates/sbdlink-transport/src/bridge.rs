//! Datagram relay to an external broker session.
//!
//! The MQTT/TLS session itself runs in a companion process. Each datagram in
//! either direction is one JSON-encoded [`BrokerPublication`]: MT envelopes
//! are sent to `peer`, MO publications are received on `bind`.

use std::net::SocketAddr;

use sbdlink_frame::OriginId;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::block::IngressSender;
use crate::broker::{inbound_block, BrokerPublication, BrokerTopics};
use crate::error::{Result, TransportError};

const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind: SocketAddr,
    pub peer: SocketAddr,
    pub topics: BrokerTopics,
    /// Modem the MO topic belongs to.
    pub origin: OriginId,
}

pub struct BrokerBridge {
    socket: UdpSocket,
    config: BridgeConfig,
}

impl BrokerBridge {
    pub async fn bind(config: BridgeConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.bind,
                source,
            })?;
        Ok(Self { socket, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Relay until `cancel` fires or the outgoing side closes.
    pub async fn run(
        self,
        mut outgoing: mpsc::Receiver<BrokerPublication>,
        ingress: IngressSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mo_topic = self.config.topics.mo();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tracing::info!(
            bind = %self.config.bind,
            peer = %self.config.peer,
            topic = %mo_topic,
            "broker bridge started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                publication = outgoing.recv() => {
                    let Some(publication) = publication else {
                        return Ok(());
                    };
                    let datagram = serde_json::to_vec(&publication)?;
                    self.socket.send_to(&datagram, self.config.peer).await?;
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    let publication: BrokerPublication = match serde_json::from_slice(&buf[..len]) {
                        Ok(p) => p,
                        Err(err) => {
                            tracing::warn!(%from, error = %err, "unparseable bridge datagram");
                            continue;
                        }
                    };
                    if publication.topic != mo_topic {
                        tracing::debug!(topic = %publication.topic, "ignoring publication");
                        continue;
                    }
                    match inbound_block(&self.config.origin, &publication) {
                        Ok(Some(block)) => {
                            if ingress.send(block).await.is_err() {
                                return Err(TransportError::Closed("ingress"));
                            }
                        }
                        Ok(None) => {}
                        Err(err) => tracing::warn!(error = %err, "bad MO envelope"),
                    }
                }
            }
        }
    }
}
