//! GCS to vehicle.
//!
//! Every packet the GCS sends passes the command filter before any framing
//! work. Survivors are converted to the channel version, split into blocks
//! and admitted to the [`OutboundQueue`] as a unit.

use std::sync::Arc;

use sbdlink_filter::{CommandFilter, Filtered};
use sbdlink_frame::{EncodedMessage, FrameEncoder};
use sbdlink_proto::{parse_datagram, ProtocolMessage, ProtocolVersionAdapter};
use sbdlink_transport::udp::MAX_DATAGRAM;
use sbdlink_transport::{LocalEndpoint, Result as TransportResult};
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};
use crate::events::{EventBus, GatewayEvent};
use crate::queue::OutboundQueue;

pub struct OutboundPipeline {
    filter: CommandFilter,
    adapter: ProtocolVersionAdapter,
    encoder: FrameEncoder,
    queue: Arc<OutboundQueue>,
    events: EventBus,
}

impl OutboundPipeline {
    pub fn new(
        filter: CommandFilter,
        adapter: ProtocolVersionAdapter,
        encoder: FrameEncoder,
        queue: Arc<OutboundQueue>,
        events: EventBus,
    ) -> Self {
        Self {
            filter,
            adapter,
            encoder,
            queue,
            events,
        }
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    /// Filter, convert, frame and enqueue one message.
    ///
    /// Every error is also emitted as a [`GatewayEvent`].
    pub fn handle_message(&mut self, msg: ProtocolMessage) -> Result<EncodedMessage> {
        let msg_id = msg.msg_id();

        if let Err(filtered) = self.filter.check(&msg) {
            match filtered {
                Filtered::UnsupportedType { .. } => {
                    tracing::trace!(msg_id, "message type not forwarded")
                }
                Filtered::DisallowedCommand { command } => {
                    tracing::warn!(msg_id, command, "command refused by allow-list")
                }
            }
            self.events.emit(GatewayEvent::Filtered {
                msg_id,
                reason: filtered.to_string(),
            });
            return Err(filtered.into());
        }

        let msg = self.adapter.to_channel(msg).map_err(|err| {
            tracing::warn!(msg_id, error = %err, "cannot convert for channel");
            self.events.emit(GatewayEvent::ConversionFailed {
                msg_id,
                error: err.to_string(),
            });
            GatewayError::from(err)
        })?;

        let encoded = self.encoder.encode(&msg).map_err(|err| {
            tracing::warn!(msg_id, error = %err, "cannot frame message");
            self.events.emit(GatewayEvent::EncodeFailed {
                msg_id,
                error: err.to_string(),
            });
            GatewayError::from(err)
        })?;

        if let Err(full) = self.queue.enqueue(&encoded) {
            tracing::warn!(
                sequence = encoded.sequence,
                msg_id,
                needed = full.needed,
                available = full.available,
                "outbound queue full, message dropped"
            );
            self.events.emit(GatewayEvent::Backpressure {
                sequence: encoded.sequence,
                needed: full.needed,
                available: full.available,
            });
            return Err(full.into());
        }

        tracing::info!(
            sequence = encoded.sequence,
            msg_id,
            name = msg.body.name(),
            frames = encoded.fragment_count(),
            wire_len = encoded.wire_len,
            "command queued"
        );
        self.events.emit(GatewayEvent::Queued {
            sequence: encoded.sequence,
            msg_id,
            frames: encoded.fragment_count(),
        });
        Ok(encoded)
    }

    /// Handle every packet in one GCS datagram. Returns how many were queued.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> usize {
        let parsed = parse_datagram(datagram);
        for err in &parsed.errors {
            tracing::debug!(error = %err, "unparseable packet from GCS");
        }
        parsed
            .messages
            .into_iter()
            .map(|msg| self.handle_message(msg))
            .filter(Result::is_ok)
            .count()
    }

    /// Read GCS datagrams until `cancel` fires.
    pub async fn run(mut self, endpoint: Arc<LocalEndpoint>, cancel: CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tracing::info!(endpoint = %endpoint.spec(), "outbound pipeline started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = endpoint.recv(&mut buf) => self.on_received(received, &buf)?,
            }
        }
    }

    /// Handle one receive result. Transient socket errors are logged and
    /// skipped, anything else stops the pipeline.
    fn on_received(&mut self, received: TransportResult<usize>, buf: &[u8]) -> Result<()> {
        match received {
            Ok(len) => {
                self.handle_datagram(&buf[..len]);
                Ok(())
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "GCS receive failed, continuing");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
