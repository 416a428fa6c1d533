//! Vehicle to GCS.
//!
//! Blocks from every channel source arrive on one ingress queue. Each block
//! is classified by the [`DeliveryTracker`] before any reassembly work, then
//! reassembled (framed mode) or parsed in place (raw mode), converted to the
//! GCS protocol version and written to the local endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use sbdlink_frame::{
    decode_frame, OriginId, Reassembled, ReassemblyConfig, Reassembler, WireMode,
};
use sbdlink_proto::{encode, parse_datagram, ProtocolMessage, ProtocolVersionAdapter};
use sbdlink_transport::{InboundBlock, LocalEndpoint};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::events::{EventBus, GatewayEvent};
use crate::tracker::{DeliveryTracker, Verdict};

/// A decoded message ready for the GCS.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub origin: OriginId,
    /// Frame sequence (framed mode) or the channel sequence extended past
    /// its 16-bit wrap (raw mode).
    pub sequence: u32,
    pub message: ProtocolMessage,
}

pub struct InboundPipeline {
    wire_mode: WireMode,
    tracker: DeliveryTracker,
    reassembler: Reassembler,
    adapter: ProtocolVersionAdapter,
    events: EventBus,
    /// Raw-mode sequences for sources that report no MOMSN.
    local_sequences: HashMap<OriginId, u32>,
}

impl InboundPipeline {
    pub fn new(
        wire_mode: WireMode,
        tracker: TrackerConfig,
        reassembly: ReassemblyConfig,
        adapter: ProtocolVersionAdapter,
        events: EventBus,
    ) -> Self {
        Self {
            wire_mode,
            tracker: DeliveryTracker::new(tracker),
            reassembler: Reassembler::new(reassembly),
            adapter,
            events,
            local_sequences: HashMap::new(),
        }
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Process one block. Returns the messages it completed, already in the
    /// GCS protocol version.
    pub fn handle_block(&mut self, block: InboundBlock, now: Instant) -> Vec<InboundMessage> {
        match self.wire_mode {
            WireMode::Framed => self.handle_framed(block, now),
            WireMode::Raw => self.handle_raw(block),
        }
    }

    fn admit(&mut self, origin: &OriginId, sequence: u32) -> bool {
        match self.tracker.check(origin, sequence) {
            Verdict::Fresh => true,
            Verdict::Duplicate => {
                tracing::debug!(%origin, sequence, "duplicate block dropped");
                self.events.emit(GatewayEvent::DuplicateFrame {
                    origin: origin.clone(),
                    sequence,
                });
                false
            }
            Verdict::Stale => {
                let high_water = self.tracker.high_water(origin).unwrap_or(sequence);
                tracing::info!(%origin, sequence, high_water, "stale block dropped");
                self.events.emit(GatewayEvent::StaleFrame {
                    origin: origin.clone(),
                    sequence,
                    high_water,
                });
                false
            }
        }
    }

    fn handle_framed(&mut self, block: InboundBlock, now: Instant) -> Vec<InboundMessage> {
        let frame = match decode_frame(block.origin.clone(), &block.payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(origin = %block.origin, error = %err, "bad frame");
                self.events.emit(GatewayEvent::BadFrame {
                    origin: block.origin,
                    error: err.to_string(),
                });
                return Vec::new();
            }
        };
        if !self.admit(&frame.origin, frame.sequence) {
            return Vec::new();
        }

        tracing::trace!(
            origin = %frame.origin,
            sequence = frame.sequence,
            fragment = frame.fragment_index,
            count = frame.fragment_count,
            "frame received"
        );
        match self.reassembler.on_frame(frame, now) {
            Ok(None) => Vec::new(),
            Ok(Some(Reassembled {
                origin,
                sequence,
                message,
            })) => self.deliver(origin, sequence, vec![message], block.received_at),
            Err(err) => {
                tracing::warn!(origin = %block.origin, error = %err, "reassembly failed");
                self.events.emit(GatewayEvent::DecodeFailed {
                    origin: block.origin,
                    error: err.to_string(),
                });
                Vec::new()
            }
        }
    }

    fn handle_raw(&mut self, block: InboundBlock) -> Vec<InboundMessage> {
        let sequence = match block.sequence_hint {
            Some(momsn) => self.extend_momsn(&block.origin, momsn),
            None => {
                let next = self.local_sequences.entry(block.origin.clone()).or_insert(0);
                let sequence = *next;
                *next = next.wrapping_add(1);
                sequence
            }
        };
        if !self.admit(&block.origin, sequence) {
            return Vec::new();
        }

        let parsed = parse_datagram(&block.payload);
        if parsed.messages.is_empty() {
            let error = parsed
                .errors
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no MAVLink packet in block".to_string());
            tracing::warn!(origin = %block.origin, sequence, error = %error, "raw block undecodable");
            self.events.emit(GatewayEvent::DecodeFailed {
                origin: block.origin,
                error,
            });
            return Vec::new();
        }
        if parsed.skipped > 0 {
            tracing::debug!(origin = %block.origin, skipped = parsed.skipped, "raw block had stray bytes");
        }
        self.deliver(block.origin, sequence, parsed.messages, block.received_at)
    }

    /// MOMSNs are 16-bit and wrap at 65535. Lift one into the tracker's u32
    /// serial space, taking the nearest value to the origin's high-water mark.
    fn extend_momsn(&self, origin: &OriginId, momsn: u32) -> u32 {
        let momsn = momsn as u16;
        match self.tracker.high_water(origin) {
            Some(high) => {
                let delta = momsn.wrapping_sub(high as u16) as i16;
                high.wrapping_add(delta as i32 as u32)
            }
            None => u32::from(momsn),
        }
    }

    fn deliver(
        &mut self,
        origin: OriginId,
        sequence: u32,
        messages: Vec<ProtocolMessage>,
        received_at: SystemTime,
    ) -> Vec<InboundMessage> {
        self.tracker.record(&origin, sequence, received_at);

        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let msg_id = message.msg_id();
            match self.adapter.to_local(message) {
                Ok(message) => out.push(InboundMessage {
                    origin: origin.clone(),
                    sequence,
                    message,
                }),
                Err(err) => {
                    tracing::warn!(%origin, sequence, msg_id, error = %err, "cannot convert for GCS");
                    self.events.emit(GatewayEvent::ConversionFailed {
                        msg_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        out
    }

    /// Purge expired assemblies.
    pub fn sweep(&mut self, now: Instant) {
        for expired in self.reassembler.sweep(now) {
            self.events.emit(GatewayEvent::AssemblyExpired {
                origin: expired.key.origin,
                sequence: expired.key.sequence,
                received: expired.received,
                expected: expired.expected,
            });
        }
        self.events
            .stats()
            .set_evicted(self.reassembler.stats().evicted);
    }

    /// Consume the ingress queue until `cancel` fires or every source is
    /// gone.
    pub async fn run(
        mut self,
        mut ingress: mpsc::Receiver<InboundBlock>,
        endpoint: Arc<LocalEndpoint>,
        sweep_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(mode = ?self.wire_mode, "inbound pipeline started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sweep.tick() => self.sweep(tokio::time::Instant::now().into_std()),
                block = ingress.recv() => {
                    let Some(block) = block else {
                        tracing::info!("ingress closed");
                        return Ok(());
                    };
                    let now = tokio::time::Instant::now().into_std();
                    for inbound in self.handle_block(block, now) {
                        self.forward(&endpoint, inbound).await;
                    }
                }
            }
        }
    }

    async fn forward(&self, endpoint: &LocalEndpoint, inbound: InboundMessage) {
        let msg_id = inbound.message.msg_id();
        let datagram = encode(&inbound.message);
        match endpoint.send(&datagram).await {
            Ok(true) => {
                tracing::debug!(
                    origin = %inbound.origin,
                    sequence = inbound.sequence,
                    msg_id,
                    "message delivered to GCS"
                );
                self.events.emit(GatewayEvent::MessageDelivered {
                    origin: inbound.origin,
                    sequence: inbound.sequence,
                    msg_id,
                });
            }
            Ok(false) => {
                tracing::warn!(origin = %inbound.origin, msg_id, "no GCS address yet, message dropped");
                self.events.emit(GatewayEvent::GcsUnreachable {
                    origin: inbound.origin,
                    msg_id,
                });
            }
            Err(err) => {
                tracing::warn!(origin = %inbound.origin, msg_id, error = %err, "GCS send failed");
                self.events.emit(GatewayEvent::GcsUnreachable {
                    origin: inbound.origin,
                    msg_id,
                });
            }
        }
    }
}
