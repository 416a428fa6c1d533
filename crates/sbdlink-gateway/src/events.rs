//! Observable drops and deliveries.
//!
//! Every per-message outcome goes through [`EventBus::emit`], which bumps the
//! matching [`GatewayStats`] counter and broadcasts the event. Nothing is
//! dropped silently: with no subscriber the counter still moves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sbdlink_frame::OriginId;
use serde::Serialize;
use tokio::sync::broadcast;

/// One gateway outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Inbound message handed to the GCS.
    MessageDelivered {
        origin: OriginId,
        sequence: u32,
        msg_id: u32,
    },
    /// Inbound message decoded but no GCS address is known yet.
    GcsUnreachable { origin: OriginId, msg_id: u32 },
    DuplicateFrame { origin: OriginId, sequence: u32 },
    StaleFrame {
        origin: OriginId,
        sequence: u32,
        high_water: u32,
    },
    /// Block too short or with an unknown header.
    BadFrame { origin: OriginId, error: String },
    DecodeFailed { origin: OriginId, error: String },
    AssemblyExpired {
        origin: OriginId,
        sequence: u32,
        received: usize,
        expected: usize,
    },
    ConversionFailed { msg_id: u32, error: String },
    Filtered { msg_id: u32, reason: String },
    EncodeFailed { msg_id: u32, error: String },
    Backpressure {
        sequence: u32,
        needed: usize,
        available: usize,
    },
    /// Outbound message admitted to the queue.
    Queued {
        sequence: u32,
        msg_id: u32,
        frames: usize,
    },
    FrameSubmitted {
        sequence: u32,
        fragment: u8,
        reference: Option<String>,
        credits: u64,
    },
    DeliveryFailed {
        sequence: u32,
        fragment: u8,
        attempts: u32,
        reason: String,
    },
}

/// Monotonic counters, safe to read from any task.
#[derive(Debug, Default)]
pub struct GatewayStats {
    delivered: AtomicU64,
    gcs_unreachable: AtomicU64,
    duplicates: AtomicU64,
    stale: AtomicU64,
    bad_frames: AtomicU64,
    decode_failed: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    conversion_failed: AtomicU64,
    filtered: AtomicU64,
    encode_failed: AtomicU64,
    backpressure: AtomicU64,
    queued: AtomicU64,
    submitted: AtomicU64,
    delivery_failed: AtomicU64,
    credits: AtomicU64,
}

/// Point-in-time copy of [`GatewayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub gcs_unreachable: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub bad_frames: u64,
    pub decode_failed: u64,
    pub expired: u64,
    pub evicted: u64,
    pub conversion_failed: u64,
    pub filtered: u64,
    pub encode_failed: u64,
    pub backpressure: u64,
    pub queued: u64,
    pub submitted: u64,
    pub delivery_failed: u64,
    pub credits: u64,
}

impl GatewayStats {
    fn count(&self, event: &GatewayEvent) {
        let counter = match event {
            GatewayEvent::MessageDelivered { .. } => &self.delivered,
            GatewayEvent::GcsUnreachable { .. } => &self.gcs_unreachable,
            GatewayEvent::DuplicateFrame { .. } => &self.duplicates,
            GatewayEvent::StaleFrame { .. } => &self.stale,
            GatewayEvent::BadFrame { .. } => &self.bad_frames,
            GatewayEvent::DecodeFailed { .. } => &self.decode_failed,
            GatewayEvent::AssemblyExpired { .. } => &self.expired,
            GatewayEvent::ConversionFailed { .. } => &self.conversion_failed,
            GatewayEvent::Filtered { .. } => &self.filtered,
            GatewayEvent::EncodeFailed { .. } => &self.encode_failed,
            GatewayEvent::Backpressure { .. } => &self.backpressure,
            GatewayEvent::Queued { .. } => &self.queued,
            GatewayEvent::FrameSubmitted { credits, .. } => {
                self.credits.fetch_add(*credits, Ordering::Relaxed);
                &self.submitted
            }
            GatewayEvent::DeliveryFailed { .. } => &self.delivery_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reassembly evictions are counted by the reassembler; mirror its total.
    pub(crate) fn set_evicted(&self, total: u64) {
        self.evicted.store(total, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            delivered: load(&self.delivered),
            gcs_unreachable: load(&self.gcs_unreachable),
            duplicates: load(&self.duplicates),
            stale: load(&self.stale),
            bad_frames: load(&self.bad_frames),
            decode_failed: load(&self.decode_failed),
            expired: load(&self.expired),
            evicted: load(&self.evicted),
            conversion_failed: load(&self.conversion_failed),
            filtered: load(&self.filtered),
            encode_failed: load(&self.encode_failed),
            backpressure: load(&self.backpressure),
            queued: load(&self.queued),
            submitted: load(&self.submitted),
            delivery_failed: load(&self.delivery_failed),
            credits: load(&self.credits),
        }
    }
}

/// Shared by every pipeline task.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
    stats: Arc<GatewayStats>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            stats: Arc::default(),
        }
    }

    pub fn emit(&self, event: GatewayEvent) {
        self.stats.count(&event);
        // No subscribers is fine; the counters still record the outcome.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_counts_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(GatewayEvent::Filtered {
            msg_id: 0,
            reason: "heartbeat".into(),
        });
        bus.emit(GatewayEvent::FrameSubmitted {
            sequence: 1,
            fragment: 0,
            reference: None,
            credits: 3,
        });
        let snap = bus.stats().snapshot();
        assert_eq!(snap.filtered, 1);
        assert_eq!(snap.submitted, 1);
        assert_eq!(snap.credits, 3);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(GatewayEvent::DuplicateFrame {
            origin: OriginId::new("imei"),
            sequence: 9,
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayEvent::DuplicateFrame {
                origin: OriginId::new("imei"),
                sequence: 9,
            }
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&GatewayEvent::Queued {
            sequence: 4,
            msg_id: 76,
            frames: 1,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"queued","sequence":4,"msg_id":76,"frames":1}"#);
    }
}
