//! Inbound duplicate and staleness suppression.
//!
//! The channel may deliver the same block several times and long after
//! newer traffic. The tracker remembers the last `window` delivered
//! `(origin, sequence)` pairs and, per origin, the highest sequence seen.
//! Sequences compare with serial-number arithmetic so a wrap from
//! `u32::MAX` to 0 counts as moving forward.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::SystemTime;

use sbdlink_frame::OriginId;

use crate::config::TrackerConfig;

/// Outcome of [`DeliveryTracker::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Fresh,
    /// Already delivered.
    Duplicate,
    /// Too far behind the origin's high-water mark.
    Stale,
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub origin: OriginId,
    pub sequence: u32,
    pub received_at: SystemTime,
}

#[derive(Debug)]
pub struct DeliveryTracker {
    config: TrackerConfig,
    ring: VecDeque<DeliveryRecord>,
    seen: HashSet<(OriginId, u32)>,
    high_water: HashMap<OriginId, u32>,
}

/// `a` is ahead of `b` in serial-number order.
fn is_ahead(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

impl DeliveryTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            ring: VecDeque::with_capacity(config.window),
            seen: HashSet::with_capacity(config.window),
            high_water: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Highest sequence delivered for `origin`.
    pub fn high_water(&self, origin: &OriginId) -> Option<u32> {
        self.high_water.get(origin).copied()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Classify a sequence without changing any state.
    pub fn check(&self, origin: &OriginId, sequence: u32) -> Verdict {
        if self.seen.contains(&(origin.clone(), sequence)) {
            return Verdict::Duplicate;
        }
        match self.high_water.get(origin) {
            Some(&high) if is_ahead(high, sequence) => {
                if high.wrapping_sub(sequence) > self.config.staleness_margin {
                    Verdict::Stale
                } else {
                    Verdict::Fresh
                }
            }
            _ => Verdict::Fresh,
        }
    }

    /// Remember a fully delivered message. Recording the same pair twice is
    /// a no-op.
    pub fn record(&mut self, origin: &OriginId, sequence: u32, received_at: SystemTime) {
        if self.config.window == 0 {
            self.advance(origin, sequence);
            return;
        }
        if !self.seen.insert((origin.clone(), sequence)) {
            return;
        }
        self.ring.push_back(DeliveryRecord {
            origin: origin.clone(),
            sequence,
            received_at,
        });
        while self.ring.len() > self.config.window {
            if let Some(old) = self.ring.pop_front() {
                self.seen.remove(&(old.origin, old.sequence));
            }
        }
        self.advance(origin, sequence);
    }

    fn advance(&mut self, origin: &OriginId, sequence: u32) {
        match self.high_water.get_mut(origin) {
            Some(high) => {
                if is_ahead(sequence, *high) {
                    *high = sequence;
                }
            }
            None => {
                self.high_water.insert(origin.clone(), sequence);
            }
        }
    }
}
