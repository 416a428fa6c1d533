//! Inbound reassembly of fragmented messages.
//!
//! Assemblies live in a fixed-size arena of slots, indexed by
//! `(origin, sequence)`. Slots are released explicitly on completion, expiry,
//! parse failure or eviction, so memory stays bounded under sustained
//! duplicate or garbage traffic.
//!
//! Keys of retired assemblies (completed or expired) are remembered in a
//! bounded tombstone ring. A late fragment of a retired message is dropped
//! instead of opening a new assembly, so an expired message never emits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use sbdlink_proto::{decode_exact, ProtocolMessage, ProtocolVersion};

use crate::codec::{Frame, DEFAULT_MAX_FRAGMENTS};
use crate::error::DecodeError;
use crate::origin::OriginId;

/// Reassembler configuration.
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Age after which an incomplete assembly is purged. Default: 180 s
    /// (worst-case channel latency of 60 s per fragment plus margin).
    pub timeout: Duration,
    /// Arena slots. Default: 64.
    pub max_assemblies: usize,
    /// Largest fragment count accepted from the channel. Default: 8.
    pub max_fragments: usize,
    /// Retired keys remembered to reject late fragments. Default: 1024.
    pub tombstones: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            max_assemblies: 64,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            tombstones: 1024,
        }
    }
}

/// Key identifying one message in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyKey {
    pub origin: OriginId,
    pub sequence: u32,
}

/// A message whose fragments all arrived and parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reassembled {
    pub origin: OriginId,
    pub sequence: u32,
    pub message: ProtocolMessage,
}

/// An assembly purged before completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredAssembly {
    pub key: AssemblyKey,
    pub received: usize,
    pub expected: usize,
    pub age: Duration,
}

/// Reassembler statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub frames_received: u64,
    pub messages_completed: u64,
    /// Second copies of a fragment already held.
    pub duplicate_fragments: u64,
    /// Fragments of an already completed or expired message.
    pub late_fragments: u64,
    pub expired: u64,
    /// Assemblies dropped to make room in a full arena.
    pub evicted: u64,
    pub mismatched: u64,
    pub malformed: u64,
    /// Current occupied slots.
    pub pending: usize,
}

#[derive(Debug)]
struct Assembly {
    key: AssemblyKey,
    version: ProtocolVersion,
    chunks: Vec<Option<Bytes>>,
    received: usize,
    created_at: Instant,
}

impl Assembly {
    fn new(key: AssemblyKey, frame: &Frame, now: Instant) -> Self {
        Self {
            key,
            version: frame.version,
            chunks: vec![None; frame.fragment_count as usize],
            received: 0,
            created_at: now,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    fn concat(&self) -> Bytes {
        let len = self.chunks.iter().flatten().map(Bytes::len).sum();
        let mut packet = BytesMut::with_capacity(len);
        for chunk in self.chunks.iter().flatten() {
            packet.extend_from_slice(chunk);
        }
        packet.freeze()
    }
}

/// Inbound half of the frame codec.
pub struct Reassembler {
    config: ReassemblyConfig,
    slots: Vec<Option<Assembly>>,
    index: HashMap<AssemblyKey, usize>,
    free: Vec<usize>,
    retired: HashSet<AssemblyKey>,
    retired_order: VecDeque<AssemblyKey>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new(config: ReassemblyConfig) -> Self {
        let capacity = config.max_assemblies.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
            free: (0..capacity).rev().collect(),
            retired: HashSet::new(),
            retired_order: VecDeque::new(),
            stats: ReassemblyStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    pub fn stats(&self) -> ReassemblyStats {
        let mut stats = self.stats.clone();
        stats.pending = self.index.len();
        stats
    }

    pub fn pending_count(&self) -> usize {
        self.index.len()
    }

    /// Feed one inbound frame.
    ///
    /// Returns `Ok(Some(_))` when the frame completes its message. A duplicate
    /// fragment keeps the first copy and returns `Ok(None)`.
    pub fn on_frame(
        &mut self,
        frame: Frame,
        now: Instant,
    ) -> Result<Option<Reassembled>, DecodeError> {
        self.stats.frames_received += 1;

        let key = AssemblyKey {
            origin: frame.origin.clone(),
            sequence: frame.sequence,
        };

        if self.retired.contains(&key) {
            self.stats.late_fragments += 1;
            tracing::debug!(
                origin = %key.origin,
                sequence = key.sequence,
                fragment = frame.fragment_index,
                "fragment for retired message dropped"
            );
            return Ok(None);
        }

        if frame.fragment_count == 0 || frame.fragment_index >= frame.fragment_count {
            self.stats.mismatched += 1;
            return Err(DecodeError::InvalidFragment {
                origin: key.origin,
                sequence: key.sequence,
                index: frame.fragment_index,
                count: frame.fragment_count,
            });
        }

        if frame.fragment_count as usize > self.config.max_fragments {
            self.stats.mismatched += 1;
            return Err(DecodeError::TooManyFragments {
                origin: key.origin,
                sequence: key.sequence,
                count: frame.fragment_count,
                max: self.config.max_fragments,
            });
        }

        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => self.open(key.clone(), &frame, now),
        };
        let Some(assembly) = self.slots[slot].as_mut() else {
            // Index pointed at an empty slot; drop the stale entry.
            self.index.remove(&key);
            self.free.push(slot);
            return Ok(None);
        };

        if assembly.chunks.len() != frame.fragment_count as usize
            || assembly.version != frame.version
        {
            self.stats.mismatched += 1;
            return Err(DecodeError::FragmentMismatch {
                origin: key.origin,
                sequence: key.sequence,
                expected_count: assembly.chunks.len() as u8,
                found_count: frame.fragment_count,
                expected_version: assembly.version.tag(),
                found_version: frame.version.tag(),
            });
        }

        let index = frame.fragment_index as usize;
        if assembly.chunks[index].is_some() {
            self.stats.duplicate_fragments += 1;
            tracing::trace!(
                origin = %key.origin,
                sequence = key.sequence,
                fragment = index,
                "duplicate fragment ignored"
            );
            return Ok(None);
        }
        assembly.chunks[index] = Some(frame.payload);
        assembly.received += 1;

        if !assembly.is_complete() {
            return Ok(None);
        }

        let packet = assembly.concat();
        let version = assembly.version;
        self.release(slot);
        self.retire(key.clone());

        match decode_exact(&packet, version) {
            Ok(message) => {
                self.stats.messages_completed += 1;
                Ok(Some(Reassembled {
                    origin: key.origin,
                    sequence: key.sequence,
                    message,
                }))
            }
            Err(source) => {
                self.stats.malformed += 1;
                Err(DecodeError::Malformed {
                    origin: key.origin,
                    sequence: key.sequence,
                    source,
                })
            }
        }
    }

    /// Purge assemblies older than the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<ExpiredAssembly> {
        let timeout = self.config.timeout;
        let expired_slots: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry
                    .as_ref()
                    .filter(|a| now.saturating_duration_since(a.created_at) >= timeout)
                    .map(|_| slot)
            })
            .collect();

        let mut expired = Vec::with_capacity(expired_slots.len());
        for slot in expired_slots {
            if let Some(assembly) = self.release(slot) {
                self.stats.expired += 1;
                tracing::info!(
                    origin = %assembly.key.origin,
                    sequence = assembly.key.sequence,
                    received = assembly.received,
                    expected = assembly.chunks.len(),
                    "incomplete message expired"
                );
                self.retire(assembly.key.clone());
                expired.push(ExpiredAssembly {
                    age: now.saturating_duration_since(assembly.created_at),
                    received: assembly.received,
                    expected: assembly.chunks.len(),
                    key: assembly.key,
                });
            }
        }
        expired
    }

    fn open(&mut self, key: AssemblyKey, frame: &Frame, now: Instant) -> usize {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => self.evict_oldest(),
        };
        self.index.insert(key.clone(), slot);
        self.slots[slot] = Some(Assembly::new(key, frame, now));
        slot
    }

    fn evict_oldest(&mut self) -> usize {
        let oldest = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|a| (slot, a.created_at)))
            .min_by_key(|(_, created_at)| *created_at)
            .map(|(slot, _)| slot)
            .unwrap_or(0);

        if let Some(assembly) = self.release(oldest) {
            self.stats.evicted += 1;
            tracing::warn!(
                origin = %assembly.key.origin,
                sequence = assembly.key.sequence,
                "reassembly arena full, evicted oldest message"
            );
        }
        // release() pushed the slot back on the free list.
        self.free.pop().unwrap_or(oldest)
    }

    fn release(&mut self, slot: usize) -> Option<Assembly> {
        let assembly = self.slots[slot].take()?;
        self.index.remove(&assembly.key);
        self.free.push(slot);
        Some(assembly)
    }

    fn retire(&mut self, key: AssemblyKey) {
        if self.config.tombstones == 0 || !self.retired.insert(key.clone()) {
            return;
        }
        self.retired_order.push_back(key);
        while self.retired_order.len() > self.config.tombstones {
            if let Some(old) = self.retired_order.pop_front() {
                self.retired.remove(&old);
            }
        }
    }
}
