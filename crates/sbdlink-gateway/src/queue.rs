//! Bounded outbound queue and its single drain task.
//!
//! ```text
//!  outbound pipeline ──enqueue(all frames or none)──▶ [ VecDeque<OutboundFrame> ]
//!                                                           │ one block at a time
//!                                                           ▼
//!                                   pace ─▶ submit (timeout) ─▶ retry w/ backoff
//! ```
//!
//! A retry waits for the submit interval plus the backoff, both counted from
//! the previous attempt.
//!
//! In raw wire mode whole packets queued back to back are packed into one
//! block up to the channel block size, so small commands share SBD credits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use sbdlink_frame::EncodedMessage;
use sbdlink_transport::{Submission, Uplink};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::error::Backpressure;
use crate::events::{EventBus, GatewayEvent};

/// One block waiting for the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub sequence: u32,
    pub fragment_index: u8,
    pub fragment_count: u8,
    pub msg_id: u32,
    pub block: Bytes,
}

#[derive(Debug)]
pub struct OutboundQueue {
    config: QueueConfig,
    frames: Mutex<VecDeque<OutboundFrame>>,
    notify: Notify,
    /// Block size that consecutive whole packets may be packed into.
    pack_limit: Option<usize>,
}

impl OutboundQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(config.capacity)),
            notify: Notify::new(),
            config,
            pack_limit: None,
        }
    }

    /// Pack consecutive unfragmented frames into blocks of up to
    /// `max_block_size` bytes. Only valid for headerless (raw) blocks.
    pub fn packing_whole_packets(mut self, max_block_size: usize) -> Self {
        self.pack_limit = Some(max_block_size);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<OutboundFrame>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    /// Admit every frame of `encoded`, or none of them.
    pub fn enqueue(&self, encoded: &EncodedMessage) -> Result<(), Backpressure> {
        let needed = encoded.blocks.len();
        let mut frames = self.frames();
        let available = self.config.capacity.saturating_sub(frames.len());
        if needed > available {
            return Err(Backpressure { needed, available });
        }

        let count = needed as u8;
        for (index, block) in encoded.blocks.iter().enumerate() {
            if block.len() > self.config.credit_bytes {
                tracing::warn!(
                    sequence = encoded.sequence,
                    fragment = index,
                    bytes = block.len(),
                    credits = self.config.credits_for(block.len()),
                    "block costs more than one SBD credit"
                );
            }
            frames.push_back(OutboundFrame {
                sequence: encoded.sequence,
                fragment_index: index as u8,
                fragment_count: count,
                msg_id: encoded.msg_id,
                block: block.clone(),
            });
        }
        drop(frames);
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next block's worth of frames: one frame, or a run of whole
    /// packets when packing is enabled.
    fn pop(&self) -> Option<Vec<OutboundFrame>> {
        let mut frames = self.frames();
        let first = frames.pop_front()?;
        let mut size = first.block.len();
        let packable = first.fragment_count == 1;
        let mut batch = vec![first];
        if let (Some(limit), true) = (self.pack_limit, packable) {
            while let Some(next) = frames.front() {
                if next.fragment_count != 1 || size + next.block.len() > limit {
                    break;
                }
                size += next.block.len();
                batch.extend(frames.pop_front());
            }
        }
        Some(batch)
    }

    /// Wait for the next block. `None` once `cancel` fires.
    async fn next(&self, cancel: &CancellationToken) -> Option<Vec<OutboundFrame>> {
        loop {
            if let Some(batch) = self.pop() {
                return Some(batch);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }
}

/// Sleep until `deadline`. Returns `false` if cancelled first.
async fn sleep_until(deadline: Instant, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(deadline) => true,
    }
}

enum Attempt {
    Accepted(Option<String>),
    Failed { reason: String, retryable: bool },
}

/// Submits queued frames one at a time through the active uplink.
pub struct QueueDrain {
    queue: Arc<OutboundQueue>,
    uplink: Uplink,
    events: EventBus,
    last_submit: Option<Instant>,
}

impl QueueDrain {
    pub fn new(queue: Arc<OutboundQueue>, uplink: Uplink, events: EventBus) -> Self {
        Self {
            queue,
            uplink,
            events,
            last_submit: None,
        }
    }

    /// Drain until `cancel` fires. Frames still queued at that point are
    /// abandoned.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(uplink = self.uplink.name(), "outbound drain started");
        while let Some(batch) = self.queue.next(&cancel).await {
            if !self.deliver(batch, &cancel).await {
                break;
            }
        }
        let abandoned = self.queue.len();
        if abandoned > 0 {
            tracing::warn!(frames = abandoned, "outbound frames abandoned at shutdown");
        }
    }

    /// Submit one block with retries. Returns `false` if cancelled.
    async fn deliver(&mut self, batch: Vec<OutboundFrame>, cancel: &CancellationToken) -> bool {
        let config = *self.queue.config();
        let block = match batch.as_slice() {
            [single] => single.block.clone(),
            frames => {
                let size = frames.iter().map(|f| f.block.len()).sum();
                let mut packed = BytesMut::with_capacity(size);
                for frame in frames {
                    packed.extend_from_slice(&frame.block);
                }
                packed.freeze()
            }
        };
        let Some(frame) = batch.first() else {
            return true;
        };
        let mut attempts = 0u32;
        let mut retry_delay = Duration::ZERO;

        loop {
            if let Some(last) = self.last_submit {
                let deadline = last + config.min_submit_interval + retry_delay;
                if !sleep_until(deadline, cancel).await {
                    return false;
                }
            }
            attempts += 1;
            self.last_submit = Some(Instant::now());

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return false,
                result = tokio::time::timeout(config.submit_timeout, self.uplink.submit(&block)) => {
                    match result {
                        Ok(Ok(Submission::Accepted { reference })) => Attempt::Accepted(reference),
                        Ok(Ok(Submission::Rejected { reason, retryable })) => {
                            Attempt::Failed { reason, retryable }
                        }
                        Ok(Err(err)) => Attempt::Failed {
                            reason: err.to_string(),
                            retryable: true,
                        },
                        Err(_) => Attempt::Failed {
                            reason: format!("submission timed out after {:?}", config.submit_timeout),
                            retryable: true,
                        },
                    }
                }
            };

            match attempt {
                Attempt::Accepted(reference) => {
                    let credits = config.credits_for(block.len());
                    tracing::info!(
                        uplink = self.uplink.name(),
                        sequence = frame.sequence,
                        fragment = frame.fragment_index,
                        count = frame.fragment_count,
                        packed = batch.len(),
                        bytes = block.len(),
                        reference = ?reference,
                        credits,
                        "frame submitted"
                    );
                    // The block's credits are charged to its first message.
                    for (i, frame) in batch.iter().enumerate() {
                        self.events.emit(GatewayEvent::FrameSubmitted {
                            sequence: frame.sequence,
                            fragment: frame.fragment_index,
                            reference: reference.clone(),
                            credits: if i == 0 { credits } else { 0 },
                        });
                    }
                    return true;
                }
                Attempt::Failed { reason, retryable } => {
                    if !retryable || attempts > config.max_retries {
                        tracing::error!(
                            sequence = frame.sequence,
                            fragment = frame.fragment_index,
                            packed = batch.len(),
                            attempts,
                            reason = %reason,
                            "delivery failed"
                        );
                        for frame in &batch {
                            self.events.emit(GatewayEvent::DeliveryFailed {
                                sequence: frame.sequence,
                                fragment: frame.fragment_index,
                                attempts,
                                reason: reason.clone(),
                            });
                        }
                        return true;
                    }
                    retry_delay = backoff(config.retry_backoff, attempts);
                    tracing::warn!(
                        sequence = frame.sequence,
                        fragment = frame.fragment_index,
                        attempts,
                        retry_in = ?(config.min_submit_interval + retry_delay),
                        reason = %reason,
                        "submission failed, retrying"
                    );
                }
            }
        }
    }
}

/// Delay before retry number `attempts` (1-based): `base`, `2*base`, `4*base`…
fn backoff(base: Duration, attempts: u32) -> Duration {
    base.saturating_mul(1u32 << attempts.saturating_sub(1).min(16))
}

#[cfg(test)]
mod tests {
    use sbdlink_transport::{LoopbackOutcome, LoopbackUplink};
    use tokio::sync::mpsc;

    use super::*;

    fn message(sequence: u32, frames: usize) -> EncodedMessage {
        EncodedMessage {
            sequence,
            msg_id: 76,
            wire_len: frames * 10,
            blocks: (0..frames).map(|i| Bytes::from(vec![i as u8; 10])).collect(),
        }
    }

    fn quick() -> QueueConfig {
        QueueConfig {
            capacity: 4,
            ..QueueConfig::default()
        }
    }

    async fn next_terminal(rx: &mut tokio::sync::broadcast::Receiver<GatewayEvent>) -> GatewayEvent {
        loop {
            match rx.recv().await.unwrap() {
                event @ (GatewayEvent::FrameSubmitted { .. }
                | GatewayEvent::DeliveryFailed { .. }) => return event,
                _ => {}
            }
        }
    }

    #[test]
    fn admission_is_all_or_nothing() {
        let queue = OutboundQueue::new(quick());
        queue.enqueue(&message(1, 3)).unwrap();
        let err = queue.enqueue(&message(2, 3)).unwrap_err();
        assert_eq!(
            err,
            Backpressure {
                needed: 3,
                available: 1
            }
        );
        assert_eq!(queue.len(), 3);
        queue.enqueue(&message(3, 1)).unwrap();
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn frames_keep_fragment_order() {
        let queue = OutboundQueue::new(quick());
        queue.enqueue(&message(7, 2)).unwrap();
        let first = queue.pop().unwrap().remove(0);
        let second = queue.pop().unwrap().remove(0);
        assert_eq!((first.sequence, first.fragment_index, first.fragment_count), (7, 0, 2));
        assert_eq!(second.fragment_index, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn whole_packets_are_packed_up_to_block_size() {
        let queue = OutboundQueue::new(QueueConfig::default()).packing_whole_packets(35);
        for sequence in 1..=4 {
            queue.enqueue(&message(sequence, 1)).unwrap();
        }
        queue.enqueue(&message(5, 2)).unwrap();

        let first: Vec<u32> = queue.pop().unwrap().iter().map(|f| f.sequence).collect();
        assert_eq!(first, vec![1, 2, 3]);
        let second: Vec<u32> = queue.pop().unwrap().iter().map(|f| f.sequence).collect();
        assert_eq!(second, vec![4]);
        // Fragments always travel alone.
        assert_eq!(queue.pop().unwrap().len(), 1);
        assert_eq!(queue.pop().unwrap().len(), 1);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn packing_is_off_by_default() {
        let queue = OutboundQueue::new(QueueConfig::default());
        queue.enqueue(&message(1, 1)).unwrap();
        queue.enqueue(&message(2, 1)).unwrap();
        assert_eq!(queue.pop().unwrap().len(), 1);
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff(base, 1), Duration::from_secs(5));
        assert_eq!(backoff(base, 2), Duration::from_secs(10));
        assert_eq!(backoff(base, 3), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_are_spaced_by_min_interval() {
        let queue = Arc::new(OutboundQueue::new(quick()));
        let (sink, mut delivered) = mpsc::unbounded_channel();
        let uplink = LoopbackUplink::with_sink(sink);
        let events = EventBus::new(16);
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(
            QueueDrain::new(queue.clone(), uplink.into(), events).run(cancel.clone()),
        );

        queue.enqueue(&message(1, 1)).unwrap();
        queue.enqueue(&message(2, 1)).unwrap();

        let start = Instant::now();
        delivered.recv().await.unwrap();
        let first = start.elapsed();
        delivered.recv().await.unwrap();
        let second = start.elapsed();
        assert!(first < Duration::from_secs(1));
        assert!(second - first >= Duration::from_secs(20));

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let queue = Arc::new(OutboundQueue::new(quick()));
        let uplink = LoopbackUplink::new();
        uplink.script([LoopbackOutcome::Fail, LoopbackOutcome::Reject { retryable: true }]);
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(
            QueueDrain::new(queue.clone(), uplink.clone().into(), events.clone())
                .run(cancel.clone()),
        );

        queue.enqueue(&message(5, 1)).unwrap();
        let event = next_terminal(&mut rx).await;
        assert!(matches!(event, GatewayEvent::FrameSubmitted { sequence: 5, .. }));
        assert_eq!(uplink.sent().len(), 1);
        assert_eq!(events.stats().snapshot().credits, 1);

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_back_off_beyond_the_submit_interval() {
        let queue = Arc::new(OutboundQueue::new(QueueConfig::default()));
        let (sink, mut delivered) = mpsc::unbounded_channel();
        let uplink = LoopbackUplink::with_sink(sink);
        uplink.script([
            LoopbackOutcome::Fail,
            LoopbackOutcome::Fail,
            LoopbackOutcome::Fail,
        ]);
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(
            QueueDrain::new(queue.clone(), uplink.into(), EventBus::new(16)).run(cancel.clone()),
        );

        let start = Instant::now();
        queue.enqueue(&message(3, 1)).unwrap();
        delivered.recv().await.unwrap();
        // Attempts at 0, 20+5, 25+20+10 and 55+20+20 seconds.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(95), "accepted after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(96), "accepted after {elapsed:?}");

        queue.enqueue(&message(4, 1)).unwrap();
        delivered.recv().await.unwrap();
        let gap = start.elapsed() - elapsed;
        assert!(gap >= Duration::from_secs(20) && gap < Duration::from_secs(21));

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn packed_block_is_one_submission() {
        let queue = Arc::new(OutboundQueue::new(QueueConfig::default()).packing_whole_packets(270));
        let (sink, mut delivered) = mpsc::unbounded_channel();
        let uplink = LoopbackUplink::with_sink(sink);
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        queue.enqueue(&message(1, 1)).unwrap();
        queue.enqueue(&message(2, 1)).unwrap();
        queue.enqueue(&message(3, 1)).unwrap();
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(
            QueueDrain::new(queue.clone(), uplink.clone().into(), events.clone())
                .run(cancel.clone()),
        );

        let block = delivered.recv().await.unwrap();
        assert_eq!(block.len(), 30);
        assert_eq!(&block[..10], &[0u8; 10]);
        let mut submitted = Vec::new();
        for _ in 0..3 {
            match next_terminal(&mut rx).await {
                GatewayEvent::FrameSubmitted { sequence, .. } => submitted.push(sequence),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(submitted, vec![1, 2, 3]);
        assert_eq!(uplink.sent().len(), 1);
        let snapshot = events.stats().snapshot();
        assert_eq!((snapshot.submitted, snapshot.credits), (3, 1));

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rejection_fails_immediately() {
        let queue = Arc::new(OutboundQueue::new(quick()));
        let uplink = LoopbackUplink::new();
        uplink.script([LoopbackOutcome::Reject { retryable: false }]);
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(
            QueueDrain::new(queue.clone(), uplink.clone().into(), events.clone())
                .run(cancel.clone()),
        );

        queue.enqueue(&message(6, 1)).unwrap();
        match next_terminal(&mut rx).await {
            GatewayEvent::DeliveryFailed { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(uplink.sent().is_empty());

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_uplink_times_out_and_gives_up() {
        let queue = Arc::new(OutboundQueue::new(quick()));
        let uplink = LoopbackUplink::new();
        uplink.script(std::iter::repeat(LoopbackOutcome::Stall).take(4));
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(
            QueueDrain::new(queue.clone(), uplink.into(), events.clone()).run(cancel.clone()),
        );

        queue.enqueue(&message(8, 1)).unwrap();
        match next_terminal(&mut rx).await {
            GatewayEvent::DeliveryFailed {
                attempts, reason, ..
            } => {
                assert_eq!(attempts, 4);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events.stats().snapshot().delivery_failed, 1);

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_idle_drain() {
        let queue = Arc::new(OutboundQueue::new(quick()));
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(
            QueueDrain::new(queue, LoopbackUplink::new().into(), EventBus::new(1))
                .run(cancel.clone()),
        );
        cancel.cancel();
        drain.await.unwrap();
    }
}
