use bytes::{Bytes, BytesMut};
use sbdlink_proto::{encode, ProtocolMessage};

use crate::codec::{encode_frame, FrameConfig, WireMode, HEADER_SIZE, MAX_FRAGMENTS_CEILING};
use crate::error::EncodeError;

/// Blocks produced for one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub sequence: u32,
    pub msg_id: u32,
    /// Size of the MAVLink packet before splitting.
    pub wire_len: usize,
    /// Ready-to-submit SBD blocks, in fragment order.
    pub blocks: Vec<Bytes>,
}

impl EncodedMessage {
    pub fn fragment_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Outbound half of the frame codec: splits packets into blocks and hands out
/// message sequences.
#[derive(Debug)]
pub struct FrameEncoder {
    config: FrameConfig,
    next_sequence: u32,
}

impl FrameEncoder {
    pub fn new(config: FrameConfig) -> Self {
        Self::with_initial_sequence(config, 0)
    }

    /// Start numbering at `sequence`. A gateway seeds this from the clock so a
    /// restart does not reuse sequences the vehicle already saw.
    pub fn with_initial_sequence(config: FrameConfig, sequence: u32) -> Self {
        Self {
            config,
            next_sequence: sequence,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// The sequence the next encoded message will use.
    pub fn peek_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Serialize `msg` and split it into channel-sized blocks.
    ///
    /// The sequence is consumed only when encoding succeeds.
    pub fn encode(&mut self, msg: &ProtocolMessage) -> Result<EncodedMessage, EncodeError> {
        let wire = encode(msg);
        let sequence = self.next_sequence;

        let blocks = match self.config.wire_mode {
            WireMode::Framed => self.split(sequence, msg, &wire)?,
            WireMode::Raw => {
                if wire.len() > self.config.max_block_size {
                    return Err(EncodeError::TooLarge {
                        size: wire.len(),
                        max: self.config.max_block_size,
                    });
                }
                vec![wire.clone()]
            }
        };

        self.next_sequence = sequence.wrapping_add(1);
        tracing::debug!(
            sequence,
            msg_id = msg.msg_id(),
            wire_len = wire.len(),
            fragments = blocks.len(),
            "encoded message"
        );

        Ok(EncodedMessage {
            sequence,
            msg_id: msg.msg_id(),
            wire_len: wire.len(),
            blocks,
        })
    }

    fn split(
        &self,
        sequence: u32,
        msg: &ProtocolMessage,
        wire: &Bytes,
    ) -> Result<Vec<Bytes>, EncodeError> {
        if self.config.max_block_size <= HEADER_SIZE {
            return Err(EncodeError::BlockTooSmall {
                block_size: self.config.max_block_size,
                header: HEADER_SIZE,
            });
        }
        let chunk_size = self.config.chunk_size();
        let needed = wire.len().div_ceil(chunk_size).max(1);
        let max = self.config.max_fragments.min(MAX_FRAGMENTS_CEILING);
        if needed > max {
            return Err(EncodeError::TooManyFragments {
                size: wire.len(),
                needed,
                max,
            });
        }

        let count = needed as u8;
        let blocks = wire
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, chunk)| {
                let mut block = BytesMut::with_capacity(HEADER_SIZE + chunk.len());
                encode_frame(sequence, index as u8, count, msg.version, chunk, &mut block);
                block.freeze()
            })
            .collect();
        Ok(blocks)
    }
}
