use std::time::{Duration, Instant};

use bytes::Bytes;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use sbdlink_frame::{
    decode_frame, OriginId, ReassemblyConfig, Reassembler, MAX_FRAGMENTS_CEILING,
};
use sbdlink_proto::{parse_datagram, ProtocolMessage};
use serde::Serialize;

use crate::cmd::InspectArgs;
use crate::exit::{CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Default, Serialize)]
struct Inspection {
    frames: Vec<FrameSummary>,
    messages: Vec<MessageSummary>,
    errors: Vec<String>,
    incomplete: usize,
}

#[derive(Debug, Serialize)]
struct FrameSummary {
    block: usize,
    sequence: u32,
    fragment: String,
    version: u8,
    chunk_len: usize,
}

#[derive(Debug, Serialize)]
struct MessageSummary {
    block: usize,
    sequence: Option<u32>,
    version: u8,
    msg_id: u32,
    name: &'static str,
    system_id: u8,
    component_id: u8,
    command: Option<u16>,
}

impl MessageSummary {
    fn new(block: usize, sequence: Option<u32>, message: &ProtocolMessage) -> Self {
        Self {
            block,
            sequence,
            version: message.version.tag(),
            msg_id: message.msg_id(),
            name: message.body.name(),
            system_id: message.header.system_id,
            component_id: message.header.component_id,
            command: message.body.command_id(),
        }
    }
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let inspection = inspect(&args.blocks, args.raw);
    if inspection.incomplete > 0 {
        tracing::warn!(
            pending = inspection.incomplete,
            "some messages are missing fragments"
        );
    }
    render(&inspection, format);
    if inspection.errors.is_empty() {
        Ok(SUCCESS)
    } else {
        Ok(DATA_INVALID)
    }
}

fn inspect(inputs: &[String], raw: bool) -> Inspection {
    let origin = OriginId::new("inspect");
    let mut reassembler = Reassembler::new(ReassemblyConfig {
        timeout: Duration::from_secs(86_400),
        max_fragments: MAX_FRAGMENTS_CEILING,
        ..ReassemblyConfig::default()
    });
    let now = Instant::now();
    let mut out = Inspection::default();

    for (index, input) in inputs.iter().enumerate() {
        let block = match hex::decode(input.trim()) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                out.errors.push(format!("block {index}: {err}"));
                continue;
            }
        };

        if raw {
            let parsed = parse_datagram(&block);
            out.messages.extend(
                parsed
                    .messages
                    .iter()
                    .map(|message| MessageSummary::new(index, None, message)),
            );
            out.errors.extend(
                parsed
                    .errors
                    .iter()
                    .map(|err| format!("block {index}: {err}")),
            );
            if parsed.messages.is_empty() && parsed.errors.is_empty() {
                out.errors
                    .push(format!("block {index}: no MAVLink packet found"));
            }
            continue;
        }

        let frame = match decode_frame(origin.clone(), &block) {
            Ok(frame) => frame,
            Err(err) => {
                out.errors.push(format!("block {index}: {err}"));
                continue;
            }
        };
        out.frames.push(FrameSummary {
            block: index,
            sequence: frame.sequence,
            fragment: format!("{}/{}", frame.fragment_index + 1, frame.fragment_count),
            version: frame.version.tag(),
            chunk_len: frame.payload.len(),
        });
        match reassembler.on_frame(frame, now) {
            Ok(Some(done)) => out.messages.push(MessageSummary::new(
                index,
                Some(done.sequence),
                &done.message,
            )),
            Ok(None) => {}
            Err(err) => out.errors.push(format!("block {index}: {err}")),
        }
    }

    out.incomplete = reassembler.pending_count();
    out
}

fn render(inspection: &Inspection, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(inspection),
        OutputFormat::Table => {
            if !inspection.frames.is_empty() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["BLOCK", "SEQUENCE", "FRAGMENT", "VERSION", "CHUNK"]);
                for frame in &inspection.frames {
                    table.add_row(vec![
                        frame.block.to_string(),
                        frame.sequence.to_string(),
                        frame.fragment.clone(),
                        frame.version.to_string(),
                        frame.chunk_len.to_string(),
                    ]);
                }
                println!("{table}");
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["BLOCK", "MESSAGE", "ID", "SYS/COMP", "COMMAND"]);
            for message in &inspection.messages {
                table.add_row(vec![
                    message.block.to_string(),
                    message.name.to_string(),
                    message.msg_id.to_string(),
                    format!("{}/{}", message.system_id, message.component_id),
                    message
                        .command
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
            }
            println!("{table}");
            for err in &inspection.errors {
                println!("error: {err}");
            }
        }
        OutputFormat::Pretty => {
            for message in &inspection.messages {
                println!(
                    "block {}: {} (id {}) from {}/{}",
                    message.block,
                    message.name,
                    message.msg_id,
                    message.system_id,
                    message.component_id
                );
            }
            for err in &inspection.errors {
                println!("error: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use sbdlink_frame::{encode_frame, FrameConfig, FrameEncoder};
    use sbdlink_proto::{
        encode, CommandLong, MessageBody, MessageHeader, ProtocolVersion,
    };

    use super::*;

    fn command() -> ProtocolMessage {
        ProtocolMessage::new(
            ProtocolVersion::V2,
            MessageHeader {
                sequence: 3,
                system_id: 255,
                component_id: 190,
            },
            MessageBody::CommandLong(CommandLong {
                command: 400,
                target_system: 1,
                target_component: 1,
                ..CommandLong::default()
            }),
        )
    }

    #[test]
    fn reassembles_fragments_across_inputs() {
        let mut encoder = FrameEncoder::with_initial_sequence(
            FrameConfig {
                max_block_size: 20,
                ..FrameConfig::default()
            },
            77,
        );
        let encoded = encoder.encode(&command()).unwrap();
        assert!(encoded.blocks.len() > 1);
        let inputs: Vec<String> = encoded.blocks.iter().rev().map(|b| hex::encode(b)).collect();

        let inspection = inspect(&inputs, false);
        assert!(inspection.errors.is_empty());
        assert_eq!(inspection.frames.len(), encoded.blocks.len());
        assert_eq!(inspection.messages.len(), 1);
        assert_eq!(inspection.messages[0].name, "COMMAND_LONG");
        assert_eq!(inspection.messages[0].sequence, Some(77));
        assert_eq!(inspection.messages[0].command, Some(400));
        assert_eq!(inspection.incomplete, 0);
    }

    #[test]
    fn reports_missing_fragments_and_bad_hex() {
        let mut block = BytesMut::new();
        encode_frame(5, 0, 2, ProtocolVersion::V2, b"half", &mut block);
        let inputs = vec![hex::encode(&block), "zz".to_string()];

        let inspection = inspect(&inputs, false);
        assert_eq!(inspection.incomplete, 1);
        assert_eq!(inspection.errors.len(), 1);
        assert!(inspection.errors[0].starts_with("block 1:"));
    }

    #[test]
    fn raw_blocks_may_hold_several_packets() {
        let mut block = encode(&command()).to_vec();
        block.extend_from_slice(&encode(&command()));
        let inspection = inspect(&[hex::encode(&block)], true);
        assert_eq!(inspection.messages.len(), 2);
        assert!(inspection.frames.is_empty());
    }
}
