use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use sbdlink_gateway::{GatewayEvent, StatsSnapshot};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Two-column listing, as a table, `key: value` lines or one JSON object per
/// row.
pub fn print_pairs(title: &str, rows: &[(String, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Row<'a> {
                setting: &'a str,
                value: &'a str,
            }
            let rows: Vec<Row<'_>> = rows
                .iter()
                .map(|(setting, value)| Row { setting, value })
                .collect();
            print_json(&rows);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![title.to_uppercase(), "VALUE".to_string()]);
            for (key, value) in rows {
                table.add_row(vec![key.clone(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in rows {
                println!("{key}: {value}");
            }
        }
    }
}

pub fn print_event(event: &GatewayEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table | OutputFormat::Pretty => println!("{}", describe_event(event)),
    }
}

fn describe_event(event: &GatewayEvent) -> String {
    match event {
        GatewayEvent::MessageDelivered {
            origin,
            sequence,
            msg_id,
        } => format!("delivered  origin={origin} seq={sequence} msg={msg_id}"),
        GatewayEvent::GcsUnreachable { origin, msg_id } => {
            format!("no-gcs     origin={origin} msg={msg_id}")
        }
        GatewayEvent::DuplicateFrame { origin, sequence } => {
            format!("duplicate  origin={origin} seq={sequence}")
        }
        GatewayEvent::StaleFrame {
            origin,
            sequence,
            high_water,
        } => format!("stale      origin={origin} seq={sequence} high={high_water}"),
        GatewayEvent::BadFrame { origin, error } => {
            format!("bad-frame  origin={origin} {error}")
        }
        GatewayEvent::DecodeFailed { origin, error } => {
            format!("undecoded  origin={origin} {error}")
        }
        GatewayEvent::AssemblyExpired {
            origin,
            sequence,
            received,
            expected,
        } => format!("expired    origin={origin} seq={sequence} {received}/{expected} fragments"),
        GatewayEvent::ConversionFailed { msg_id, error } => {
            format!("convert    msg={msg_id} {error}")
        }
        GatewayEvent::Filtered { msg_id, reason } => format!("filtered   msg={msg_id} {reason}"),
        GatewayEvent::EncodeFailed { msg_id, error } => format!("encode     msg={msg_id} {error}"),
        GatewayEvent::Backpressure {
            sequence,
            needed,
            available,
        } => format!("queue-full seq={sequence} needed={needed} free={available}"),
        GatewayEvent::Queued {
            sequence,
            msg_id,
            frames,
        } => format!("queued     seq={sequence} msg={msg_id} frames={frames}"),
        GatewayEvent::FrameSubmitted {
            sequence,
            fragment,
            reference,
            credits,
        } => format!(
            "submitted  seq={sequence} frag={fragment} ref={} credits={credits}",
            reference.as_deref().unwrap_or("-")
        ),
        GatewayEvent::DeliveryFailed {
            sequence,
            fragment,
            attempts,
            reason,
        } => format!("failed     seq={sequence} frag={fragment} attempts={attempts} {reason}"),
    }
}

/// Log a stats summary at `info`.
pub fn log_stats(stats: &StatsSnapshot, label: &'static str) {
    tracing::info!(
        delivered = stats.delivered,
        duplicates = stats.duplicates,
        stale = stats.stale,
        bad_frames = stats.bad_frames,
        decode_failed = stats.decode_failed,
        expired = stats.expired,
        evicted = stats.evicted,
        gcs_unreachable = stats.gcs_unreachable,
        filtered = stats.filtered,
        conversion_failed = stats.conversion_failed,
        encode_failed = stats.encode_failed,
        backpressure = stats.backpressure,
        queued = stats.queued,
        submitted = stats.submitted,
        delivery_failed = stats.delivery_failed,
        credits = stats.credits,
        "{label}"
    );
}
