use std::time::Duration;

use crate::cmd::CheckArgs;
use crate::config::{FileConfig, Resolved, UplinkPlan};
use crate::exit::{config_error, CliResult, SUCCESS};
use crate::output::{print_pairs, OutputFormat};

pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let resolved = FileConfig::load(&args.config)
        .and_then(|file| file.resolve())
        .map_err(config_error)?;
    print_pairs("setting", &settings(&resolved), format);
    Ok(SUCCESS)
}

fn secs(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

fn settings(r: &Resolved) -> Vec<(String, String)> {
    let g = &r.gateway;
    let mut rows: Vec<(&str, String)> = vec![
        ("channel.wire_mode", format!("{:?}", g.frame.wire_mode).to_lowercase()),
        ("channel.max_block_size", g.frame.max_block_size.to_string()),
        ("channel.chunk_size", g.frame.chunk_size().to_string()),
        ("channel.max_fragments", g.frame.max_fragments.to_string()),
        ("channel.version", g.channel_version.to_string()),
        ("local.endpoint", r.endpoint.to_string()),
        ("local.version", g.local_version.to_string()),
        ("reassembly.timeout", secs(g.reassembly.timeout)),
        ("reassembly.max_assemblies", g.reassembly.max_assemblies.to_string()),
        ("reassembly.tombstones", g.reassembly.tombstones.to_string()),
        ("tracker.window", g.tracker.window.to_string()),
        ("tracker.staleness_margin", g.tracker.staleness_margin.to_string()),
        ("queue.capacity", g.queue.capacity.to_string()),
        ("queue.min_submit_interval", secs(g.queue.min_submit_interval)),
        ("queue.submit_timeout", secs(g.queue.submit_timeout)),
        ("queue.max_retries", g.queue.max_retries.to_string()),
        ("queue.retry_backoff", secs(g.queue.retry_backoff)),
        ("queue.credit_bytes", g.queue.credit_bytes.to_string()),
        ("filter.message_types", g.allow_list.describe_types().join(", ")),
        ("filter.commands", g.allow_list.describe_commands().join(", ")),
    ];

    let uplink = match &r.uplink {
        UplinkPlan::Rock7(config) => format!("rock7 imei={} via {}", config.imei, config.endpoint),
        other => other.name().to_string(),
    };
    rows.push(("uplink", uplink));
    rows.push((
        "inbound.webhook",
        r.webhook
            .as_ref()
            .map(|w| format!("{}{} imei={}", w.bind, w.path, w.imei))
            .unwrap_or_else(|| "disabled".to_string()),
    ));
    rows.push((
        "inbound.feed",
        r.feed
            .as_ref()
            .map(|f| format!("{} every {}", f.url, secs(f.poll_interval)))
            .unwrap_or_else(|| "disabled".to_string()),
    ));
    rows.push((
        "broker",
        r.bridge
            .as_ref()
            .map(|b| format!("{} <-> {} ({})", b.bind, b.peer, b.topics.mo()))
            .unwrap_or_else(|| "disabled".to_string()),
    ));
    rows.push((
        "gateway.stats_interval",
        r.stats_interval.map(secs).unwrap_or_else(|| "off".to_string()),
    ));

    rows.into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_never_show_the_password() {
        let resolved = FileConfig::parse(
            "[uplink]\nkind = \"rock7\"\nimei = \"300234010753370\"\nusername = \"ops\"\npassword = \"hunter2\"\n",
        )
        .unwrap()
        .resolve()
        .unwrap();
        let rows = settings(&resolved);
        assert!(rows.iter().all(|(_, value)| !value.contains("hunter2")));
        let uplink = rows.iter().find(|(key, _)| key == "uplink").unwrap();
        assert!(uplink.1.starts_with("rock7 imei=300234010753370"));
    }
}
