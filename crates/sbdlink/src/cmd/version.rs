use sbdlink_filter::CommandAllowList;
use sbdlink_frame::{ModemPreset, HEADER_SIZE};
use sbdlink_gateway::QueueConfig;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("sbdlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let queue = QueueConfig::default();
    let allow = CommandAllowList::default();
    println!("name: sbdlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("SBDLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("SBDLINK_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("frame_header: {HEADER_SIZE} bytes");
    println!(
        "modems: 9603={} bytes, 9704={} bytes",
        ModemPreset::Rock9603.max_block_size(),
        ModemPreset::Rock9704.max_block_size()
    );
    println!(
        "submit_interval: {}s, credit: {} bytes",
        queue.min_submit_interval.as_secs(),
        queue.credit_bytes
    );
    println!("allowed_types: {}", allow.describe_types().join(", "));
    println!("allowed_commands: {}", allow.describe_commands().join(", "));

    Ok(SUCCESS)
}
