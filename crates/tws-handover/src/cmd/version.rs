use handover_frame::{END_TAG, P0_TAG};
use handover_profile::{HandoverConfig, MAX_CLIENTS};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("tws-handover {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: tws-handover");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("TWS_HANDOVER_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "wire: mtu_default={} p0_tag=0x{P0_TAG:02x} end_tag=0x{END_TAG:02x} max_clients={MAX_CLIENTS}",
        HandoverConfig::default().mtu
    );

    Ok(SUCCESS)
}
