use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    profile: &'static str,
    os: &'static str,
    arch: &'static str,
    git_hash: &'static str,
}

fn build_info() -> BuildInfo {
    BuildInfo {
        name: "telelink",
        version: env!("CARGO_PKG_VERSION"),
        target: option_env!("TELELINK_BUILD_TARGET").unwrap_or("unknown"),
        profile: option_env!("TELELINK_BUILD_PROFILE").unwrap_or("unknown"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = build_info();
    if !args.extended {
        println!("{} {}", info.name, info.version);
        return Ok(SUCCESS);
    }
    if matches!(format, OutputFormat::Json) {
        print_json(&info);
        return Ok(SUCCESS);
    }

    println!("name: {}", info.name);
    println!("version: {}", info.version);
    println!("target: {}", info.target);
    println!("profile: {}", info.profile);
    println!("target_os: {}", info.os);
    println!("target_arch: {}", info.arch);
    println!("git_hash: {}", info.git_hash);
    println!(
        "defaults: reconnect={:?} liveness={:?} queue={} pool={}x{}",
        telelink_channel::DEFAULT_RECONNECT_INTERVAL,
        telelink_channel::DEFAULT_LIVENESS_INTERVAL,
        telelink_channel::DEFAULT_QUEUE_CAPACITY,
        telelink_frame::DEFAULT_POOL_CAPACITY,
        telelink_frame::DEFAULT_BUFFER_SIZE,
    );

    Ok(SUCCESS)
}
