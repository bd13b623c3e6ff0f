//! `screenfeed`: stream a display or window as raw NV12 frames on stdout,
//! and optionally system audio as MCAP packets on stderr.

mod args;
#[cfg(windows)]
mod capture;
mod logging;
#[cfg_attr(not(windows), allow(dead_code))]
mod output;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::args::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.capture_config()?;

    logging::init(args.audio, args.log_file.as_deref())?;
    info!("screenfeed v{}", env!("CARGO_PKG_VERSION"));

    run(config, args.audio)
}

#[cfg(windows)]
fn run(config: screenfeed_core::CaptureConfig, audio: bool) -> Result<()> {
    capture::run(config, audio)
}

#[cfg(not(windows))]
fn run(_config: screenfeed_core::CaptureConfig, _audio: bool) -> Result<()> {
    anyhow::bail!("screenfeed captures through Windows APIs and only runs on Windows")
}
