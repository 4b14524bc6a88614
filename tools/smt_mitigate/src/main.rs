// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use anyhow::bail;
use anyhow::Result;
use clap::Parser;
use log::info;
use log::warn;
use smt_mitigate::Config;
use smt_mitigate::Mitigator;
use smt_mitigate::Opts;

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    if cfg!(any(target_arch = "arm", target_arch = "aarch64")) {
        warn!("As ARM is not affected by MDS, mitigate does not support it");
        bail!("unsupported architecture {}", std::env::consts::ARCH);
    }

    let config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = Config::merge_cli(&config, &opts);

    let mitigator = Mitigator::from_config(&config, opts.dry_run)?;
    let report = mitigator.run(opts.mode())?;

    match report.action {
        Some(state) => info!(
            "{} done: applied {:?}{}",
            report.mode.name(),
            state.as_str(),
            if opts.dry_run { " (dry run)" } else { "" }
        ),
        None => info!("{} done: no change needed", report.mode.name()),
    }
    Ok(())
}
