// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use crate::Mode;
use clap::Parser;
use std::path::PathBuf;

/// smt_mitigate: mitigate a host against cross-thread side channels
///
/// Mitigates the host against the "MDS" class of vulnerabilities by writing
/// "off" to /sys/devices/system/cpu/smt/control when its CPUs report a
/// cross-thread bug and have SMT siblings. Hosts that are not vulnerable are
/// left untouched.
///
/// SMT can be restored by rebooting or by running again with --reverse,
/// which writes "on" to the same file.
#[derive(Debug, Parser)]
#[clap(name = "smt_mitigate", version)]
pub struct Opts {
    /// Run the command without changing the underlying system.
    #[clap(long = "dryrun", alias = "dry-run", action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Reverse mitigate by enabling SMT on all cores.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub reverse: bool,

    /// JSON configuration file.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Path to read the processor description from.
    #[clap(long)]
    pub cpuinfo: Option<String>,

    /// Path of the SMT control file.
    #[clap(long)]
    pub smt_control: Option<String>,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Opts {
    pub fn mode(&self) -> Mode {
        if self.reverse {
            Mode::Reverse
        } else {
            Mode::Mitigate
        }
    }
}
