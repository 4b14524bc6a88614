// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # smt_mitigate
//!
//! Mitigates a host against cross-thread side channels (MDS and friends) by
//! writing "off" to `/sys/devices/system/cpu/smt/control` when its CPUs are
//! vulnerable, and restores SMT by writing "on" when run with `--reverse`.
//!
//! Each run reads cpuinfo, decides, performs at most one write, reads
//! cpuinfo again and verifies the result. Nothing is kept between runs.

pub mod cli;
pub mod config;
pub mod control;
pub mod mitigate;
pub mod verify;

pub use cli::Opts;
pub use config::Config;
pub use control::DryRunControl;
pub use control::SmtControl;
pub use control::SmtState;
pub use control::SysfsControl;
pub use mitigate::Mitigator;
pub use mitigate::Mode;
pub use mitigate::Report;
pub use verify::VerifyPolicy;

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum MitigateError {
    /// The SMT control file could not be opened for writing.
    OpenControl {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Writing the control value failed.
    WriteControl {
        path: PathBuf,
        state: SmtState,
        source: std::io::Error,
    },
    /// The topology after the action matches none of the expected cpulists.
    Mismatch {
        observed: String,
        acceptable: Vec<String>,
    },
}

impl fmt::Display for MitigateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MitigateError::OpenControl { path, source } => {
                write!(f, "failed to open file {}: {}", path.display(), source)
            }
            MitigateError::WriteControl {
                path,
                state,
                source,
            } => write!(
                f,
                "failed to write {:?} to {}: {}",
                state.as_str(),
                path.display(),
                source
            ),
            MitigateError::Mismatch {
                observed,
                acceptable,
            } => write!(
                f,
                "mismatch: cpus {:?} match none of {:?}",
                observed, acceptable
            ),
        }
    }
}

impl std::error::Error for MitigateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MitigateError::OpenControl { source, .. } => Some(source),
            MitigateError::WriteControl { source, .. } => Some(source),
            MitigateError::Mismatch { .. } => None,
        }
    }
}
