// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The SMT control switch.
//!
//! The kernel exposes SMT as a single write-only contract: writing "on" or
//! "off" to the control file takes effect synchronously for the whole host.
//! The engine only ever talks to it through [`SmtControl`], so a dry run is
//! just a different implementation plugged in.

use crate::MitigateError;
use anyhow::Result;
use log::debug;
use log::info;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtState {
    On,
    Off,
}

impl SmtState {
    /// The literal value written to the control file.
    pub fn as_str(&self) -> &'static str {
        match self {
            SmtState::On => "on",
            SmtState::Off => "off",
        }
    }
}

impl fmt::Display for SmtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait SmtControl {
    /// Switch SMT for the whole host.
    fn apply(&self, state: SmtState) -> Result<()>;
}

/// Writes to the kernel control file, e.g.
/// `/sys/devices/system/cpu/smt/control`.
#[derive(Debug, Clone)]
pub struct SysfsControl {
    path: PathBuf,
}

impl SysfsControl {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SmtControl for SysfsControl {
    fn apply(&self, state: SmtState) -> Result<()> {
        debug!("Writing {:?} to {}", state.as_str(), self.path.display());

        // One write, no retries: the switch is synchronous and a failure
        // means the kernel refused.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|source| MitigateError::OpenControl {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(state.as_str().as_bytes())
            .map_err(|source| MitigateError::WriteControl {
                path: self.path.clone(),
                state,
                source,
            })?;

        info!("Wrote {:?} to {}", state.as_str(), self.path.display());
        Ok(())
    }
}

/// Logs what would have been written and leaves the system alone.
#[derive(Debug, Clone)]
pub struct DryRunControl {
    path: PathBuf,
}

impl DryRunControl {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SmtControl for DryRunControl {
    fn apply(&self, state: SmtState) -> Result<()> {
        info!(
            "Dry run: would write {:?} to {}",
            state.as_str(),
            self.path.display()
        );
        Ok(())
    }
}
