// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The mitigation engine.
//!
//! One run is one state transition:
//!
//!```text
//!   read cpuinfo -> CpuSet (before)
//!   decide       -> None | Some(on/off)
//!   apply        -> SmtControl (sysfs or dry run)
//!   read cpuinfo -> CpuSet (after)
//!   verify       -> VerifyPolicy
//!```
//!
//! Any failure ends the run. The before and after sets are independent
//! snapshots compared by value.

use crate::control::DryRunControl;
use crate::control::SysfsControl;
use crate::Config;
use crate::SmtControl;
use crate::SmtState;
use crate::VerifyPolicy;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;
use smt_utils::CpuSet;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Turn SMT off if the CPUs are vulnerable.
    Mitigate,
    /// Turn SMT back on unconditionally.
    Reverse,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Mitigate => "mitigate",
            Mode::Reverse => "reverse",
        }
    }

    /// The control value to write given the current topology, if any.
    pub fn decide(&self, before: &CpuSet) -> Option<SmtState> {
        match self {
            // Safe hosts are left alone.
            Mode::Mitigate => before.is_vulnerable().then_some(SmtState::Off),
            Mode::Reverse => Some(SmtState::On),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub mode: Mode,
    pub action: Option<SmtState>,
    pub vulnerable: bool,
    pub before: String,
    pub after: String,
}

pub struct Mitigator {
    cpuinfo_path: PathBuf,
    cross_thread_bugs: Vec<String>,
    control: Box<dyn SmtControl>,
    policy: VerifyPolicy,
}

impl Mitigator {
    pub fn new<P: AsRef<Path>>(
        cpuinfo_path: P,
        cross_thread_bugs: Vec<String>,
        control: Box<dyn SmtControl>,
        policy: VerifyPolicy,
    ) -> Self {
        Self {
            cpuinfo_path: cpuinfo_path.as_ref().to_path_buf(),
            cross_thread_bugs,
            control,
            policy,
        }
    }

    /// Wire up the engine from a resolved configuration. A dry run gets a
    /// control that only logs; everything else is identical.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let control: Box<dyn SmtControl> = if dry_run {
            Box::new(DryRunControl::new(config.smt_control_path()))
        } else {
            Box::new(SysfsControl::new(config.smt_control_path()))
        };
        let policy = VerifyPolicy::new(config.expected_off(), config.expected_on())?;

        Ok(Self::new(
            config.cpuinfo_path(),
            config.cross_thread_bugs(),
            control,
            policy,
        ))
    }

    pub fn run(&self, mode: Mode) -> Result<Report> {
        self.do_run(mode)
            .with_context(|| format!("{} operation failed", mode.name()))
    }

    fn do_run(&self, mode: Mode) -> Result<Report> {
        let before = self.cpu_set().context("Get before CPU set failed")?;
        info!("CPUs before: {}", before);
        debug!(
            "{} cpus, {} threads per core, cross-thread bugs {:?}",
            before.nr_cpus(),
            before.threads_per_core(),
            before.vulnerable_bugs()
        );

        let action = mode.decide(&before);
        match action {
            Some(state) => self.control.apply(state).context("Action failed")?,
            None => info!("CPUs are not vulnerable, nothing to {}", mode.name()),
        }

        let after = self.cpu_set().context("Get after CPU set failed")?;
        info!("CPUs after: {}", after);

        if let Some(state) = action {
            self.policy
                .verify(state, &after)
                .context("Post mitigate failed")?;
        }

        Ok(Report {
            mode,
            action,
            vulnerable: before.is_vulnerable(),
            before: before.to_string(),
            after: after.to_string(),
        })
    }

    fn cpu_set(&self) -> Result<CpuSet> {
        CpuSet::from_file(&self.cpuinfo_path, self.cross_thread_bugs.as_slice())
    }
}
