// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Post-action verification.
//!
//! After writing to the control file the engine re-reads cpuinfo. A policy
//! may list, per control value, the cpulists the host is allowed to end up
//! with (as regular expressions matched against the whole cpulist). An
//! observed cpulist outside that set fails the run.

use crate::MitigateError;
use crate::SmtState;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use regex::RegexSet;
use smt_utils::CpuSet;

#[derive(Debug, Clone)]
struct Expected {
    patterns: Vec<String>,
    set: RegexSet,
}

impl Expected {
    fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        let set = RegexSet::new(patterns.iter().map(|p| format!("^(?:{})$", p)))
            .with_context(|| format!("Invalid expected cpulist patterns {:?}", patterns))?;
        Ok(Self { patterns, set })
    }
}

#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    expected_off: Expected,
    expected_on: Expected,
}

impl VerifyPolicy {
    /// Build a policy from the cpulist patterns acceptable after writing
    /// "off" and after writing "on". An empty list disables the check for
    /// that value.
    pub fn new<S: AsRef<str>>(expected_off: &[S], expected_on: &[S]) -> Result<Self> {
        Ok(Self {
            expected_off: Expected::new(expected_off).context("expected_off")?,
            expected_on: Expected::new(expected_on).context("expected_on")?,
        })
    }

    /// A policy that accepts any outcome.
    pub fn permissive() -> Self {
        let any = Expected {
            patterns: vec![],
            set: RegexSet::empty(),
        };
        Self {
            expected_off: any.clone(),
            expected_on: any,
        }
    }

    pub fn patterns(&self, state: SmtState) -> &[String] {
        &self.expected(state).patterns
    }

    fn expected(&self, state: SmtState) -> &Expected {
        match state {
            SmtState::Off => &self.expected_off,
            SmtState::On => &self.expected_on,
        }
    }

    /// Check the topology observed after `state` was written.
    pub fn verify(&self, state: SmtState, after: &CpuSet) -> Result<(), MitigateError> {
        let expected = self.expected(state);
        if expected.patterns.is_empty() {
            debug!("No expected cpulists for {:?}, skipping verification", state.as_str());
            return Ok(());
        }

        let observed = after.to_string();
        if expected.set.is_match(&observed) {
            debug!("CPUs {:?} match expected {:?}", observed, expected.patterns);
            return Ok(());
        }

        Err(MitigateError::Mismatch {
            observed,
            acceptable: expected.patterns.clone(),
        })
    }
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}
