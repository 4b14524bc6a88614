// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use crate::cli::Opts;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use smt_utils::CROSS_THREAD_BUGS;
use std::fs;
use std::path::Path;

pub const CPUINFO_PATH: &str = "/proc/cpuinfo";
pub const SMT_CONTROL_PATH: &str = "/sys/devices/system/cpu/smt/control";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Processor description to read.
    cpuinfo_path: Option<String>,
    /// SMT control file to write.
    smt_control_path: Option<String>,
    /// Bug tags that make SMT siblings unsafe.
    cross_thread_bugs: Option<Vec<String>>,
    /// Cpulist patterns acceptable after writing "off".
    expected_off: Option<Vec<String>>,
    /// Cpulist patterns acceptable after writing "on".
    expected_on: Option<Vec<String>>,
}

impl Config {
    /// Processor description to read.
    pub fn cpuinfo_path(&self) -> &str {
        match &self.cpuinfo_path {
            Some(path) => path,
            None => CPUINFO_PATH,
        }
    }

    /// SMT control file to write.
    pub fn smt_control_path(&self) -> &str {
        match &self.smt_control_path {
            Some(path) => path,
            None => SMT_CONTROL_PATH,
        }
    }

    /// Bug tags that make SMT siblings unsafe.
    pub fn cross_thread_bugs(&self) -> Vec<String> {
        match &self.cross_thread_bugs {
            Some(bugs) => bugs.clone(),
            None => CROSS_THREAD_BUGS.iter().map(|b| b.to_string()).collect(),
        }
    }

    /// Cpulist patterns acceptable after writing "off".
    pub fn expected_off(&self) -> &[String] {
        self.expected_off.as_deref().unwrap_or(&[])
    }

    /// Cpulist patterns acceptable after writing "on".
    pub fn expected_on(&self) -> &[String] {
        self.expected_on.as_deref().unwrap_or(&[])
    }

    /// Loads a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merges a Config with the command line, which wins where set.
    pub fn merge_cli(config: &Config, opts: &Opts) -> Config {
        Config {
            cpuinfo_path: match &opts.cpuinfo {
                Some(s) if !s.is_empty() => Some(s.to_string()),
                _ => config.cpuinfo_path.clone(),
            },
            smt_control_path: match &opts.smt_control {
                Some(s) if !s.is_empty() => Some(s.to_string()),
                _ => config.smt_control_path.clone(),
            },
            cross_thread_bugs: config.cross_thread_bugs.clone(),
            expected_off: config.expected_off.clone(),
            expected_on: config.expected_on.clone(),
        }
    }
}
