// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CPU set topology
//!
//! A CpuSet is built from one cpuinfo snapshot and arranges its processors
//! hierarchically as Package -> Core -> thread:
//!
//!```text
//!                              CpuSet
//!                                 |
//!              o------------------o------------------o
//!              |                                     |
//!    o---------o----------o                o---------o----------o
//!    |       Package      |       ...      |       Package      |
//!    | ID     0           |                | ID     1           |
//!    | Cores  <id, Core>  |                | Cores  <id, Core>  |
//!    | Span   0-3         |                | Span   4-7         |
//!    o--------------------o                o--------------------o
//!              |
//!    o---------o----------o
//!    |        Core        |
//!    | ID     0           |
//!    | Cpus   <id, cpu>   |
//!    | Span   0-1         |
//!    o--------------------o
//!```
//!
//! Every object carries a Cpumask spanning the CPUs below it. A CpuSet is
//! read-only. cpuinfo may be caught mid-transition (e.g. while SMT siblings
//! are going offline) so uneven cores are modeled, not rejected: the set
//! reports the largest thread count seen and counts the shortfall as offline
//! threads.
//!
//! Creating a CpuSet
//! -----------------
//!
//!```no_run
//!     use smt_utils::{CpuSet, CROSS_THREAD_BUGS};
//!     let cpus = CpuSet::from_file("/proc/cpuinfo", CROSS_THREAD_BUGS).unwrap();
//!     println!("{} cpus: {}", cpus.nr_cpus(), cpus);
//!```

use crate::cpuinfo;
use crate::Cpumask;
use crate::LogicalProcessor;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::warn;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Bugs that let one SMT sibling observe the other's data. Disabling SMT is
/// the only full mitigation for these, so they decide vulnerability.
///
/// From the kernel's hw-vuln documentation: L1TF, MDS, TAA and MMIO stale
/// data all warn when SMT is left on, and smt_rsb is the AMD cross-thread
/// return stack issue.
pub const CROSS_THREAD_BUGS: &[&str] = &["l1tf", "mds", "taa", "mmio_stale_data", "smt_rsb"];

#[derive(Debug, Clone)]
pub struct Core {
    id: usize,
    cpus: BTreeMap<usize, LogicalProcessor>,
    span: Cpumask,
}

impl Core {
    /// Get the ID of this Core
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the map of hardware threads inside this Core
    pub fn cpus(&self) -> &BTreeMap<usize, LogicalProcessor> {
        &self.cpus
    }

    /// Get a Cpumask of all SMT siblings in this Core
    pub fn span(&self) -> Cpumask {
        self.span.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    id: usize,
    cores: BTreeMap<usize, Core>,
    span: Cpumask,
}

impl Package {
    /// Get the physical ID of this Package
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the map of cores inside this Package
    pub fn cores(&self) -> &BTreeMap<usize, Core> {
        &self.cores
    }

    /// Get a Cpumask of all CPUs in this Package
    pub fn span(&self) -> Cpumask {
        self.span.clone()
    }
}

#[derive(Debug, Clone)]
pub struct CpuSet {
    processors: Vec<LogicalProcessor>,
    packages: BTreeMap<usize, Package>,
    span: Cpumask,
    threads_per_core: usize,
    vulnerable_bugs: BTreeSet<String>,
}

impl CpuSet {
    /// Parse cpuinfo text and build the topology. `cross_thread_bugs` lists
    /// the bug tags that count toward vulnerability.
    pub fn new<S: AsRef<str>>(cpuinfo: &str, cross_thread_bugs: &[S]) -> Result<CpuSet> {
        let parsed = cpuinfo::parse(cpuinfo)?;

        let mut processors = Vec::with_capacity(parsed.len());
        let mut packages: BTreeMap<usize, Package> = BTreeMap::new();
        let mut span = Cpumask::new();
        let mut vulnerable_bugs = BTreeSet::new();

        for cpu in parsed {
            if span.test_cpu(cpu.processor) {
                warn!("Ignoring duplicate processor {}", cpu.processor);
                continue;
            }

            for bug in cross_thread_bugs {
                let bug: &str = bug.as_ref();
                if cpu.has_bug(bug) {
                    vulnerable_bugs.insert(bug.to_string());
                }
            }

            let package = packages.entry(cpu.physical_id).or_insert_with(|| Package {
                id: cpu.physical_id,
                cores: BTreeMap::new(),
                span: Cpumask::new(),
            });
            let core = package.cores.entry(cpu.core_id).or_insert_with(|| Core {
                id: cpu.core_id,
                cpus: BTreeMap::new(),
                span: Cpumask::new(),
            });

            core.span.set_cpu(cpu.processor);
            package.span.set_cpu(cpu.processor);
            span.set_cpu(cpu.processor);
            core.cpus.insert(cpu.processor, cpu.clone());
            processors.push(cpu);
        }

        let threads_per_core = packages
            .values()
            .flat_map(|package| package.cores.values())
            .map(|core| core.cpus.len())
            .max()
            .unwrap_or(0);

        let set = CpuSet {
            processors,
            packages,
            span,
            threads_per_core,
            vulnerable_bugs,
        };

        let offline = set.nr_offline_threads();
        if offline > 0 {
            debug!(
                "Uneven topology: {} threads missing from cores with fewer than {} threads",
                offline, threads_per_core
            );
        }

        Ok(set)
    }

    /// Read a cpuinfo file wholesale and build the topology from it.
    pub fn from_file<P: AsRef<Path>, S: AsRef<str>>(
        path: P,
        cross_thread_bugs: &[S],
    ) -> Result<CpuSet> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        CpuSet::new(&data, cross_thread_bugs)
    }

    /// Processors in the order cpuinfo listed them.
    pub fn processors(&self) -> &[LogicalProcessor] {
        &self.processors
    }

    /// Get the map of packages keyed by physical ID.
    pub fn packages(&self) -> &BTreeMap<usize, Package> {
        &self.packages
    }

    /// Number of logical processors.
    pub fn nr_cpus(&self) -> usize {
        self.processors.len()
    }

    /// Number of cores across all packages.
    pub fn nr_cores(&self) -> usize {
        self.packages.values().map(|package| package.cores.len()).sum()
    }

    /// Largest number of hardware threads found on any core.
    pub fn threads_per_core(&self) -> usize {
        self.threads_per_core
    }

    /// Threads missing from cores that have fewer than threads_per_core().
    pub fn nr_offline_threads(&self) -> usize {
        self.packages
            .values()
            .flat_map(|package| package.cores.values())
            .map(|core| self.threads_per_core - core.cpus.len())
            .sum()
    }

    /// Cross-thread bugs reported by at least one processor.
    pub fn vulnerable_bugs(&self) -> &BTreeSet<String> {
        &self.vulnerable_bugs
    }

    /// Is any processor exposed to a cross-thread bug with an SMT sibling
    /// to leak to? Without siblings turning SMT off changes nothing.
    pub fn is_vulnerable(&self) -> bool {
        self.threads_per_core > 1 && !self.vulnerable_bugs.is_empty()
    }

    /// Get a cpumask of every processor in the set.
    pub fn span(&self) -> Cpumask {
        self.span.clone()
    }
}

/// The cpulist of the processors in the set, e.g. "0-3,6".
impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;
    use crate::ParseError;
    use std::io::Write;

    #[test]
    fn mock_machines_match_their_description() {
        for cpu in mock::ALL {
            let set = CpuSet::new(&cpu.make_cpuinfo(), CROSS_THREAD_BUGS).unwrap();
            assert_eq!(set.nr_cpus(), cpu.nr_cpus(), "{}", cpu.name);
            assert_eq!(set.packages().len(), cpu.physical_cores, "{}", cpu.name);
            assert_eq!(
                set.nr_cores(),
                cpu.physical_cores * cpu.cores,
                "{}",
                cpu.name
            );
            assert_eq!(set.threads_per_core(), cpu.threads_per_core, "{}", cpu.name);
            assert_eq!(set.is_vulnerable(), cpu.is_vulnerable, "{}", cpu.name);
            assert_eq!(set.nr_offline_threads(), 0, "{}", cpu.name);
        }
    }

    #[test]
    fn mitigated_machines_are_not_vulnerable() {
        for cpu in mock::ALL {
            let set = CpuSet::new(&cpu.make_mitigated_cpuinfo(), CROSS_THREAD_BUGS).unwrap();
            assert!(!set.is_vulnerable(), "{}", cpu.name);
        }
    }

    #[test]
    fn single_thread_cores_are_never_vulnerable() {
        let set = CpuSet::new(&mock::HASWELL_2_CORE.make_cpuinfo(), CROSS_THREAD_BUGS).unwrap();
        assert_eq!(set.threads_per_core(), 1);
        assert!(set.vulnerable_bugs().contains("mds"));
        assert!(set.vulnerable_bugs().contains("l1tf"));
        assert!(!set.is_vulnerable());
    }

    #[test]
    fn bug_list_is_configurable() {
        let text = mock::AMD_2.make_cpuinfo();
        let none: &[&str] = &[];
        assert!(!CpuSet::new(&text, none).unwrap().is_vulnerable());
        assert!(CpuSet::new(&text, &["spectre_v2"]).unwrap().is_vulnerable());
        assert!(CpuSet::new(&text, &["spectre_v2".to_string()]).unwrap().is_vulnerable());
    }

    #[test]
    fn hierarchy_is_grouped_by_ids() {
        let set = CpuSet::new(&mock::AMD_8.make_cpuinfo(), CROSS_THREAD_BUGS).unwrap();
        let ids: Vec<usize> = set.packages().keys().copied().collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let package = &set.packages()[&2];
        assert_eq!(package.id(), 2);
        assert_eq!(package.span().to_string(), "4-5");
        let core = &package.cores()[&0];
        assert_eq!(core.id(), 0);
        assert_eq!(core.cpus().keys().copied().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(core.span().iter().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn contiguous_processors_render_one_range() {
        let set = CpuSet::new(&mock::AMD_8.make_cpuinfo(), CROSS_THREAD_BUGS).unwrap();
        assert_eq!(set.to_string(), "0-7");
        assert_eq!(set.span().weight(), 8);
    }

    #[test]
    fn gap_splits_range() {
        let text = mock::AMD_8.make_cpuinfo();
        let blocks: Vec<&str> = text
            .split("\n\n")
            .filter(|b| !b.trim().is_empty())
            .collect();
        for gap in 1..7 {
            let kept: Vec<&str> = blocks
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != gap)
                .map(|(_, b)| *b)
                .collect();
            let set = CpuSet::new(&kept.join("\n\n"), CROSS_THREAD_BUGS).unwrap();
            let want = match gap {
                1 => "0,2-7".to_string(),
                6 => "0-5,7".to_string(),
                g => format!("0-{},{}-7", g - 1, g + 1),
            };
            assert_eq!(set.to_string(), want);
        }
    }

    #[test]
    fn processors_keep_input_order() {
        let text = mock::CASCADE_LAKE_4.make_cpuinfo();
        let mut blocks: Vec<&str> = text
            .split("\n\n")
            .filter(|b| !b.trim().is_empty())
            .collect();
        blocks.swap(0, 3);
        let set = CpuSet::new(&blocks.join("\n\n"), CROSS_THREAD_BUGS).unwrap();
        let ids: Vec<usize> = set.processors().iter().map(|p| p.processor).collect();
        assert_eq!(ids, vec![3, 1, 2, 0]);
        assert_eq!(set.to_string(), "0-3");
    }

    #[test]
    fn uneven_cores_count_offline_threads() {
        // CascadeLake4 caught with one sibling of core 1 already gone.
        let text = mock::CASCADE_LAKE_4.make_cpuinfo();
        let blocks: Vec<&str> = text
            .split("\n\n")
            .filter(|b| !b.trim().is_empty())
            .take(3)
            .collect();
        let set = CpuSet::new(&blocks.join("\n\n"), CROSS_THREAD_BUGS).unwrap();
        assert_eq!(set.nr_cpus(), 3);
        assert_eq!(set.threads_per_core(), 2);
        assert_eq!(set.nr_offline_threads(), 1);
        assert!(set.is_vulnerable());
        assert_eq!(set.to_string(), "0-2");
    }

    #[test]
    fn duplicate_processors_are_ignored() {
        let text = mock::CASCADE_LAKE_2.make_cpuinfo();
        let doubled = format!("{}{}", text, text);
        let set = CpuSet::new(&doubled, CROSS_THREAD_BUGS).unwrap();
        assert_eq!(set.nr_cpus(), 2);
        assert_eq!(set.threads_per_core(), 2);
    }

    #[test]
    fn huge_processor_ordinal_is_an_error() {
        let text = mock::AMD_2
            .make_cpuinfo()
            .replacen("processor\t: 1", "processor\t: 18446744073709551615", 1);
        let err = CpuSet::new(&text, CROSS_THREAD_BUGS).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParseError>(),
            Some(ParseError::InvalidValue {
                key: crate::CpuInfoKey::Processor,
                ..
            })
        ));
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = CpuSet::new("", CROSS_THREAD_BUGS).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParseError>(),
            Some(ParseError::NoProcessors { .. })
        ));
    }

    #[test]
    fn from_file_reads_cpuinfo() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(mock::HASWELL_2.make_cpuinfo().as_bytes())
            .unwrap();
        let set = CpuSet::from_file(file.path(), CROSS_THREAD_BUGS).unwrap();
        assert!(set.is_vulnerable());
        assert_eq!(set.to_string(), "0-1");
    }

    #[test]
    fn from_file_missing_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpuinfo");
        let err = CpuSet::from_file(&path, CROSS_THREAD_BUGS).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
    }
}
