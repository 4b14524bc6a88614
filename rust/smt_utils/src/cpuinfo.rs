// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # cpuinfo parser
//!
//! `/proc/cpuinfo` is a sequence of blank-line separated blocks, one per
//! logical processor, each made of `key<ws>: value` lines:
//!
//!```text
//! processor	: 0
//! vendor_id	: GenuineIntel
//! cpu family	: 6
//! model		: 85
//! model name	: Intel(R) Xeon(R) CPU
//! ...
//! physical id	: 0
//! ...
//! core id		: 0
//! ...
//! bugs		: spectre_v1 spectre_v2 spec_store_bypass mds swapgs taa
//!```
//!
//! Only the keys in [`REQUIRED_KEYS`] are kept, and they must show up in
//! that order. Everything else the kernel reports is skipped, so new fields
//! in future kernels don't break parsing.

use std::collections::BTreeSet;
use std::fmt;

/// A cpuinfo key needed to place a processor in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CpuInfoKey {
    Processor,
    VendorId,
    CpuFamily,
    Model,
    ModelName,
    PhysicalId,
    CoreId,
    Bugs,
}

/// The keys every processor block must contain, in the order they must
/// appear.
pub const REQUIRED_KEYS: [CpuInfoKey; 8] = [
    CpuInfoKey::Processor,
    CpuInfoKey::VendorId,
    CpuInfoKey::CpuFamily,
    CpuInfoKey::Model,
    CpuInfoKey::ModelName,
    CpuInfoKey::PhysicalId,
    CpuInfoKey::CoreId,
    CpuInfoKey::Bugs,
];

/// Largest CONFIG_NR_CPUS the kernel accepts. Processor ordinals must be
/// below it.
pub const MAX_CPUS: usize = 8192;

impl CpuInfoKey {
    /// The key as spelled in /proc/cpuinfo.
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuInfoKey::Processor => "processor",
            CpuInfoKey::VendorId => "vendor_id",
            CpuInfoKey::CpuFamily => "cpu family",
            CpuInfoKey::Model => "model",
            CpuInfoKey::ModelName => "model name",
            CpuInfoKey::PhysicalId => "physical id",
            CpuInfoKey::CoreId => "core id",
            CpuInfoKey::Bugs => "bugs",
        }
    }

    fn from_key(key: &str) -> Option<CpuInfoKey> {
        REQUIRED_KEYS.iter().copied().find(|k| k.as_str() == key)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for CpuInfoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hardware thread as reported by cpuinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalProcessor {
    pub processor: usize,
    pub vendor_id: String,
    pub cpu_family: usize,
    pub model: usize,
    pub model_name: String,
    pub physical_id: usize,
    pub core_id: usize,
    pub bugs: BTreeSet<String>,
}

impl LogicalProcessor {
    /// Does the kernel report `bug` for this processor?
    pub fn has_bug(&self, bug: &str) -> bool {
        self.bugs.contains(bug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// `expected` was the next required key but `context` (the offending
    /// line, or the whole block if it ended early) didn't provide it.
    MissingKey {
        expected: CpuInfoKey,
        context: String,
    },
    InvalidValue {
        key: CpuInfoKey,
        value: String,
    },
    NoProcessors {
        input: String,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingKey { expected, context } => {
                write!(f, "failed to match key {:?}: {:?}", expected.as_str(), context)
            }
            ParseError::InvalidValue { key, value } => {
                write!(f, "invalid value for key {:?}: {:?}", key.as_str(), value)
            }
            ParseError::NoProcessors { input } => {
                write!(f, "no processors found for: {:?}", input)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Values of the required keys seen so far in the current block, indexed by
/// key position. `raw` keeps the block text for error reporting.
#[derive(Default)]
struct Accumulator {
    values: Vec<String>,
    raw: String,
}

impl Accumulator {
    fn expected(&self) -> Option<CpuInfoKey> {
        REQUIRED_KEYS.get(self.values.len()).copied()
    }

    fn is_complete(&self) -> bool {
        self.values.len() == REQUIRED_KEYS.len()
    }

    fn accept(&mut self, key: CpuInfoKey, value: &str, line: &str) -> Result<(), ParseError> {
        // A complete block only accepts the start of the next processor,
        // which the caller handles before getting here.
        let expected = self.expected().unwrap_or(CpuInfoKey::Processor);
        if key != expected {
            return Err(ParseError::MissingKey {
                expected,
                context: line.to_string(),
            });
        }
        self.values.push(value.to_string());
        Ok(())
    }

    /// Turn the block into a record. Blocks without any required key are
    /// not processor blocks and yield None.
    fn finish(self) -> Result<Option<LogicalProcessor>, ParseError> {
        if self.values.is_empty() {
            return Ok(None);
        }
        if let Some(expected) = self.expected() {
            return Err(ParseError::MissingKey {
                expected,
                context: self.raw,
            });
        }

        let value = |key: CpuInfoKey| self.values[key.index()].as_str();
        let number = |key: CpuInfoKey| {
            value(key)
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidValue {
                    key,
                    value: value(key).to_string(),
                })
        };

        let processor = number(CpuInfoKey::Processor)?;
        if processor >= MAX_CPUS {
            return Err(ParseError::InvalidValue {
                key: CpuInfoKey::Processor,
                value: value(CpuInfoKey::Processor).to_string(),
            });
        }

        Ok(Some(LogicalProcessor {
            processor,
            vendor_id: value(CpuInfoKey::VendorId).to_string(),
            cpu_family: number(CpuInfoKey::CpuFamily)?,
            model: number(CpuInfoKey::Model)?,
            model_name: value(CpuInfoKey::ModelName).to_string(),
            physical_id: number(CpuInfoKey::PhysicalId)?,
            core_id: number(CpuInfoKey::CoreId)?,
            bugs: value(CpuInfoKey::Bugs)
                .split_whitespace()
                .map(String::from)
                .collect(),
        }))
    }
}

/// Split a `key : value` line. Whitespace around and inside the key is
/// normalized so "physical id  :" and "physical id\t:" match alike.
fn split_line(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.split_whitespace().collect::<Vec<_>>().join(" ");
    Some((key, value.trim()))
}

/// Parse cpuinfo text into processor records, in input order.
pub fn parse(input: &str) -> Result<Vec<LogicalProcessor>, ParseError> {
    let mut processors = Vec::new();
    let mut acc = Accumulator::default();

    for line in input.lines() {
        if line.trim().is_empty() {
            if let Some(processor) = std::mem::take(&mut acc).finish()? {
                processors.push(processor);
            }
            continue;
        }

        let entry = split_line(line)
            .and_then(|(key, value)| CpuInfoKey::from_key(&key).map(|key| (key, value)));

        // Tolerate missing separators between complete blocks.
        if let Some((CpuInfoKey::Processor, _)) = entry {
            if acc.is_complete() {
                if let Some(processor) = std::mem::take(&mut acc).finish()? {
                    processors.push(processor);
                }
            }
        }

        acc.raw.push_str(line);
        acc.raw.push('\n');

        if let Some((key, value)) = entry {
            acc.accept(key, value, line)?;
        }
    }

    if let Some(processor) = acc.finish()? {
        processors.push(processor);
    }

    if processors.is_empty() {
        return Err(ParseError::NoProcessors {
            input: input.to_string(),
        });
    }
    Ok(processors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    const AMD_BLOCK: &str = "processor       : 0
vendor_id       : AuthenticAMD
cpu family      : 23
model           : 49
model name      : AMD EPYC 7B12
stepping        : 0
physical id     : 0
siblings        : 2
core id         : 0
cpu cores       : 1
flags           : fpu vme de pse tsc msr pae mce
bugs            : sysret_ss_attrs spectre_v1 spectre_v2 spec_store_bypass
bogomips        : 4491.57
power management::84
";

    #[test]
    fn parse_single_block() {
        let cpus = parse(AMD_BLOCK).unwrap();
        assert_eq!(cpus.len(), 1);

        let cpu = &cpus[0];
        assert_eq!(cpu.processor, 0);
        assert_eq!(cpu.vendor_id, "AuthenticAMD");
        assert_eq!(cpu.cpu_family, 23);
        assert_eq!(cpu.model, 49);
        assert_eq!(cpu.model_name, "AMD EPYC 7B12");
        assert_eq!(cpu.physical_id, 0);
        assert_eq!(cpu.core_id, 0);
        assert!(cpu.has_bug("spectre_v2"));
        assert!(!cpu.has_bug("mds"));
        assert_eq!(cpu.bugs.len(), 4);
    }

    #[test]
    fn parse_preserves_input_order() {
        let good = mock::CASCADE_LAKE_4.make_cpuinfo();
        let mut blocks: Vec<&str> = good
            .split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .collect();
        blocks.reverse();
        let text = blocks.join("\n\n");
        let ids: Vec<usize> = parse(&text).unwrap().iter().map(|c| c.processor).collect();
        assert_eq!(ids, vec![3, 2, 1, 0]);
    }

    #[test]
    fn parse_tolerates_missing_block_separator() {
        let second = AMD_BLOCK.replace("processor       : 0", "processor : 1");
        let text = format!("{}{}", AMD_BLOCK, second);
        let ids: Vec<usize> = parse(&text).unwrap().iter().map(|c| c.processor).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn parse_empty_fails() {
        let err = parse("").unwrap_err();
        assert_eq!(
            err,
            ParseError::NoProcessors {
                input: String::new()
            }
        );
        assert_eq!(err.to_string(), r#"no processors found for: """#);
    }

    #[test]
    fn parse_garbage_fails_with_no_processors() {
        for input in ["somethingNotCPU", "\n\n\n", "Hardware : BCM2835\nRevision : a02082\n"] {
            assert!(
                matches!(parse(input), Err(ParseError::NoProcessors { .. })),
                "{input:?}"
            );
        }
    }

    #[test]
    fn parse_skips_trailing_non_processor_section() {
        let text = format!("{}\nHardware\t: BCM2835\nSerial\t\t: 0000\n", AMD_BLOCK);
        assert_eq!(parse(&text).unwrap().len(), 1);
    }

    #[test]
    fn parse_missing_core_id_names_key() {
        let partial = "processor       : 1
vendor_id       : AuthenticAMD
cpu family      : 23
model           : 49
model name      : AMD EPYC 7B12
physical id     : 0
bugs         : sysret_ss_attrs spectre_v1 spectre_v2 spec_store_bypass
power management:
";
        let text = format!("{}\n{}", AMD_BLOCK, partial);
        match parse(&text) {
            Err(ParseError::MissingKey { expected, context }) => {
                assert_eq!(expected, CpuInfoKey::CoreId);
                assert!(context.starts_with("bugs"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn parse_truncated_block_names_key() {
        let truncated: String = AMD_BLOCK.lines().take(5).map(|l| format!("{l}\n")).collect();
        match parse(&truncated) {
            Err(ParseError::MissingKey { expected, context }) => {
                assert_eq!(expected, CpuInfoKey::PhysicalId);
                assert_eq!(context, truncated);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn parse_ordering_violation_anywhere_names_key() {
        let good = mock::AMD_8.make_cpuinfo();
        let blocks: Vec<&str> = good.split("\n\n").filter(|b| !b.trim().is_empty()).collect();

        for victim in [0, blocks.len() / 2, blocks.len() - 1] {
            // Move "model name" ahead of "model".
            let swapped = swap_lines(blocks[victim], 3, 4);
            let mut broken = blocks.clone();
            broken[victim] = &swapped;
            let text = broken.join("\n\n");

            match parse(&text) {
                Err(ParseError::MissingKey { expected, context }) => {
                    assert_eq!(expected, CpuInfoKey::Model);
                    assert!(context.starts_with("model name"));
                }
                other => panic!("block {victim}: unexpected result {:?}", other),
            }
        }
    }

    fn swap_lines(block: &str, a: usize, b: usize) -> String {
        let mut lines: Vec<&str> = block.lines().collect();
        lines.swap(a, b);
        lines.join("\n")
    }

    #[test]
    fn parse_invalid_number() {
        let text = AMD_BLOCK.replace("core id         : 0", "core id : zero");
        assert_eq!(
            parse(&text).unwrap_err(),
            ParseError::InvalidValue {
                key: CpuInfoKey::CoreId,
                value: "zero".to_string()
            }
        );
    }

    #[test]
    fn parse_rejects_out_of_range_processor() {
        for ordinal in ["8192", "1000000000000", "18446744073709551615"] {
            let text = AMD_BLOCK.replace(
                "processor       : 0",
                &format!("processor\t: {}", ordinal),
            );
            assert_eq!(
                parse(&text).unwrap_err(),
                ParseError::InvalidValue {
                    key: CpuInfoKey::Processor,
                    value: ordinal.to_string()
                }
            );
        }

        let text = AMD_BLOCK.replace("processor       : 0", "processor\t: 8191");
        assert_eq!(parse(&text).unwrap()[0].processor, 8191);
    }

    #[test]
    fn parse_empty_bugs() {
        let text = AMD_BLOCK.replace(
            "bugs            : sysret_ss_attrs spectre_v1 spectre_v2 spec_store_bypass",
            "bugs\t\t:",
        );
        let cpus = parse(&text).unwrap();
        assert!(cpus[0].bugs.is_empty());
    }

    #[test]
    fn missing_key_message() {
        let err = ParseError::MissingKey {
            expected: CpuInfoKey::CoreId,
            context: "bugs : mds".to_string(),
        };
        assert_eq!(err.to_string(), r#"failed to match key "core id": "bugs : mds""#);
    }
}
