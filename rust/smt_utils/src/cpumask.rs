// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Cpumask
//!
//! A Cpumask is a BitVec of u64's indexed by CPU id. Unlike a kernel cpumask
//! it is not sized from the host's possible CPUs: it grows as CPUs are set,
//! so masks can be built from any cpuinfo snapshot, including synthetic ones.
//!
//! Masks render in the kernel cpulist notation:
//!
//!```
//!     use smt_utils::Cpumask;
//!     let mut mask = Cpumask::new();
//!     for cpu in [0, 1, 2, 3, 8, 9] {
//!         mask.set_cpu(cpu);
//!     }
//!     assert!(mask.test_cpu(2));
//!     assert_eq!(mask.to_string(), "0-3,8-9");
//!```

use bitvec::prelude::*;
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct Cpumask {
    mask: BitVec<u64, Lsb0>,
}

impl Cpumask {
    /// Build a new empty Cpumask object.
    pub fn new() -> Cpumask {
        Cpumask {
            mask: BitVec::new(),
        }
    }

    /// Set a bit in the Cpumask, growing it if needed.
    pub fn set_cpu(&mut self, cpu: usize) {
        if cpu >= self.mask.len() {
            self.mask.resize(cpu + 1, false);
        }
        self.mask.set(cpu, true);
    }

    /// Test whether the specified CPU bit is set in the Cpumask.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        match self.mask.get(cpu) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Count the number of bits set in the Cpumask.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    /// Iterate over the ids of the CPUs set in the mask, in ascending order.
    pub fn iter(&self) -> CpumaskIterator<'_> {
        CpumaskIterator {
            mask: self,
            index: 0,
        }
    }
}

pub struct CpumaskIterator<'a> {
    mask: &'a Cpumask,
    index: usize,
}

impl Iterator for CpumaskIterator<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.mask.mask.len() {
            let index = self.index;
            self.index += 1;
            if self.mask.test_cpu(index) {
                return Some(index);
            }
        }

        None
    }
}

// Masks that differ only in trailing cleared bits are the same set of CPUs.
impl PartialEq for Cpumask {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Cpumask {}

/// Render as a cpulist: ascending ids, contiguous runs collapsed to "a-b".
impl fmt::Display for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cpus = self.iter().peekable();
        let mut first = true;
        while let Some(start) = cpus.next() {
            let mut end = start;
            while cpus.peek() == Some(&(end + 1)) {
                end += 1;
                cpus.next();
            }

            if !first {
                f.write_str(",")?;
            }
            first = false;

            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}
