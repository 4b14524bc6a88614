// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CPU topology utilities for SMT mitigation
//!
//! Cross-thread side-channel issues (MDS, L1TF and friends) let one hardware
//! thread observe data from its SMT sibling. The only complete mitigation on
//! affected parts is to turn SMT off, which the kernel exposes as a single
//! global switch.
//!
//! This crate holds the pieces needed to decide whether flipping that switch
//! is warranted:
//!
//! - [`cpuinfo`] parses `/proc/cpuinfo` text into [`LogicalProcessor`]
//!   records.
//! - [`topology`] assembles the records into a package -> core -> thread
//!   hierarchy ([`CpuSet`]) and classifies it.
//! - [`cpumask`] is the CPU id bitmap used for spans and cpulist rendering.

pub mod cpuinfo;
pub use cpuinfo::CpuInfoKey;
pub use cpuinfo::LogicalProcessor;
pub use cpuinfo::ParseError;

pub mod cpumask;
pub use cpumask::Cpumask;

pub mod topology;
pub use topology::Core;
pub use topology::CpuSet;
pub use topology::Package;
pub use topology::CROSS_THREAD_BUGS;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
