// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Synthetic /proc/cpuinfo fixtures for tests.

/// Description of a machine to render as cpuinfo text.
#[derive(Debug, Clone, Copy)]
pub struct MockCpu {
    pub name: &'static str,
    pub vendor_id: &'static str,
    pub family: usize,
    pub model: usize,
    pub model_name: &'static str,
    pub bugs: &'static str,
    pub physical_cores: usize,
    pub cores: usize,
    pub threads_per_core: usize,
    /// Expected classification with the default cross-thread bug list.
    pub is_vulnerable: bool,
}

/// Two thread Intel CascadeLake.
pub const CASCADE_LAKE_2: MockCpu = MockCpu {
    name: "CascadeLake",
    vendor_id: "GenuineIntel",
    family: 6,
    model: 85,
    model_name: "Intel(R) Xeon(R) CPU",
    bugs: "spectre_v1 spectre_v2 spec_store_bypass mds swapgs taa",
    physical_cores: 1,
    cores: 1,
    threads_per_core: 2,
    is_vulnerable: true,
};

/// Two core, four thread Intel CascadeLake.
pub const CASCADE_LAKE_4: MockCpu = MockCpu {
    name: "CascadeLake",
    vendor_id: "GenuineIntel",
    family: 6,
    model: 85,
    model_name: "Intel(R) Xeon(R) CPU",
    bugs: "spectre_v1 spectre_v2 spec_store_bypass mds swapgs taa",
    physical_cores: 1,
    cores: 2,
    threads_per_core: 2,
    is_vulnerable: true,
};

/// Two thread Intel Haswell.
pub const HASWELL_2: MockCpu = MockCpu {
    name: "Haswell",
    vendor_id: "GenuineIntel",
    family: 6,
    model: 63,
    model_name: "Intel(R) Xeon(R) CPU",
    bugs: "cpu_meltdown spectre_v1 spectre_v2 spec_store_bypass l1tf mds swapgs",
    physical_cores: 1,
    cores: 1,
    threads_per_core: 2,
    is_vulnerable: true,
};

/// Intel Haswell with two packages and no hyperthread pairs. The bugs are
/// there but there is no sibling to leak to.
pub const HASWELL_2_CORE: MockCpu = MockCpu {
    name: "Haswell2Physical",
    vendor_id: "GenuineIntel",
    family: 6,
    model: 63,
    model_name: "Intel(R) Xeon(R) CPU",
    bugs: "cpu_meltdown spectre_v1 spectre_v2 spec_store_bypass l1tf mds swapgs",
    physical_cores: 2,
    cores: 1,
    threads_per_core: 1,
    is_vulnerable: false,
};

/// Two thread AMD.
pub const AMD_2: MockCpu = MockCpu {
    name: "AMD",
    vendor_id: "AuthenticAMD",
    family: 23,
    model: 49,
    model_name: "AMD EPYC 7B12",
    bugs: "sysret_ss_attrs spectre_v1 spectre_v2 spec_store_bypass",
    physical_cores: 1,
    cores: 1,
    threads_per_core: 2,
    is_vulnerable: false,
};

/// Eight thread AMD over four packages.
pub const AMD_8: MockCpu = MockCpu {
    name: "AMD",
    vendor_id: "AuthenticAMD",
    family: 23,
    model: 49,
    model_name: "AMD EPYC 7B12",
    bugs: "sysret_ss_attrs spectre_v1 spectre_v2 spec_store_bypass",
    physical_cores: 4,
    cores: 1,
    threads_per_core: 2,
    is_vulnerable: false,
};

/// Single thread per core AMD, as seen after SMT has been turned off.
pub const AMD_4_NOSMT: MockCpu = MockCpu {
    name: "AMDNoSMT",
    vendor_id: "AuthenticAMD",
    family: 23,
    model: 49,
    model_name: "AMD EPYC 7B12",
    bugs: "sysret_ss_attrs spectre_v1 spectre_v2 spec_store_bypass",
    physical_cores: 1,
    cores: 4,
    threads_per_core: 1,
    is_vulnerable: false,
};

pub const ALL: [MockCpu; 7] = [
    CASCADE_LAKE_2,
    CASCADE_LAKE_4,
    HASWELL_2,
    HASWELL_2_CORE,
    AMD_2,
    AMD_8,
    AMD_4_NOSMT,
];

impl MockCpu {
    /// cpuinfo text for the machine as described.
    pub fn make_cpuinfo(&self) -> String {
        self.render(self.physical_cores, self.cores, self.threads_per_core)
    }

    /// cpuinfo text for the machine once SMT has been turned off. Machines
    /// that aren't vulnerable are left alone.
    pub fn make_mitigated_cpuinfo(&self) -> String {
        if self.is_vulnerable {
            return self.render(self.physical_cores, self.cores, 1);
        }
        self.make_cpuinfo()
    }

    /// Number of logical processors in the generated text.
    pub fn nr_cpus(&self) -> usize {
        self.physical_cores * self.cores * self.threads_per_core
    }

    fn render(&self, physical_cores: usize, cores: usize, threads_per_core: usize) -> String {
        let mut ret = String::new();
        for package in 0..physical_cores {
            for core in 0..cores {
                for thread in 0..threads_per_core {
                    let processor = (package * cores + core) * threads_per_core + thread;
                    ret.push_str(&format!(
                        "processor\t: {}\n\
                         vendor_id\t: {}\n\
                         cpu family\t: {}\n\
                         model\t\t: {}\n\
                         model name\t: {}\n\
                         physical id  : {}\n\
                         core id\t\t: {}\n\
                         cpu cores\t: {}\n\
                         bugs\t\t: {}\n\
                         \n",
                        processor,
                        self.vendor_id,
                        self.family,
                        self.model,
                        self.model_name,
                        package,
                        core,
                        cores,
                        self.bugs,
                    ));
                }
            }
        }
        ret
    }
}
