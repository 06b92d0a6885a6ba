use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::Result;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CpuVendor {
    Amd,
    Intel,
    Unknown,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum GpuVendor {
    Intel,
    Amd,
    Nvidia,
    Unknown,
}

impl Display for GpuVendor {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_str(match *self {
            GpuVendor::Intel => "Intel",
            GpuVendor::Amd => "AMD",
            GpuVendor::Nvidia => "NVIDIA",
            GpuVendor::Unknown => "unknown",
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GpuFacts {
    pub present: bool,
    pub vendor: GpuVendor,
    /// Bus/slot shared by the video function and its siblings, e.g. `0e:00`.
    pub pci_bus_root: String,
    /// `vendor:device` of every function on `pci_bus_root`, in bus order.
    pub device_codes: Vec<String>,
}

impl GpuFacts {
    pub fn absent() -> GpuFacts {
        GpuFacts {
            present: false,
            vendor: GpuVendor::Unknown,
            pci_bus_root: String::new(),
            device_codes: Vec::new(),
        }
    }
}

/// Classified host facts. Gathered once per run and never mutated afterwards.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HardwareFacts {
    pub cpu_vendor: CpuVendor,
    pub gpu: GpuFacts,
}

/// Source of [`HardwareFacts`].
///
/// The real implementation shells out to `lscpu`/`lspci`; tests hand in synthetic facts.
pub trait HardwareSnapshot {
    fn inspect(&self) -> Result<HardwareFacts>;
}

/// Snapshot that always returns the same facts.
pub struct FixedSnapshot(pub HardwareFacts);

impl HardwareSnapshot for FixedSnapshot {
    fn inspect(&self) -> Result<HardwareFacts> {
        Ok(self.0.clone())
    }
}
