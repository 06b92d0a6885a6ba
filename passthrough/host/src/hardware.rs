use std::time::Duration;

use common::error::{ConfigurationError, Result};
use common::facts::{CpuVendor, GpuFacts, GpuVendor, HardwareFacts, HardwareSnapshot};
use common::pci_device::PciDevice;
use common::runner::CommandRunner;

const CPU_PROBE: &str = "lscpu";
const PCI_PROBE: &str = "lspci -nn";
const BOARD_PROBE: &str = "dmidecode -t baseboard";

/// Reads `Key: value` style tool output.
fn field<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim())
}

pub fn classify_cpu(lscpu: &str) -> CpuVendor {
    match field(lscpu, "Vendor ID") {
        Some("AuthenticAMD") => return CpuVendor::Amd,
        Some("GenuineIntel") => return CpuVendor::Intel,
        _ => (),
    }
    // older lscpu builds only print a model name
    let model = field(lscpu, "Model name").unwrap_or(lscpu).to_lowercase();
    if model.contains("amd") {
        CpuVendor::Amd
    } else if model.contains("intel") {
        CpuVendor::Intel
    } else {
        CpuVendor::Unknown
    }
}

pub fn classify_gpu_vendor(description: &str) -> Result<GpuVendor> {
    let lower = description.to_lowercase();
    if lower.contains("intel") {
        Ok(GpuVendor::Intel)
    } else if lower.contains("amd") || lower.contains("advanced micro devices") || lower.contains("ati technologies") {
        Ok(GpuVendor::Amd)
    } else if lower.contains("nvidia") {
        Ok(GpuVendor::Nvidia)
    } else {
        Err(ConfigurationError::UnknownGpuVendor(description.to_owned()))
    }
}

/// Picks the first display function (VGA, 3D or display controller) and collects every function sharing its bus and slot
/// (the card's HDMI audio, USB-C controller and so on).
pub fn classify_gpu(lspci: &str) -> Result<GpuFacts> {
    let devices: Vec<_> = lspci.lines().filter_map(PciDevice::parse).collect();
    let gpu = match devices.iter().find(|x| x.is_display_controller()) {
        Some(gpu) => gpu,
        None => return Ok(GpuFacts::absent()),
    };

    let vendor = classify_gpu_vendor(&gpu.description)?;
    let device_codes = devices.iter()
        .filter(|x| x.pci_device() == gpu.pci_device())
        .map(|x| x.id.to_string())
        .collect();

    Ok(GpuFacts {
        present: true,
        vendor,
        pci_bus_root: gpu.pci_device().to_owned(),
        device_codes,
    })
}

/// [`HardwareSnapshot`] backed by the usual system information tools.
pub struct HostInspector<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    limit: Duration,
}

impl<'a, R: CommandRunner + ?Sized> HostInspector<'a, R> {
    pub fn new(runner: &'a R, limit: Duration) -> HostInspector<'a, R> {
        HostInspector { runner, limit }
    }

    fn probe(&self, command: &str) -> Result<String> {
        let output = self.runner.run(command, self.limit)
            .map_err(|e| ConfigurationError::Probe { command: command.to_owned(), cause: e.to_string() })?;
        if !output.success() {
            error!("Failed to retrieve hardware information: {}", output.diagnostic());
            return Err(ConfigurationError::Probe { command: command.to_owned(), cause: output.diagnostic() });
        }
        Ok(output.stdout)
    }
}

impl<'a, R: CommandRunner + ?Sized> HardwareSnapshot for HostInspector<'a, R> {
    fn inspect(&self) -> Result<HardwareFacts> {
        info!("Inspecting hardware...");

        // purely informational, usually needs root
        match self.probe(BOARD_PROBE) {
            Ok(board) => info!("Motherboard: {}", field(&board, "Product Name").unwrap_or("unknown")),
            Err(e) => debug!("Skipping motherboard info: {}", e),
        }

        let lscpu = self.probe(CPU_PROBE)?;
        let cpu_vendor = classify_cpu(&lscpu);
        info!("CPU: {} ({:?})", field(&lscpu, "Model name").unwrap_or("unknown"), cpu_vendor);

        let gpu = classify_gpu(&self.probe(PCI_PROBE)?)?;
        if gpu.present {
            info!("GPU: {} at {} [{}]", gpu.vendor, gpu.pci_bus_root, gpu.device_codes.join(","));
        } else {
            warn!("No VGA controller found");
        }

        Ok(HardwareFacts { cpu_vendor, gpu })
    }
}
