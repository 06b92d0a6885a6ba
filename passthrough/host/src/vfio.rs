use std::path::Path;

use common::facts::GpuVendor;
use common::util::shell_quote;

use crate::lines;

/// Modules that have to be loaded at boot for vfio-pci to grab the card.
pub const KERNEL_MODULES: [&str; 3] = ["vfio", "vfio_iommu_type1", "vfio_pci"];

/// Host drivers that would otherwise claim a GPU of the given vendor.
pub fn host_drivers(vendor: GpuVendor) -> &'static [&'static str] {
    match vendor {
        GpuVendor::Amd => &["radeon", "amdgpu"],
        GpuVendor::Nvidia => &["nouveau", "nvidia", "nvidiafb", "nvidia_drm"],
        GpuVendor::Intel => &["snd_hda_intel", "snd_hda_codec_hdmi", "i915"],
        GpuVendor::Unknown => &[],
    }
}

pub fn modconf_line(device_codes: &[String]) -> String {
    format!("options vfio-pci ids={}", device_codes.join(","))
}

/// Replaces `path` with a modprobe config binding vfio-pci to `device_codes`.
pub fn write_modconf_command(path: &Path, device_codes: &[String]) -> String {
    format!("echo {} > {}", shell_quote(&modconf_line(device_codes)), shell_quote(&path.to_string_lossy()))
}

pub fn remove_modconf_command(path: &Path) -> String {
    format!("rm -f {}", shell_quote(&path.to_string_lossy()))
}

pub fn load_module_command(modules: &Path, module: &str) -> String {
    lines::append_command(modules, module)
}

pub fn unload_module_command(modules: &Path, module: &str) -> String {
    lines::remove_command(modules, module)
}

pub fn blacklist_line(driver: &str) -> String {
    format!("blacklist {}", driver)
}

pub fn blacklist_command(blacklist: &Path, driver: &str) -> String {
    lines::append_command(blacklist, &blacklist_line(driver))
}

pub fn unblacklist_command(blacklist: &Path, driver: &str) -> String {
    lines::remove_command(blacklist, &blacklist_line(driver))
}
