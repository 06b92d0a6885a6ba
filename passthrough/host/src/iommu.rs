use std::fs;
use std::path::Path;
use std::time::Duration;

use common::runner::CommandRunner;

pub const KERNEL_LOG_PROBE: &str = "dmesg | grep -e IOMMU";

/// The kernel registers one sysfs entry per active IOMMU.
pub fn is_enabled(sysfs: &Path) -> bool {
    fs::read_dir(sysfs).ok().and_then(|mut x| x.next()).is_some()
}

fn kernel_log_says_enabled(log: &str) -> bool {
    log.contains("IOMMU") && !log.lines().any(|x| x.contains("IOMMU disabled"))
}

/// Best-effort activation check. Never fails, the kernel parameters only take effect after a reboot
/// anyway.
pub fn check<R: CommandRunner + ?Sized>(runner: &R, sysfs: &Path, limit: Duration) -> bool {
    info!("Checking if IOMMU is enabled...");
    let from_log = match runner.run(KERNEL_LOG_PROBE, limit) {
        Ok(output) if output.success() => kernel_log_says_enabled(&output.stdout),
        Ok(output) => {
            debug!("Kernel log check failed: {}", output.diagnostic());
            false
        }
        Err(e) => {
            debug!("Kernel log check failed: {}", e);
            false
        }
    };

    let enabled = from_log || is_enabled(sysfs);
    if enabled {
        info!("IOMMU is enabled.");
    }
    enabled
}
