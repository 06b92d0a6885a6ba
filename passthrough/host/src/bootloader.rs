use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

use common::error::{ConfigurationError, Result};
use common::runner::CommandRunner;

const PROBE: &str = "efibootmgr -v";
const NO_EFI: &str = "EFI variables are not supported";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Bootloader {
    GrubBios,
    GrubUefi,
    GrubUefiSecure,
    SystemdBoot,
}

impl Display for Bootloader {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_str(match *self {
            Bootloader::GrubBios => "GRUB (BIOS/Legacy)",
            Bootloader::GrubUefi => "GRUB (UEFI)",
            Bootloader::GrubUefiSecure => "GRUB with Secure Boot (UEFI)",
            Bootloader::SystemdBoot => "systemd-boot",
        })
    }
}

impl Bootloader {
    /// Regenerates the boot entries from the edited kernel command line.
    pub fn regenerate_command(self) -> &'static str {
        match self {
            Bootloader::GrubBios | Bootloader::GrubUefi | Bootloader::GrubUefiSecure => "update-grub",
            Bootloader::SystemdBoot => "proxmox-boot-tool refresh",
        }
    }
}

fn classify_entry(entry: &str) -> Option<Bootloader> {
    let entry = entry.to_lowercase();
    if entry.contains("shimx64.efi") {
        Some(Bootloader::GrubUefiSecure)
    } else if entry.contains("grubx64.efi") {
        Some(Bootloader::GrubUefi)
    } else if entry.contains("systemd-bootx64.efi") {
        Some(Bootloader::SystemdBoot)
    } else {
        None
    }
}

/// Classifies `efibootmgr -v` output, preferring the entry we are currently booted from.
pub fn classify(output: &str) -> Result<Bootloader> {
    if output.contains(NO_EFI) {
        return Ok(Bootloader::GrubBios);
    }

    let current = output.lines()
        .find_map(|line| line.strip_prefix("BootCurrent:"))
        .map(|x| format!("Boot{}", x.trim()));
    let current_entry = current.and_then(|current| output.lines().find(|line| line.starts_with(&current)));

    current_entry.and_then(classify_entry)
        .or_else(|| output.lines().find_map(classify_entry))
        .ok_or(ConfigurationError::UnknownBootloader)
}

pub fn detect<R: CommandRunner + ?Sized>(runner: &R, limit: Duration) -> Result<Bootloader> {
    info!("Determining bootloader...");
    let output = runner.run(PROBE, limit)
        .map_err(|e| ConfigurationError::Probe { command: PROBE.to_owned(), cause: e.to_string() })?;

    // efibootmgr exits non-zero on legacy systems and says why on stderr
    let bootloader = if output.success() {
        classify(&output.stdout)?
    } else if output.stderr.contains(NO_EFI) {
        Bootloader::GrubBios
    } else {
        error!("Failed to determine bootloader: {}", output.diagnostic());
        return Err(ConfigurationError::Probe { command: PROBE.to_owned(), cause: output.diagnostic() });
    };
    info!("{} is used.", bootloader);
    Ok(bootloader)
}
