use std::fmt::{Display, Formatter, Error as FmtError};

use crate::util;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PciId {
    pub vendor: u16,
    pub device: u16,
}

impl Display for PciId {
    fn fmt(&self, f: &mut Formatter) -> Result<(), FmtError> {
        write!(f, "{:04x}:{:04x}", self.vendor, self.device)
    }
}

/// One function as listed by `lspci -nn`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PciDevice {
    pub id: PciId,
    pub pci_slot: String,
    pub class_name: String,
    /// Everything after the class, vendor and model names included.
    pub description: String,
}

impl Display for PciDevice {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), FmtError> {
        write!(fmt, "{} {} [{}]", self.pci_slot, self.description, self.id)
    }
}

impl PciDevice {
    /// Parses a line like
    /// `0e:00.0 VGA compatible controller [0300]: NVIDIA Corporation GP104 [GeForce GTX 1070] [10de:1b81] (rev a1)`.
    pub fn parse(line: &str) -> Option<PciDevice> {
        let line = line.trim();
        let (pci_slot, rest) = line.split_once(char::is_whitespace)?;
        if !pci_slot.contains('.') {
            return None;
        }
        let (class, description) = rest.split_once(": ")?;
        let class_name = match class.rfind(" [") {
            Some(idx) => &class[..idx],
            None => class,
        };

        // the id is the last bracketed vendor:device pair
        let id = description.match_indices('[').rev().find_map(|(idx, _)| {
            let inner = &description[idx + 1..];
            let end = inner.find(']')?;
            let (vendor, device) = inner[..end].split_once(':')?;
            Some(PciId { vendor: util::parse_hex(vendor)?, device: util::parse_hex(device)? })
        })?;

        Some(PciDevice {
            id,
            pci_slot: pci_slot.to_owned(),
            class_name: class_name.trim().to_owned(),
            description: description.trim().to_owned(),
        })
    }

    /// Bus and slot without the function number.
    pub fn pci_device(&self) -> &str {
        match self.pci_slot.rfind('.') {
            Some(idx) => &self.pci_slot[..idx],
            None => &self.pci_slot,
        }
    }

    pub fn is_display_controller(&self) -> bool {
        self.class_name.starts_with("VGA") || self.class_name.starts_with("3D controller")
            || self.class_name.starts_with("Display controller")
    }
}
