use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;

use common::config::{Paths, Remedy};
use common::error::{ConfigurationError, Result};
use common::facts::{GpuVendor, HardwareFacts};
use host::bootloader::Bootloader;
use host::grub::{self, GrubConfig};
use host::{initramfs, lines, vfio};

use crate::comparator::Discrepancy;

/// One mutating step and the command that undoes it.
///
/// Rollbacks have to cope with the action having run only partially, so they delete or restore
/// instead of relying on exact prior content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedAction {
    pub action: String,
    pub rollback: Option<String>,
    /// When set, the rollback only applies if the action printed this line, i.e. it really
    /// changed something instead of finding the host already in shape.
    pub applied_marker: Option<&'static str>,
}

impl PlannedAction {
    pub fn new(action: String, rollback: String) -> PlannedAction {
        PlannedAction { action, rollback: Some(rollback), applied_marker: None }
    }

    /// A line append whose removal must not touch lines that were there before.
    pub fn append(action: String, rollback: String) -> PlannedAction {
        PlannedAction { applied_marker: Some(lines::APPENDED), ..PlannedAction::new(action, rollback) }
    }

    pub fn irreversible(action: String) -> PlannedAction {
        PlannedAction { action, rollback: None, applied_marker: None }
    }

    /// Whether a successful run with `stdout` left something behind that the rollback has to undo.
    pub fn applied(&self, stdout: &str) -> bool {
        self.applied_marker.map_or(true, |marker| stdout.lines().any(|x| x.trim() == marker))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionPlan {
    pub actions: Vec<PlannedAction>,
}

impl ActionPlan {
    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

impl Display for ActionPlan {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        for (i, step) in self.actions.iter().enumerate() {
            writeln!(f, "[{}]\t{}", i + 1, step.action)?;
            if let Some(ref rollback) = step.rollback {
                writeln!(f, "\trollback: {}", rollback)?;
            }
        }
        Ok(())
    }
}

/// Why a remedy does not apply to this host, if it doesn't.
pub fn not_applicable(remedy: Remedy, facts: &HardwareFacts) -> Option<String> {
    match remedy.gpu_vendor() {
        Some(vendor) if vendor != facts.gpu.vendor =>
            Some(format!("only applies to {} GPUs, detected {}", vendor, facts.gpu.vendor)),
        Some(GpuVendor::Nvidia) if remedy == Remedy::NvidiaVfioIds && facts.gpu.device_codes.is_empty() =>
            Some("no PCI device codes for the GPU".to_owned()),
        _ => None,
    }
}

/// Turns discrepancies into an ordered plan. Pure: reads nothing but its arguments.
pub struct CommandPlanner<'a> {
    paths: &'a Paths,
    bootloader: Option<Bootloader>,
}

impl<'a> CommandPlanner<'a> {
    /// `bootloader` is only consulted when the kernel command line needs editing.
    pub fn new(paths: &'a Paths, bootloader: Option<Bootloader>) -> CommandPlanner<'a> {
        CommandPlanner { paths, bootloader }
    }

    pub fn plan(&self, discrepancies: &[Discrepancy], facts: &HardwareFacts) -> Result<ActionPlan> {
        let mut plan = ActionPlan::default();

        let remedies = discrepancies.iter()
            .filter_map(|x| x.remedy)
            .filter(|&x| not_applicable(x, facts).is_none())
            .unique();
        for remedy in remedies {
            self.plan_remedy(remedy, facts, &mut plan.actions)?;
        }

        plan.actions.push(PlannedAction::irreversible(initramfs::REGENERATE.to_owned()));
        Ok(plan)
    }

    fn plan_remedy(&self, remedy: Remedy, facts: &HardwareFacts, actions: &mut Vec<PlannedAction>) -> Result<()> {
        match remedy {
            Remedy::GrubIommu => {
                let flags = grub::iommu_flags(facts.cpu_vendor)?;
                let bootloader = self.bootloader.ok_or(ConfigurationError::UnknownBootloader)?;
                let grub = GrubConfig::new(self.paths);
                actions.push(PlannedAction::new(grub.modify_command(flags), grub.restore_command()));
                // undoing the regeneration has to happen after the restore, hence both in one
                actions.push(PlannedAction::new(bootloader.regenerate_command().to_owned(),
                                                format!("{} && {}", grub.restore_command(), bootloader.regenerate_command())));
            }
            Remedy::VfioModules => {
                for module in vfio::KERNEL_MODULES.iter() {
                    actions.push(PlannedAction::append(vfio::load_module_command(&self.paths.modules, module),
                                                       vfio::unload_module_command(&self.paths.modules, module)));
                }
            }
            Remedy::NvidiaVfioIds => {
                let conf = self.paths.vfio_conf();
                actions.push(PlannedAction::new(vfio::write_modconf_command(&conf, &facts.gpu.device_codes),
                                                vfio::remove_modconf_command(&conf)));
            }
            Remedy::BlacklistAmd | Remedy::BlacklistNvidia | Remedy::BlacklistIntel => {
                let blacklist = self.paths.blacklist_conf();
                let vendor = facts.gpu.vendor;
                for driver in vfio::host_drivers(vendor) {
                    actions.push(PlannedAction::append(vfio::blacklist_command(&blacklist, driver),
                                                       vfio::unblacklist_command(&blacklist, driver)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::facts::{CpuVendor, GpuFacts};

    fn discrepancy(description: &str) -> Discrepancy {
        Discrepancy { description: description.to_owned(), remedy: Remedy::from_description(description) }
    }

    fn facts(cpu: CpuVendor, vendor: GpuVendor, codes: &[&str]) -> HardwareFacts {
        HardwareFacts {
            cpu_vendor: cpu,
            gpu: GpuFacts {
                present: true,
                vendor,
                pci_bus_root: "0e:00".to_owned(),
                device_codes: codes.iter().map(|x| x.to_string()).collect(),
            },
        }
    }

    fn plan(discrepancies: &[&str], facts: &HardwareFacts) -> ActionPlan {
        let paths = Paths::default();
        let discrepancies: Vec<_> = discrepancies.iter().map(|x| discrepancy(x)).collect();
        CommandPlanner::new(&paths, Some(Bootloader::GrubUefi)).plan(&discrepancies, facts).unwrap()
    }

    #[test]
    fn grub_on_amd() {
        let plan = plan(&["GRUB has IOMMU settings"], &facts(CpuVendor::Amd, GpuVendor::Amd, &[]));
        let grub = GrubConfig::new(&Paths::default());

        let first = &plan.actions[0];
        assert!(first.action.contains("GRUB_CMDLINE_LINUX_DEFAULT=\"\\1 quiet iommu=pt\""));
        assert!(!first.action.contains("intel_iommu"));
        assert_eq!(first.rollback.as_deref(), Some(grub.restore_command().as_str()));
        assert_eq!(plan.actions[1].action, "update-grub");
        assert_eq!(plan.actions[2].action, initramfs::REGENERATE);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn grub_on_intel() {
        let plan = plan(&["GRUB has IOMMU settings"], &facts(CpuVendor::Intel, GpuVendor::Nvidia, &[]));
        assert!(plan.actions[0].action.contains("quiet intel_iommu=on iommu=pt"));
    }

    #[test]
    fn grub_needs_known_cpu_and_bootloader() {
        let paths = Paths::default();
        let discrepancies = vec![discrepancy("GRUB has IOMMU settings")];
        let intel = facts(CpuVendor::Intel, GpuVendor::Intel, &[]);
        assert!(matches!(CommandPlanner::new(&paths, Some(Bootloader::GrubBios))
                             .plan(&discrepancies, &facts(CpuVendor::Unknown, GpuVendor::Intel, &[])),
                         Err(ConfigurationError::UnknownCpuVendor)));
        assert!(matches!(CommandPlanner::new(&paths, None).plan(&discrepancies, &intel),
                         Err(ConfigurationError::UnknownBootloader)));
    }

    #[test]
    fn systemd_boot_refresh() {
        let paths = Paths::default();
        let discrepancies = vec![discrepancy("GRUB has IOMMU settings")];
        let plan = CommandPlanner::new(&paths, Some(Bootloader::SystemdBoot))
            .plan(&discrepancies, &facts(CpuVendor::Amd, GpuVendor::Amd, &[])).unwrap();
        assert_eq!(plan.actions[1].action, "proxmox-boot-tool refresh");
    }

    #[test]
    fn nvidia_vfio_ids() {
        let plan = plan(&["kvm.conf has Nvidia Card settings"],
                        &facts(CpuVendor::Amd, GpuVendor::Nvidia, &["10de:1b81", "10de:10f0"]));
        assert_eq!(plan.actions[0].action,
                   "echo 'options vfio-pci ids=10de:1b81,10de:10f0' > '/etc/modprobe.d/vfio.conf'");
        assert_eq!(plan.actions[0].rollback.as_deref(), Some("rm -f '/etc/modprobe.d/vfio.conf'"));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn nothing_to_do() {
        let plan = plan(&[], &facts(CpuVendor::Amd, GpuVendor::Amd, &[]));
        assert_eq!(plan.actions, vec![PlannedAction::irreversible(initramfs::REGENERATE.to_owned())]);
    }

    #[test]
    fn vfio_modules() {
        let plan = plan(&["VFIO modules are loaded"], &facts(CpuVendor::Amd, GpuVendor::Amd, &[]));
        assert_eq!(plan.len(), 4);
        for (step, module) in plan.actions.iter().zip(vfio::KERNEL_MODULES.iter()) {
            assert!(step.action.contains(&format!("'{}'", module)));
            assert!(step.rollback.as_ref().unwrap().contains(&format!("/^{}$/d", module)));
        }
    }

    #[test]
    fn blacklist_only_matching_vendor() {
        let all = ["AMD drivers are blacklisted", "NVIDIA drivers are blacklisted", "Intel drivers are blacklisted",
                   "kvm.conf has Nvidia Card settings"];

        let amd = plan(&all, &facts(CpuVendor::Amd, GpuVendor::Amd, &["1002:731f"]));
        assert_eq!(amd.len(), 3);
        assert!(amd.actions[0].action.contains("'blacklist radeon'"));
        assert!(amd.actions[1].action.contains("'blacklist amdgpu'"));

        let intel = plan(&all, &facts(CpuVendor::Intel, GpuVendor::Intel, &[]));
        assert_eq!(intel.len(), 4);
        assert!(intel.actions[2].action.contains("'blacklist i915'"));

        let nvidia = plan(&all, &facts(CpuVendor::Intel, GpuVendor::Nvidia, &["10de:1b81"]));
        assert_eq!(nvidia.len(), 6);
        assert!(nvidia.actions[4].action.contains("ids=10de:1b81"));
    }

    #[test]
    fn unknown_and_duplicate_descriptions() {
        let facts = facts(CpuVendor::Amd, GpuVendor::Amd, &[]);
        let paths = Paths::default();
        let discrepancies = vec![
            discrepancy("IOMMU groups look sane"),
            Discrepancy { description: "modules A".to_owned(), remedy: Some(Remedy::VfioModules) },
            Discrepancy { description: "modules B".to_owned(), remedy: Some(Remedy::VfioModules) },
        ];
        let plan = CommandPlanner::new(&paths, None).plan(&discrepancies, &facts).unwrap();
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn deterministic() {
        let facts = facts(CpuVendor::Intel, GpuVendor::Nvidia, &["10de:1b81", "10de:10f0"]);
        let all = ["GRUB has IOMMU settings", "VFIO modules are loaded", "kvm.conf has Nvidia Card settings",
                   "NVIDIA drivers are blacklisted"];
        assert_eq!(plan(&all, &facts), plan(&all, &facts));
        assert_eq!(plan(&all, &facts).len(), 2 + 3 + 1 + 4 + 1);
    }

    #[test]
    fn not_applicable_reasons() {
        let amd = facts(CpuVendor::Amd, GpuVendor::Amd, &[]);
        assert_eq!(not_applicable(Remedy::BlacklistNvidia, &amd).unwrap(), "only applies to NVIDIA GPUs, detected AMD");
        assert!(not_applicable(Remedy::BlacklistAmd, &amd).is_none());
        assert!(not_applicable(Remedy::GrubIommu, &amd).is_none());
        let nvidia = facts(CpuVendor::Amd, GpuVendor::Nvidia, &[]);
        assert!(not_applicable(Remedy::NvidiaVfioIds, &nvidia).is_some());
    }
}
