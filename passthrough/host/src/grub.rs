use std::path::PathBuf;

use common::config::Paths;
use common::error::{ConfigurationError, Result};
use common::facts::CpuVendor;
use common::util::{sed_escape, shell_quote};

pub const CMDLINE_VARIABLE: &str = "GRUB_CMDLINE_LINUX_DEFAULT";

/// Kernel command line flags needed for passthrough on the given CPU.
pub fn iommu_flags(cpu: CpuVendor) -> Result<&'static str> {
    match cpu {
        // amd_iommu is on by default
        CpuVendor::Amd => Ok("quiet iommu=pt"),
        CpuVendor::Intel => Ok("quiet intel_iommu=on iommu=pt"),
        CpuVendor::Unknown => Err(ConfigurationError::UnknownCpuVendor),
    }
}

/// `/etc/default/grub` and its backup copy.
pub struct GrubConfig {
    path: PathBuf,
    backup: PathBuf,
}

impl GrubConfig {
    pub fn new(paths: &Paths) -> GrubConfig {
        GrubConfig { path: paths.grub.clone(), backup: paths.grub_backup.clone() }
    }

    fn quoted(&self) -> (String, String) {
        (shell_quote(&self.path.to_string_lossy()), shell_quote(&self.backup.to_string_lossy()))
    }

    /// Copies the config aside, once. Later runs keep the oldest copy.
    pub fn backup_command(&self) -> String {
        let (path, backup) = self.quoted();
        format!("[ -e {backup} ] || cp -p {path} {backup}", path = path, backup = backup)
    }

    /// Appends `flags` to the kernel command line variable unless they are already in there.
    /// Fails if there is no double-quoted assignment of the variable to edit.
    pub fn append_flags_command(&self, flags: &str) -> String {
        let (path, _) = self.quoted();
        let present = shell_quote(&format!("^{}=.*{}", CMDLINE_VARIABLE, sed_escape(flags)));
        let editable = shell_quote(&format!("^{}=\".*\"", CMDLINE_VARIABLE));
        let script = shell_quote(&format!(r#"s/^{var}="\(.*\)"/{var}="\1 {flags}"/"#,
                                          var = CMDLINE_VARIABLE, flags = sed_escape(flags)));
        format!("grep -q {present} {path} || {{ grep -q {editable} {path} && sed -i {script} {path}; }}",
                present = present, editable = editable, script = script, path = path)
    }

    pub fn modify_command(&self, flags: &str) -> String {
        format!("{} && {}", self.backup_command(), self.append_flags_command(flags))
    }

    /// Puts the backup back in place. Without a backup there is nothing we could have changed.
    pub fn restore_command(&self) -> String {
        let (path, backup) = self.quoted();
        format!("[ ! -e {backup} ] || cp -p {backup} {path}", path = path, backup = backup)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::process::Command;

    fn sh(cmd: &str) {
        let status = Command::new("sh").arg("-c").arg(cmd).status().unwrap();
        assert!(status.success(), "{} failed", cmd);
    }

    fn config(dir: &std::path::Path) -> GrubConfig {
        GrubConfig { path: dir.join("grub"), backup: dir.join("grub.bak") }
    }

    #[test]
    fn flags() {
        assert_eq!(iommu_flags(CpuVendor::Amd).unwrap(), "quiet iommu=pt");
        assert_eq!(iommu_flags(CpuVendor::Intel).unwrap(), "quiet intel_iommu=on iommu=pt");
        assert!(iommu_flags(CpuVendor::Unknown).is_err());
    }

    #[test]
    fn modify_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let grub = config(dir.path());
        let original = "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX_DEFAULT=\"splash\"\nGRUB_CMDLINE_LINUX=\"\"\n";
        fs::write(dir.path().join("grub"), original).unwrap();

        sh(&grub.modify_command("quiet iommu=pt"));
        sh(&grub.modify_command("quiet iommu=pt"));
        assert_eq!(fs::read_to_string(dir.path().join("grub")).unwrap(),
                   "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX_DEFAULT=\"splash quiet iommu=pt\"\nGRUB_CMDLINE_LINUX=\"\"\n");
        assert_eq!(fs::read_to_string(dir.path().join("grub.bak")).unwrap(), original);

        sh(&grub.restore_command());
        assert_eq!(fs::read_to_string(dir.path().join("grub")).unwrap(), original);
    }

    #[test]
    fn unexpected_cmdline_fails() {
        let dir = tempfile::tempdir().unwrap();
        let grub = config(dir.path());
        let run = |cmd: &str| Command::new("sh").arg("-c").arg(cmd).status().unwrap().success();

        fs::write(dir.path().join("grub"), "GRUB_CMDLINE_LINUX_DEFAULT='quiet splash'\n").unwrap();
        assert!(!run(&grub.append_flags_command("quiet iommu=pt")));

        fs::write(dir.path().join("grub"), "GRUB_DEFAULT=0\n").unwrap();
        assert!(!run(&grub.append_flags_command("quiet iommu=pt")));
        assert_eq!(fs::read_to_string(dir.path().join("grub")).unwrap(), "GRUB_DEFAULT=0\n");
    }

    #[test]
    fn restore_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        sh(&config(dir.path()).restore_command());
        assert!(!dir.path().join("grub").exists());
    }
}
