//! Host-side collaborators of the reconciliation engine.
//!
//! Everything in here either inspects the machine (`hardware`, `bootloader`, `iommu`) or knows
//! how a particular piece of configuration is edited on disk (`grub`, `vfio`, `initramfs`).
//! Edits are expressed as shell commands so the engine can log, preview and roll them back.

#[macro_use]
extern crate log;
extern crate common;

pub mod bootloader;
pub mod grub;
pub mod hardware;
pub mod initramfs;
pub mod iommu;
pub mod vfio;

/// Shell line editing helpers shared by the modprobe and modules files.
pub mod lines {
    use std::path::Path;

    use common::util::{sed_escape, shell_quote};

    /// Printed by [`append_command`] on its own line when it actually wrote to the file.
    pub const APPENDED: &str = "passthrough-setup: line appended";

    /// Appends `line` to `path` unless an identical line is already there, then prints
    /// [`APPENDED`]. Creates the file if needed and never glues onto an unterminated last line.
    pub fn append_command(path: &Path, line: &str) -> String {
        let file = shell_quote(&path.to_string_lossy());
        let line = shell_quote(line);
        format!("grep -qxF {line} {file} || {{ [ ! -s {file} ] || [ -z \"$(tail -c1 {file})\" ] || echo >> {file}; \
                 echo {line} >> {file} && echo {marker}; }}",
                line = line, file = file, marker = shell_quote(APPENDED))
    }

    /// Deletes every line of `path` equal to `line`. A missing file counts as done.
    pub fn remove_command(path: &Path, line: &str) -> String {
        let file = shell_quote(&path.to_string_lossy());
        let script = shell_quote(&format!("/^{}$/d", sed_escape(line)));
        format!("[ ! -e {file} ] || sed -i {script} {file}", file = file, script = script)
    }
}
