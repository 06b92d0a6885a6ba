/// Rebuilds the initramfs of every installed kernel so it picks up the new module configuration.
pub const REGENERATE: &str = "update-initramfs -u -k all";
