use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use toml;
use serde_yaml;

use crate::error::{ConfigurationError, Result};
use crate::facts::GpuVendor;

/// Stable identifier selecting the remediation for an unmet condition.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    GrubIommu,
    VfioModules,
    NvidiaVfioIds,
    BlacklistAmd,
    BlacklistNvidia,
    BlacklistIntel,
}

impl Remedy {
    /// Maps the free-text descriptions used by older settings files.
    pub fn from_description(description: &str) -> Option<Remedy> {
        let lower = description.to_lowercase();
        if lower.contains("grub has iommu settings") {
            Some(Remedy::GrubIommu)
        } else if lower.contains("vfio modules are loaded") {
            Some(Remedy::VfioModules)
        } else if lower.contains("kvm.conf has nvidia card settings") {
            Some(Remedy::NvidiaVfioIds)
        } else if lower.contains("amd drivers are blacklisted") {
            Some(Remedy::BlacklistAmd)
        } else if lower.contains("nvidia drivers are blacklisted") {
            Some(Remedy::BlacklistNvidia)
        } else if lower.contains("intel drivers are blacklisted") {
            Some(Remedy::BlacklistIntel)
        } else {
            None
        }
    }

    /// The GPU vendor this remedy is restricted to, if any.
    pub fn gpu_vendor(self) -> Option<GpuVendor> {
        match self {
            Remedy::GrubIommu | Remedy::VfioModules => None,
            Remedy::NvidiaVfioIds | Remedy::BlacklistNvidia => Some(GpuVendor::Nvidia),
            Remedy::BlacklistAmd => Some(GpuVendor::Amd),
            Remedy::BlacklistIntel => Some(GpuVendor::Intel),
        }
    }
}

/// One verifiable statement about the host: a probe plus what its output has to look like.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub description: String,
    #[serde(alias = "probe")]
    pub command: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default, alias = "expected_substring")]
    pub expected_output_contains: Option<String>,
    #[serde(default)]
    pub acceptable_alternatives: Vec<String>,
    #[serde(default)]
    pub failure_message: String,
    #[serde(default)]
    pub remedy: Option<Remedy>,
}

impl Condition {
    /// Decides whether `output` (already trimmed) satisfies this condition.
    /// A condition without any expectation only asks for a zero exit status.
    pub fn accepts(&self, output: &str) -> bool {
        if self.expected_output.is_none() && self.expected_output_contains.is_none()
            && self.acceptable_alternatives.is_empty() {
            return true;
        }
        self.expected_output.as_deref().map_or(false, |x| output == x)
            || self.expected_output_contains.as_deref().map_or(false, |x| output.contains(x))
            || self.acceptable_alternatives.iter().any(|x| output.contains(x.as_str()))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Paths {
    pub grub: PathBuf,
    pub grub_backup: PathBuf,
    pub modules: PathBuf,
    pub modprobe_dir: PathBuf,
    pub iommu_sysfs: PathBuf,
}

impl Default for Paths {
    fn default() -> Paths {
        Paths {
            grub: PathBuf::from("/etc/default/grub"),
            grub_backup: PathBuf::from("/etc/default/grub.bak"),
            modules: PathBuf::from("/etc/modules"),
            modprobe_dir: PathBuf::from("/etc/modprobe.d"),
            iommu_sysfs: PathBuf::from("/sys/devices/virtual/iommu"),
        }
    }
}

impl Paths {
    pub fn blacklist_conf(&self) -> PathBuf {
        self.modprobe_dir.join("blacklist.conf")
    }

    pub fn vfio_conf(&self) -> PathBuf {
        self.modprobe_dir.join("vfio.conf")
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub probe_secs: u64,
    pub action_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Timeouts {
        // initramfs regeneration can take minutes on slow disks
        Timeouts { probe_secs: 30, action_secs: 900 }
    }
}

impl Timeouts {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn action(&self) -> Duration {
        Duration::from_secs(self.action_secs)
    }
}

/// What to do when a precondition is unmet.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionPolicy {
    /// Refuse to plan or mutate anything.
    Block,
    /// Log a warning and carry on.
    Warn,
}

impl Default for PreconditionPolicy {
    fn default() -> PreconditionPolicy {
        PreconditionPolicy::Block
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ConditionList {
    Flat(Vec<Condition>),
    Nested { commands: Vec<Condition> },
}

impl Default for ConditionList {
    fn default() -> ConditionList {
        ConditionList::Flat(Vec::new())
    }
}

impl ConditionList {
    fn into_vec(self) -> Vec<Condition> {
        match self {
            ConditionList::Flat(x) | ConditionList::Nested { commands: x } => x,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct SettingsDocument {
    preconditions: ConditionList,
    desired_state: ConditionList,
    paths: Paths,
    timeouts: Timeouts,
    precondition_policy: PreconditionPolicy,
}

/// The settings document. Loaded once at startup and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub preconditions: Vec<Condition>,
    pub desired_state: Vec<Condition>,
    pub paths: Paths,
    pub timeouts: Timeouts,
    pub precondition_policy: PreconditionPolicy,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let path = path.as_ref();
        let err = |cause: String| ConfigurationError::Settings { path: path.to_owned(), cause };

        let contents = fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let doc: SettingsDocument = if path.extension().map_or(false, |x| x == "toml") {
            toml::from_str(&contents).map_err(|e| err(e.to_string()))?
        } else {
            // also covers the json settings files since yaml is a superset
            serde_yaml::from_str(&contents).map_err(|e| err(e.to_string()))?
        };
        Settings::from_document(doc).map_err(err)
    }

    pub fn from_yaml(source: &str) -> Result<Settings> {
        let err = |cause: String| ConfigurationError::Settings { path: PathBuf::from("<inline>"), cause };
        let doc: SettingsDocument = serde_yaml::from_str(source).map_err(|e| err(e.to_string()))?;
        Settings::from_document(doc).map_err(err)
    }

    fn from_document(doc: SettingsDocument) -> std::result::Result<Settings, String> {
        let preconditions = prepare(doc.preconditions.into_vec(), "preconditions")?;
        let desired_state = prepare(doc.desired_state.into_vec(), "desired_state")?;
        Ok(Settings {
            preconditions,
            desired_state,
            paths: doc.paths,
            timeouts: doc.timeouts,
            precondition_policy: doc.precondition_policy,
        })
    }
}

fn prepare(mut conditions: Vec<Condition>, section: &str) -> std::result::Result<Vec<Condition>, String> {
    let mut seen = HashSet::new();
    for cond in conditions.iter_mut() {
        if !seen.insert(cond.description.clone()) {
            return Err(format!("duplicate condition '{}' in {}", cond.description, section));
        }
        if cond.remedy.is_none() {
            cond.remedy = Remedy::from_description(&cond.description);
            if let Some(remedy) = cond.remedy {
                trace!("inferred remedy {:?} for '{}'", remedy, cond.description);
            }
        }
    }
    Ok(conditions)
}
