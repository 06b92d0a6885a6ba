extern crate nix;
extern crate xdg;
#[macro_use]
extern crate log;
extern crate env_logger;
extern crate time;
extern crate clap;
extern crate anyhow;
extern crate common;
extern crate host;
extern crate engine;

mod logger;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{App, Arg};
use nix::unistd;

use common::config::{PreconditionPolicy, Settings};
use common::runner::ShellRunner;
use engine::sink::LogSink;
use engine::{Reconciler, Status};
use host::hardware::HostInspector;

const SYSTEM_SETTINGS: &str = "/etc/passthrough-setup/settings.yml";
const DEFAULT_SETTINGS: &str = include_str!("../data/settings.yml");

fn settings_path(is_root: bool) -> Result<PathBuf> {
    if is_root {
        return Ok(PathBuf::from(SYSTEM_SETTINGS));
    }
    let xdg_dirs = xdg::BaseDirectories::with_prefix("passthrough-setup")
        .context("Failed to determine XDG directories")?;
    Ok(xdg_dirs.get_config_home().join("settings.yml"))
}

fn load_settings(path: &Path) -> Result<Settings> {
    if path.exists() {
        debug!("Using settings file {:?}", path);
        Settings::load(path).with_context(|| format!("Failed to load settings from {}", path.display()))
    } else {
        debug!("{:?} does not exist, using built-in settings", path);
        Settings::from_yaml(DEFAULT_SETTINGS).context("Built-in settings are invalid")
    }
}

fn report_status(status: &Status) -> bool {
    println!("CPU vendor: {:?}", status.facts.cpu_vendor);
    if status.facts.gpu.present {
        println!("GPU: {} at {} [{}]", status.facts.gpu.vendor, status.facts.gpu.pci_bus_root,
                 status.facts.gpu.device_codes.join(","));
    } else {
        println!("GPU: none");
    }
    for description in status.unmet_preconditions.iter() {
        println!("unmet precondition: {}", description);
    }
    for discrepancy in status.discrepancies.iter() {
        println!("discrepancy: {}", discrepancy.description);
    }
    status.unmet_preconditions.is_empty() && status.discrepancies.is_empty()
}

fn run() -> Result<bool> {
    let matches = App::new("passthrough-setup")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Brings a host into the configuration needed for GPU passthrough")
        .arg(Arg::with_name("config").long("config").short("c").takes_value(true).value_name("PATH")
             .help("Settings file (yaml or toml)"))
        .arg(Arg::with_name("dry-run").long("dry-run").short("n")
             .help("Show the commands that would be executed without running them"))
        .arg(Arg::with_name("check").long("check").conflicts_with("dry-run")
             .help("Only report unmet preconditions and discrepancies"))
        .arg(Arg::with_name("ignore-preconditions").long("ignore-preconditions")
             .help("Continue even if preconditions are unmet"))
        .arg(Arg::with_name("verbose").long("verbose").short("v")
             .help("Log every probe and command"))
        .arg(Arg::with_name("log-file").long("log-file").takes_value(true).value_name("PATH")
             .help("Write the log to a file instead of stderr"))
        .get_matches();

    logger::init(matches.is_present("verbose"), matches.value_of("log-file").map(Path::new))
        .context("Error initializing logger")?;

    let is_root = unistd::getuid().is_root();
    if is_root {
        debug!("Running as root");
    } else {
        debug!("Running as unprivileged user, probes needing root will fail");
    }

    let path = match matches.value_of("config") {
        Some(x) => PathBuf::from(x),
        None => settings_path(is_root)?,
    };
    let settings = load_settings(&path)?;
    trace!("Successfully loaded settings.");

    let runner = ShellRunner::new().context("Failed to start process runtime")?;
    let snapshot = HostInspector::new(&runner, settings.timeouts.probe());
    let sink = LogSink;
    let mut reconciler = Reconciler::new(&settings, &runner, &snapshot, &sink);
    if matches.is_present("ignore-preconditions") {
        reconciler = reconciler.with_policy(PreconditionPolicy::Warn);
    }

    if matches.is_present("check") {
        let status = reconciler.status().context("Inspection failed")?;
        return Ok(report_status(&status));
    }

    let report = reconciler.run(matches.is_present("dry-run")).context("Configuration failed")?;
    if !report.dry_run && report.iommu_enabled == Some(false) {
        println!("Please reboot the system for the changes to take effect.");
    }
    Ok(report.residual.is_empty() || report.dry_run)
}

fn main() {
    match run() {
        Ok(true) => (),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    }
}
