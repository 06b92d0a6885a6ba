//! Desired-state reconciliation for GPU passthrough hosts.
//!
//! Data flow: hardware snapshot -> preconditions -> state comparison -> planning -> execution
//! (with rollback on failure) -> convergence check.

#[macro_use]
extern crate log;
extern crate common;
extern crate host;

pub mod comparator;
pub mod evaluator;
pub mod executor;
pub mod planner;
pub mod preconditions;
pub mod sink;

use common::config::{PreconditionPolicy, Remedy, Settings};
use common::error::{ConfigurationError, Result};
use common::facts::{HardwareFacts, HardwareSnapshot};
use common::runner::CommandRunner;
use host::bootloader::{self, Bootloader};
use host::iommu;

use crate::comparator::{descriptions, Discrepancy, StateComparator};
use crate::evaluator::ConditionEvaluator;
use crate::executor::PlanExecutor;
use crate::planner::{not_applicable, ActionPlan, CommandPlanner};
use crate::preconditions::PreconditionChecker;
use crate::sink::{Event, EventSink};

/// Result of a read-only inspection.
#[derive(Debug)]
pub struct Status {
    pub facts: HardwareFacts,
    pub unmet_preconditions: Vec<String>,
    pub discrepancies: Vec<Discrepancy>,
}

/// Result of a completed run.
#[derive(Debug)]
pub struct Report {
    pub plan: ActionPlan,
    pub dry_run: bool,
    /// Desired-state conditions still unmet after execution (live runs only).
    pub residual: Vec<String>,
    /// `None` for dry runs.
    pub iommu_enabled: Option<bool>,
}

pub struct Reconciler<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
    snapshot: &'a dyn HardwareSnapshot,
    sink: &'a dyn EventSink,
    policy: PreconditionPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn CommandRunner, snapshot: &'a dyn HardwareSnapshot,
               sink: &'a dyn EventSink) -> Reconciler<'a> {
        Reconciler { settings, runner, snapshot, sink, policy: settings.precondition_policy }
    }

    pub fn with_policy(mut self, policy: PreconditionPolicy) -> Reconciler<'a> {
        self.policy = policy;
        self
    }

    fn stage(&self, msg: &str) {
        self.sink.record(Event::Stage(msg.to_owned()));
    }

    fn evaluator(&self) -> ConditionEvaluator<'a> {
        ConditionEvaluator::new(self.runner, self.sink, &self.settings.paths.modprobe_dir,
                                self.settings.timeouts.probe())
    }

    /// Inspects the host without changing anything.
    pub fn status(&self) -> Result<Status> {
        let evaluator = self.evaluator();
        let (facts, unmet_preconditions) = PreconditionChecker::new(&evaluator, self.snapshot, self.sink,
                                                                    &self.settings.preconditions).check()?;
        let discrepancies = StateComparator::new(&evaluator, self.sink, &self.settings.desired_state)
            .compare_desired_state();
        Ok(Status { facts, unmet_preconditions, discrepancies })
    }

    pub fn run(&self, dry_run: bool) -> Result<Report> {
        let evaluator = self.evaluator();
        let comparator = StateComparator::new(&evaluator, self.sink, &self.settings.desired_state);

        self.stage("Checking preconditions...");
        let (facts, unmet) = PreconditionChecker::new(&evaluator, self.snapshot, self.sink,
                                                      &self.settings.preconditions).check()?;
        if !unmet.is_empty() {
            match self.policy {
                PreconditionPolicy::Block => {
                    self.sink.record(Event::Warning(
                        "Some preconditions were not met. Please resolve the issues and try again.".to_owned()));
                    return Err(ConfigurationError::UnmetPreconditions(unmet));
                }
                PreconditionPolicy::Warn => self.sink.record(Event::Warning(
                    format!("Continuing despite unmet preconditions: {}", unmet.join("; ")))),
            }
        }

        self.stage("Comparing actual state with desired state...");
        let discrepancies = comparator.compare_desired_state();
        if discrepancies.is_empty() {
            self.stage("System state matches the desired state.");
        }
        for discrepancy in discrepancies.iter() {
            let reason = match discrepancy.remedy {
                None => Some("no remediation known".to_owned()),
                Some(remedy) => not_applicable(remedy, &facts),
            };
            if let Some(reason) = reason {
                self.sink.record(Event::Skipped { description: discrepancy.description.clone(), reason });
            }
        }

        let needs_bootloader = discrepancies.iter()
            .any(|x| x.remedy == Some(Remedy::GrubIommu));
        let bootloader = if needs_bootloader {
            match bootloader::detect(self.runner, self.settings.timeouts.probe()) {
                Ok(bootloader) => Some(bootloader),
                Err(e) if dry_run => {
                    self.sink.record(Event::Warning(format!(
                        "{}; previewing with {} instead", e, Bootloader::GrubBios)));
                    Some(Bootloader::GrubBios)
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let plan = CommandPlanner::new(&self.settings.paths, bootloader).plan(&discrepancies, &facts)?;
        self.stage(&format!("Planned {} action(s).", plan.len()));
        for step in plan.actions.iter() {
            self.sink.record(Event::Planned { action: step.action.clone(), rollback: step.rollback.clone() });
        }

        let executor = PlanExecutor::new(self.runner, self.sink, self.settings.timeouts.action());
        if dry_run {
            self.stage("Dry run: the following commands would be executed:");
            executor.execute(&plan, true)?;
            self.stage("Dry run complete: no changes have been made.");
            return Ok(Report { plan, dry_run, residual: descriptions(&discrepancies), iommu_enabled: None });
        }

        executor.execute(&plan, false)?;
        self.stage("System configured successfully.");

        let residual = descriptions(&comparator.compare_desired_state());
        if !residual.is_empty() {
            self.sink.record(Event::Warning(format!(
                "There are discrepancies between the actual and desired states. Please review: {}",
                residual.join("; "))));
        }
        let iommu_enabled = iommu::check(self.runner, &self.settings.paths.iommu_sysfs,
                                         self.settings.timeouts.probe());
        if !iommu_enabled {
            self.sink.record(Event::Warning("IOMMU is not enabled yet. A reboot is required for the new \
                                             kernel command line to take effect.".to_owned()));
        }

        Ok(Report { plan, dry_run, residual, iommu_enabled: Some(iommu_enabled) })
    }
}
