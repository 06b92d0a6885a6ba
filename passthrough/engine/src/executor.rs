use std::time::Duration;

use common::error::{ConfigurationError, Result};
use common::runner::CommandRunner;

use crate::planner::ActionPlan;
use crate::sink::{Event, EventSink};

/// Rollback obligations of the actions applied so far.
pub struct RollbackCoordinator<'a> {
    runner: &'a dyn CommandRunner,
    sink: &'a dyn EventSink,
    limit: Duration,
    stack: Vec<String>,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sink: &'a dyn EventSink, limit: Duration) -> RollbackCoordinator<'a> {
        RollbackCoordinator { runner, sink, limit, stack: Vec::new() }
    }

    pub fn push(&mut self, rollback: Option<&str>) {
        if let Some(rollback) = rollback {
            self.stack.push(rollback.to_owned());
        }
    }

    /// Runs every recorded rollback, most recent first. Failures are reported and skipped,
    /// they must never hide the error that got us here. Returns how many were attempted.
    pub fn unwind(mut self) -> usize {
        let count = self.stack.len();
        self.sink.record(Event::RollingBack { count });
        while let Some(command) = self.stack.pop() {
            match self.runner.run(&command, self.limit) {
                Ok(ref output) if output.success() => self.sink.record(Event::RolledBack { command }),
                Ok(output) => self.sink.record(Event::RollbackFailed { command, cause: output.diagnostic() }),
                Err(e) => self.sink.record(Event::RollbackFailed { command, cause: e.to_string() }),
            }
        }
        count
    }
}

pub struct PlanExecutor<'a> {
    runner: &'a dyn CommandRunner,
    sink: &'a dyn EventSink,
    limit: Duration,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sink: &'a dyn EventSink, limit: Duration) -> PlanExecutor<'a> {
        PlanExecutor { runner, sink, limit }
    }

    /// Dry runs only report. Live runs go strictly in order and stop at the first failure,
    /// undoing everything applied before it.
    pub fn execute(&self, plan: &ActionPlan, dry_run: bool) -> Result<()> {
        if dry_run {
            for step in plan.actions.iter() {
                self.sink.record(Event::WouldExecute { action: step.action.clone() });
            }
            return Ok(());
        }

        let mut rollback = RollbackCoordinator::new(self.runner, self.sink, self.limit);
        for step in plan.actions.iter() {
            self.sink.record(Event::Executing { action: step.action.clone() });
            let cause = match self.runner.run(&step.action, self.limit) {
                Ok(output) if output.success() => {
                    if step.applied(&output.stdout) {
                        rollback.push(step.rollback.as_deref());
                    }
                    self.sink.record(Event::Executed { action: step.action.clone(), output: output.stdout });
                    continue;
                }
                Ok(output) => output.diagnostic(),
                Err(e) => e.to_string(),
            };

            self.sink.record(Event::ActionFailed { action: step.action.clone(), cause: cause.clone() });
            let rolled_back = rollback.unwind();
            return Err(ConfigurationError::ActionFailed { command: step.action.clone(), cause, rolled_back });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::io;
    use common::config::{Paths, Remedy};
    use common::facts::{CpuVendor, GpuFacts, GpuVendor, HardwareFacts};
    use common::runner::{MockRunner, ShellRunner};
    use crate::comparator::Discrepancy;
    use crate::planner::{CommandPlanner, PlannedAction};
    use crate::sink::MemorySink;

    fn step(action: &str, rollback: Option<&str>) -> PlannedAction {
        PlannedAction { action: action.to_owned(), rollback: rollback.map(str::to_owned), applied_marker: None }
    }

    fn four_steps() -> ActionPlan {
        ActionPlan {
            actions: vec![
                step("action-1", Some("undo-1")),
                step("action-2", Some("undo-2")),
                step("action-3", Some("undo-3")),
                step("action-4", None),
            ],
        }
    }

    fn limit() -> Duration {
        Duration::from_secs(1)
    }

    #[test]
    fn dry_run_touches_nothing() {
        let runner = MockRunner::new();
        let sink = MemorySink::new();
        PlanExecutor::new(&runner, &sink, limit()).execute(&four_steps(), true).unwrap();
        assert!(runner.executed_commands().is_empty());
        assert_eq!(sink.events(), vec![
            Event::WouldExecute { action: "action-1".to_owned() },
            Event::WouldExecute { action: "action-2".to_owned() },
            Event::WouldExecute { action: "action-3".to_owned() },
            Event::WouldExecute { action: "action-4".to_owned() },
        ]);
    }

    #[test]
    fn live_run_in_order() {
        let runner = MockRunner::new();
        let sink = MemorySink::new();
        PlanExecutor::new(&runner, &sink, limit()).execute(&four_steps(), false).unwrap();
        assert_eq!(runner.executed_commands(), vec!["action-1", "action-2", "action-3", "action-4"]);
    }

    #[test]
    fn failure_stops_and_rolls_back() {
        let runner = MockRunner::new().fail_on("action-2", "disk full");
        let sink = MemorySink::new();
        let err = PlanExecutor::new(&runner, &sink, limit()).execute(&four_steps(), false).unwrap_err();

        assert_eq!(runner.executed_commands(), vec!["action-1", "action-2", "undo-1"]);
        match err {
            ConfigurationError::ActionFailed { command, cause, rolled_back } => {
                assert_eq!(command, "action-2");
                assert_eq!(cause, "disk full");
                assert_eq!(rolled_back, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(sink.events().contains(&Event::RolledBack { command: "undo-1".to_owned() }));
    }

    #[test]
    fn rollback_in_reverse_order_despite_failures() {
        let runner = MockRunner::new()
            .fail_on("undo-2", "sed: can't read file")
            .error_on("action-4", io::ErrorKind::TimedOut);
        let sink = MemorySink::new();
        let err = PlanExecutor::new(&runner, &sink, limit()).execute(&four_steps(), false).unwrap_err();

        assert_eq!(runner.executed_commands(),
                   vec!["action-1", "action-2", "action-3", "action-4", "undo-3", "undo-2", "undo-1"]);
        match err {
            ConfigurationError::ActionFailed { command, rolled_back, .. } => {
                assert_eq!(command, "action-4");
                assert_eq!(rolled_back, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(sink.events().contains(&Event::RollbackFailed {
            command: "undo-2".to_owned(),
            cause: "sed: can't read file".to_owned(),
        }));
    }

    #[test]
    fn unchanged_appends_are_not_rolled_back() {
        let plan = ActionPlan {
            actions: vec![
                PlannedAction::append("append vfio".to_owned(), "remove vfio".to_owned()),
                PlannedAction::append("append vfio_pci".to_owned(), "remove vfio_pci".to_owned()),
                step("regenerate", None),
            ],
        };
        let runner = MockRunner::new()
            .on("append vfio_pci", &format!("{}\n", host::lines::APPENDED))
            .fail_on("regenerate", "no space left on device");
        let sink = MemorySink::new();
        let err = PlanExecutor::new(&runner, &sink, limit()).execute(&plan, false).unwrap_err();

        assert_eq!(runner.executed_commands(), vec!["append vfio", "append vfio_pci", "regenerate", "remove vfio_pci"]);
        assert!(matches!(err, ConfigurationError::ActionFailed { rolled_back: 1, .. }));
    }

    #[test]
    fn rollback_keeps_lines_that_were_already_there() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths { modprobe_dir: dir.path().to_owned(), modules: dir.path().join("modules"), ..Paths::default() };
        fs::write(&paths.modules, "loop\nvfio\n").unwrap();
        fs::write(paths.blacklist_conf(), "blacklist snd_hda_intel\n").unwrap();

        let facts = HardwareFacts {
            cpu_vendor: CpuVendor::Intel,
            gpu: GpuFacts {
                present: true,
                vendor: GpuVendor::Intel,
                pci_bus_root: "00:02".to_owned(),
                device_codes: vec!["8086:3e92".to_owned()],
            },
        };
        let discrepancies = vec![
            Discrepancy { description: "modules".to_owned(), remedy: Some(Remedy::VfioModules) },
            Discrepancy { description: "blacklist".to_owned(), remedy: Some(Remedy::BlacklistIntel) },
        ];
        let mut plan = CommandPlanner::new(&paths, None).plan(&discrepancies, &facts).unwrap();
        plan.actions.last_mut().unwrap().action = "false".to_owned();

        let runner = ShellRunner::new().unwrap();
        let sink = MemorySink::new();
        let err = PlanExecutor::new(&runner, &sink, Duration::from_secs(10)).execute(&plan, false).unwrap_err();

        // vfio_iommu_type1, vfio_pci, snd_hda_codec_hdmi and i915 were new
        assert!(matches!(err, ConfigurationError::ActionFailed { rolled_back: 4, .. }));
        assert_eq!(fs::read_to_string(&paths.modules).unwrap(), "loop\nvfio\n");
        assert_eq!(fs::read_to_string(paths.blacklist_conf()).unwrap(), "blacklist snd_hda_intel\n");
    }

    #[test]
    fn first_action_failing_rolls_back_nothing() {
        let runner = MockRunner::new().fail_on("action-1", "");
        let sink = MemorySink::new();
        let err = PlanExecutor::new(&runner, &sink, limit()).execute(&four_steps(), false).unwrap_err();
        assert_eq!(runner.executed_commands(), vec!["action-1"]);
        assert!(matches!(err, ConfigurationError::ActionFailed { rolled_back: 0, .. }));
    }
}
