use common::config::Condition;
use common::error::Result;
use common::facts::{HardwareFacts, HardwareSnapshot};

use crate::evaluator::ConditionEvaluator;
use crate::sink::{Event, EventSink};

pub struct PreconditionChecker<'a> {
    evaluator: &'a ConditionEvaluator<'a>,
    snapshot: &'a dyn HardwareSnapshot,
    sink: &'a dyn EventSink,
    conditions: &'a [Condition],
}

impl<'a> PreconditionChecker<'a> {
    pub fn new(evaluator: &'a ConditionEvaluator<'a>, snapshot: &'a dyn HardwareSnapshot,
               sink: &'a dyn EventSink, conditions: &'a [Condition]) -> PreconditionChecker<'a> {
        PreconditionChecker { evaluator, snapshot, sink, conditions }
    }

    /// Evaluates every precondition (no early exit) and always takes the hardware snapshot.
    /// Whether unmet preconditions stop the run is up to the caller.
    pub fn check(&self) -> Result<(HardwareFacts, Vec<String>)> {
        let mut unmet = Vec::new();
        for condition in self.conditions {
            if !self.evaluator.evaluate(condition) {
                self.sink.record(Event::PreconditionUnmet {
                    description: condition.description.clone(),
                    failure_message: condition.failure_message.clone(),
                });
                unmet.push(condition.description.clone());
            }
        }

        let facts = self.snapshot.inspect()?;
        Ok((facts, unmet))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use common::facts::{CpuVendor, FixedSnapshot, GpuFacts};
    use common::runner::MockRunner;
    use common::ConfigurationError;
    use crate::sink::MemorySink;

    fn cond(description: &str, command: &str) -> Condition {
        Condition {
            description: description.to_owned(),
            command: command.to_owned(),
            expected_output: None,
            expected_output_contains: None,
            acceptable_alternatives: Vec::new(),
            failure_message: format!("{} failed", description),
            remedy: None,
        }
    }

    fn facts() -> HardwareFacts {
        HardwareFacts { cpu_vendor: CpuVendor::Intel, gpu: GpuFacts::absent() }
    }

    #[test]
    fn collects_all_unmet() {
        let runner = MockRunner::new().fail_on("first", "boom").fail_on("third", "bang");
        let sink = MemorySink::new();
        let evaluator = ConditionEvaluator::new(&runner, &sink, Path::new("/etc/modprobe.d"), Duration::from_secs(1));
        let conditions = vec![cond("a", "first"), cond("b", "second"), cond("c", "third")];
        let snapshot = FixedSnapshot(facts());

        let (got, unmet) = PreconditionChecker::new(&evaluator, &snapshot, &sink, &conditions).check().unwrap();
        assert_eq!(got, facts());
        assert_eq!(unmet, vec!["a", "c"]);
        assert_eq!(runner.executed_commands(), vec!["first", "second", "third"]);
        assert!(sink.events().contains(&Event::PreconditionUnmet {
            description: "c".to_owned(),
            failure_message: "c failed".to_owned(),
        }));
    }

    struct BrokenSnapshot;

    impl HardwareSnapshot for BrokenSnapshot {
        fn inspect(&self) -> Result<HardwareFacts> {
            Err(ConfigurationError::UnknownGpuVendor("Matrox".to_owned()))
        }
    }

    #[test]
    fn snapshot_errors_propagate() {
        let runner = MockRunner::new();
        let sink = MemorySink::new();
        let evaluator = ConditionEvaluator::new(&runner, &sink, Path::new("/etc/modprobe.d"), Duration::from_secs(1));
        let conditions = vec![cond("a", "first")];
        let checker = PreconditionChecker::new(&evaluator, &BrokenSnapshot, &sink, &conditions);
        assert!(matches!(checker.check(), Err(ConfigurationError::UnknownGpuVendor(_))));
        // preconditions were still evaluated first
        assert_eq!(runner.executed_commands(), vec!["first"]);
    }
}
