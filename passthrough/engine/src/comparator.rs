use common::config::{Condition, Remedy};

use crate::evaluator::ConditionEvaluator;
use crate::sink::{Event, EventSink};

/// A desired-state condition that is currently unmet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrepancy {
    pub description: String,
    pub remedy: Option<Remedy>,
}

impl<'a> From<&'a Condition> for Discrepancy {
    fn from(condition: &'a Condition) -> Discrepancy {
        Discrepancy { description: condition.description.clone(), remedy: condition.remedy }
    }
}

pub struct StateComparator<'a> {
    evaluator: &'a ConditionEvaluator<'a>,
    sink: &'a dyn EventSink,
    desired: &'a [Condition],
}

impl<'a> StateComparator<'a> {
    pub fn new(evaluator: &'a ConditionEvaluator<'a>, sink: &'a dyn EventSink,
               desired: &'a [Condition]) -> StateComparator<'a> {
        StateComparator { evaluator, sink, desired }
    }

    /// Unmet desired-state conditions in declaration order. Only reads, so calling it twice
    /// without touching the host yields the same answer.
    pub fn compare_desired_state(&self) -> Vec<Discrepancy> {
        self.desired.iter()
            .filter(|condition| !self.evaluator.evaluate(condition))
            .map(|condition| {
                self.sink.record(Event::Discrepancy {
                    description: condition.description.clone(),
                    failure_message: condition.failure_message.clone(),
                });
                Discrepancy::from(condition)
            })
            .collect()
    }
}

pub fn descriptions(discrepancies: &[Discrepancy]) -> Vec<String> {
    discrepancies.iter().map(|x| x.description.clone()).collect()
}
