//! Structured record of everything the engine does.
//!
//! The engine never talks to the logger directly. It reports [`Event`]s to an injected
//! [`EventSink`], which is enough to reconstruct the plan and its outcome afterwards.

use std::cell::RefCell;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Progress through the reconciliation stages.
    Stage(String),
    Probe { description: String, command: String },
    ProbeFailed { description: String, diagnostic: String },
    Met { description: String },
    PreconditionUnmet { description: String, failure_message: String },
    Discrepancy { description: String, failure_message: String },
    /// A discrepancy the planner has no remediation for on this host.
    Skipped { description: String, reason: String },
    /// One entry of the computed plan, in order.
    Planned { action: String, rollback: Option<String> },
    WouldExecute { action: String },
    Executing { action: String },
    Executed { action: String, output: String },
    ActionFailed { action: String, cause: String },
    RollingBack { count: usize },
    RolledBack { command: String },
    RollbackFailed { command: String, cause: String },
    Warning(String),
}

pub trait EventSink {
    fn record(&self, event: Event);
}

/// Forwards events to the `log` facade.
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: Event) {
        match event {
            Event::Stage(msg) => info!("{}", msg),
            Event::Planned { action, rollback: Some(rollback) } => debug!("Planned: {} (rollback: {})", action, rollback),
            Event::Planned { action, rollback: None } => debug!("Planned: {}", action),
            Event::Probe { description, command } => info!("Running check: {} ({})", description, command),
            Event::ProbeFailed { description, diagnostic } => error!("Check '{}' failed: {}", description, diagnostic),
            Event::Met { description } => debug!("Met: {}", description),
            Event::PreconditionUnmet { description, failure_message } =>
                warn!("Precondition not met: {}: {}", description, failure_message),
            Event::Discrepancy { description, failure_message } =>
                info!("Discrepancy: {}: {}", description, failure_message),
            Event::Skipped { description, reason } => info!("Not remediating '{}': {}", description, reason),
            Event::WouldExecute { action } => info!("Would execute: {}", action),
            Event::Executing { action } => info!("Executing: {}", action),
            Event::Executed { output, .. } => if !output.trim().is_empty() {
                info!("{}", output.trim_end());
            },
            Event::ActionFailed { action, cause } => error!("Command failed: {}: {}", action, cause),
            Event::RollingBack { count } => error!("Rolling back {} applied action(s)...", count),
            Event::RolledBack { command } => info!("Rolled back: {}", command),
            Event::RollbackFailed { command, cause } => error!("Rollback failed: {}: {}", command, cause),
            Event::Warning(msg) => warn!("{}", msg),
        }
    }
}

/// Keeps every event in memory, for tests and dry-run diffing.
#[derive(Default)]
pub struct MemorySink {
    events: RefCell<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events.borrow().iter().filter_map(|x| match x {
            Event::Warning(msg) => Some(msg.clone()),
            _ => None,
        }).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}
