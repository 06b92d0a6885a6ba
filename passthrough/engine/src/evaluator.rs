use std::path::{Path, PathBuf};
use std::time::Duration;

use common::config::Condition;
use common::runner::CommandRunner;

use crate::sink::{Event, EventSink};

/// Runs single conditions against the live system.
pub struct ConditionEvaluator<'a> {
    runner: &'a dyn CommandRunner,
    sink: &'a dyn EventSink,
    modprobe_dir: &'a Path,
    limit: Duration,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sink: &'a dyn EventSink, modprobe_dir: &'a Path,
               limit: Duration) -> ConditionEvaluator<'a> {
        ConditionEvaluator { runner, sink, modprobe_dir, limit }
    }

    /// Never fails: anything that goes wrong while probing just means "unmet".
    pub fn evaluate(&self, condition: &Condition) -> bool {
        let description = &condition.description;
        self.sink.record(Event::Probe { description: description.clone(), command: condition.command.clone() });

        // a missing modprobe file makes the probe fail with a confusing error, report it directly
        if let Some(file) = modprobe_file(&condition.command, self.modprobe_dir) {
            if !file.exists() {
                self.fail(description, format!("{} does not exist", file.display()));
                return false;
            }
        }

        let output = match self.runner.run(&condition.command, self.limit) {
            Ok(output) => output,
            Err(e) => {
                self.fail(description, e.to_string());
                return false;
            }
        };
        if !output.success() {
            self.fail(description, output.diagnostic());
            return false;
        }

        let met = condition.accepts(output.stdout.trim());
        if met {
            self.sink.record(Event::Met { description: description.clone() });
        }
        met
    }

    fn fail(&self, description: &str, diagnostic: String) {
        self.sink.record(Event::ProbeFailed { description: description.to_owned(), diagnostic });
    }
}

/// The first `*.conf` file under `dir` the probe refers to.
fn modprobe_file(command: &str, dir: &Path) -> Option<PathBuf> {
    command.split_whitespace()
        .map(|x| x.trim_matches(|c| c == '\'' || c == '"' || c == ';'))
        .map(Path::new)
        .find(|x| x.starts_with(dir) && *x != dir && x.extension().map_or(false, |e| e == "conf"))
        .map(Path::to_path_buf)
}
