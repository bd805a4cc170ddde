//! Explicit logging handles and the bus-to-log listener.
//!
//! Library components never log through an implicit module target. Each
//! one is handed a [`Logger`] when it is built and emits records under that
//! handle's target, so the embedding application decides how records from
//! a pipeline are named and filtered.

use crate::events::Events;
use crate::stages::Verdict;
use log::{debug, info, warn};

/// A named log target handed to each component at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logger {
    target: String,
}

impl Logger {
    /// Creates a root logger for the given target.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Derives a handle for a sub-component (`root::name`).
    pub fn child(&self, name: &str) -> Logger {
        Logger {
            target: format!("{}::{}", self.target, name),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Writes one log record for every notification emitted on the bus.
pub struct LogListener;

impl LogListener {
    /// Attaches logging handlers to every channel of `events`.
    ///
    /// The unhandled-error channel is left alone: attaching to it changes
    /// error propagation, which is the caller's decision.
    pub fn attach(events: &Events, logger: &Logger) {
        let t = logger.target().to_string();

        macro_rules! on {
            ($event:ident, $level:ident, |$arg:ident| $($fmt:tt)+) => {{
                let target = t.clone();
                events.$event.connect(move |$arg| $level!(target: &target, $($fmt)+));
            }};
        }

        on!(file_load_started, info, |path| "Loading test definition {}", path.display());
        on!(file_load_completed, debug, |def| "Loaded test '{}' version {}", def.name, def.version);
        on!(report_dir_create_started, debug, |path| "Creating report directory under {}", path.display());
        on!(report_dir_create_completed, info, |dir| "Report directory: {}", dir.root.display());
        on!(protocol_read_started, debug, |name| "Reading protocol '{}'", name);
        on!(protocol_read_completed, debug, |desc| "Protocol '{}' is {}", desc.name, desc.kind.label());
        on!(deploy_read_started, debug, |_u| "Reading deploy stage");
        on!(deploy_read_completed, debug, |_def| "Deploy stage read");
        on!(execute_read_started, debug, |_u| "Reading execute stage");
        on!(execute_read_completed, debug, |_def| "Execute stage read");
        on!(collect_read_started, debug, |_u| "Reading collect stage");
        on!(collect_read_completed, debug, |_def| "Collect stage read");
        on!(deploy_started, info, |_u| "Deploy started");
        on!(deploy_completed, info, |_u| "Deploy completed");
        on!(execute_started, info, |_u| "Execute started");
        on!(execute_completed, info, |_u| "Execute completed");
        on!(collect_started, info, |_u| "Collect started");
        on!(collect_completed, info, |_u| "Collect completed");
        on!(data_transfer, info, |n| "Transferring {} -> {}", n.source.display(), n.destination.display());
        on!(data_transfer_progress, debug, |p| "{}/{} bytes", p.current, p.total);
        on!(cleanup_started, info, |_u| "Cleanup started");
        on!(cleanup_target_path, info, |path| "Removing {}", path.display());
        on!(cleanup_completed, info, |_u| "Cleanup completed");
        on!(command_started, info, |script| "Running '{}'", script);
        on!(command_output_line, debug, |line| "| {}", line);

        let target = t;
        events
            .command_completed
            .connect(move |outcome| match outcome.verdict {
                Verdict::Fail => warn!(
                    target: &target,
                    "'{}' -> {} ({})", outcome.script, outcome.result, outcome.verdict
                ),
                _ => info!(
                    target: &target,
                    "'{}' -> {} ({})", outcome.script, outcome.result, outcome.verdict
                ),
            });
    }
}
