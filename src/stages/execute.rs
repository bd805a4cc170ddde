//! The execute stage: runs declared commands one at a time and classifies
//! each result against its pass/fail tokens.

use super::{decode_section, scalar_string, CommandOutcome, StageState, Verdict};
use crate::config::TestDefinition;
use crate::error::{Error, Result};
use crate::events::Events;
use crate::logging::Logger;
use crate::remote::{supports_commands, CommandStream, Registry, TransportDescriptor, Transports};
use log::debug;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ExecuteSection {
    protocol: String,
    commands: Vec<CommandEntry>,
}

#[derive(Debug, Deserialize)]
struct CommandEntry {
    script: String,
    #[serde(default, deserialize_with = "scalar_string")]
    passing: String,
    #[serde(default, deserialize_with = "scalar_string")]
    failing: String,
    #[serde(default)]
    protocol: Option<String>,
}

/// A declared command bound to the transport that will run it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandItem {
    pub script: String,
    pub passing: String,
    pub failing: String,
    pub protocol: TransportDescriptor,
}

pub struct ExecuteStage {
    state: StageState<CommandItem>,
    log: Logger,
}

impl ExecuteStage {
    /// Reads the `execute` section, resolving the default protocol and any
    /// per-command override.
    pub fn read(
        definition: &TestDefinition,
        registry: &Registry,
        events: &Events,
        log: Logger,
    ) -> Result<Self> {
        let section = match &definition.execute {
            Some(section) => section,
            None => {
                debug!(target: log.target(), "'execute' stage is not defined");
                return Ok(Self {
                    state: StageState::skipped(),
                    log,
                });
            }
        };

        events.execute_read_started.fire();

        let decoded: ExecuteSection = decode_section(section, "execute")?;
        debug!(target: log.target(), "default execute protocol={}", decoded.protocol);
        let default = resolve_command_protocol(registry, &decoded.protocol, "/execute/protocol")?;

        let mut items = Vec::with_capacity(decoded.commands.len());
        for (index, entry) in decoded.commands.into_iter().enumerate() {
            let protocol = match &entry.protocol {
                Some(name) => resolve_command_protocol(
                    registry,
                    name,
                    &format!("/execute/commands/{}/protocol", index),
                )?,
                None => default.clone(),
            };
            items.push(CommandItem {
                script: entry.script,
                passing: entry.passing,
                failing: entry.failing,
                protocol,
            });
        }
        debug!(target: log.target(), "commands={:?}", items);

        events.execute_read_completed.emit(section);

        Ok(Self {
            state: StageState::defined(items),
            log,
        })
    }

    pub fn is_defined(&self) -> bool {
        self.state.defined
    }

    pub fn commands(&self) -> &[CommandItem] {
        &self.state.items
    }

    /// Runs every command in declaration order.
    ///
    /// Each command is its own transport invocation, and its outcome is bound
    /// to the item it was dispatched for, so identical scripts with different
    /// tokens are classified independently.
    pub fn run(&self, events: &Events, transports: &dyn Transports) -> Result<Vec<CommandOutcome>> {
        if !self.state.defined {
            debug!(target: self.log.target(), "execute is not defined. Skipping run");
            return Ok(Vec::new());
        }

        events.execute_started.fire();

        let mut outcomes = Vec::with_capacity(self.state.items.len());
        for (index, item) in self.state.items.iter().enumerate() {
            debug!(
                target: self.log.target(),
                "command {} via {}: {:?}", index, item.protocol, item.script
            );

            let runner = transports.command_runner(&item.protocol)?;
            let mut correlator = Correlator {
                events,
                index,
                item,
                outcome: None,
            };
            let results = runner.run(std::slice::from_ref(&item.script), Some(&mut correlator))?;

            let outcome = match correlator.outcome.take() {
                Some(outcome) => outcome,
                None => {
                    let result = results.into_iter().next().ok_or_else(|| {
                        Error::CommandDispatch(format!("no result for '{}'", item.script))
                    })?;
                    correlator.finish(&result)
                }
            };
            outcomes.push(outcome);
        }

        events.execute_completed.fire();
        Ok(outcomes)
    }
}

fn resolve_command_protocol(
    registry: &Registry,
    name: &str,
    path: &str,
) -> Result<TransportDescriptor> {
    let descriptor = registry.resolve(name, path)?;
    if !supports_commands(&descriptor.kind) {
        return Err(Error::Definition(format!(
            "'{}' cannot execute commands. Path: {}",
            descriptor, path
        )));
    }
    Ok(descriptor.clone())
}

/// Relays one command's stream onto the bus and classifies its result.
struct Correlator<'a> {
    events: &'a Events,
    index: usize,
    item: &'a CommandItem,
    outcome: Option<CommandOutcome>,
}

impl Correlator<'_> {
    fn finish(&self, result: &str) -> CommandOutcome {
        let outcome = CommandOutcome {
            index: self.index,
            script: self.item.script.clone(),
            passing: self.item.passing.clone(),
            failing: self.item.failing.clone(),
            result: result.to_string(),
            verdict: Verdict::classify(result, &self.item.passing, &self.item.failing),
        };
        self.events.command_completed.emit(&outcome);
        outcome
    }
}

impl CommandStream for Correlator<'_> {
    fn executing(&mut self, command: &str) {
        self.events.command_started.emit(command);
    }

    fn output_line(&mut self, line: &str) {
        self.events.command_output_line.emit(line);
    }

    fn completed(&mut self, result: &str) {
        if self.outcome.is_none() {
            self.outcome = Some(self.finish(result));
        }
    }
}
