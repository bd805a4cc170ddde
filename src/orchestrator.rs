//! Sequencing of a whole test run.
//!
//! The orchestrator loads a definition, builds the transport registry and
//! the three stages, then runs Deploy, Execute and Collect in order. Once
//! Deploy has completed, its cleanup runs exactly once however the later
//! stages end.

use crate::config::TestDefinition;
use crate::error::{Error, Result};
use crate::events::Events;
use crate::logging::Logger;
use crate::remote::{Registry, RemoteTransports, Transports};
use crate::report::ReportDirectory;
use crate::stages::{CollectStage, CommandOutcome, DeployStage, ExecuteStage, Verdict};
use log::{debug, error, info};
use std::path::{Path, PathBuf};

/// What a call to [`Orchestrator::run_all`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub deployed: bool,
    pub executed: bool,
    pub collected: bool,
    pub cleaned_up: bool,
    pub outcomes: Vec<CommandOutcome>,
}

impl RunSummary {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.outcomes.iter().filter(|o| o.verdict == verdict).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(Verdict::Fail) > 0
    }
}

/// A loaded test: its definition and the stages built from it.
struct Pipeline {
    definition: TestDefinition,
    registry: Registry,
    deploy: DeployStage,
    execute: ExecuteStage,
    collect: CollectStage,
}

/// Runs test definitions against their targets.
pub struct Orchestrator {
    events: Events,
    transports: Box<dyn Transports>,
    log: Logger,
    pipeline: Option<Pipeline>,
}

impl Orchestrator {
    /// Creates an orchestrator talking to real targets.
    pub fn new(log: Logger) -> Self {
        let transports = RemoteTransports::new(log.child("remote"));
        Self::with_transports(Box::new(transports), log)
    }

    /// Creates an orchestrator using the given transport factory.
    pub fn with_transports(transports: Box<dyn Transports>, log: Logger) -> Self {
        Self {
            events: Events::new(),
            transports,
            log,
            pipeline: None,
        }
    }

    /// The notification bus. Attach handlers before loading to observe the
    /// load events.
    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn definition(&self) -> Option<&TestDefinition> {
        self.pipeline.as_ref().map(|p| &p.definition)
    }

    pub fn registry(&self) -> Option<&Registry> {
        self.pipeline.as_ref().map(|p| &p.registry)
    }

    /// Loads a test definition file.
    ///
    /// Relative deploy sources are resolved against the file's directory.
    /// Errors go to the unhandled-error channel when a handler is attached.
    pub fn load_file(&mut self, path: &Path, report_dir: &ReportDirectory) -> Result<()> {
        let loaded = self.read_file(path);
        match loaded {
            Ok((definition, test_dir)) => self.load(definition, &test_dir, report_dir),
            Err(e) => report(&self.events, &self.log, e),
        }
    }

    /// Parses a definition file without building anything from it.
    ///
    /// Returns the definition and the directory relative deploy sources
    /// resolve against. Errors are returned, never routed.
    pub fn read_file(&self, path: &Path) -> Result<(TestDefinition, PathBuf)> {
        if !path.is_file() {
            return Err(Error::Definition(format!(
                "Test file '{}' does not exist",
                path.display()
            )));
        }

        let path = path.canonicalize()?;
        let test_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        self.events.file_load_started.emit(&path);
        let definition = TestDefinition::load_from(&path)?;
        self.events.file_load_completed.emit(&definition);

        Ok((definition, test_dir))
    }

    /// Builds the registry and stages from an already parsed definition.
    pub fn load(
        &mut self,
        definition: TestDefinition,
        test_dir: &Path,
        report_dir: &ReportDirectory,
    ) -> Result<()> {
        self.pipeline = None;

        match self.build(definition, test_dir, report_dir) {
            Ok(pipeline) => {
                debug!(
                    target: self.log.target(),
                    "loaded '{}' with {} protocols",
                    pipeline.definition.name,
                    pipeline.registry.len()
                );
                self.pipeline = Some(pipeline);
                Ok(())
            }
            Err(e) => report(&self.events, &self.log, e),
        }
    }

    fn build(
        &self,
        definition: TestDefinition,
        test_dir: &Path,
        report_dir: &ReportDirectory,
    ) -> Result<Pipeline> {
        let events = &self.events;
        let registry = Registry::from_definition(&definition, events)?;

        let deploy = DeployStage::read(
            &definition,
            test_dir,
            &registry,
            events,
            self.log.child("deploy"),
        )?;
        let execute =
            ExecuteStage::read(&definition, &registry, events, self.log.child("execute"))?;
        let collect = CollectStage::read(
            &definition,
            report_dir,
            &registry,
            events,
            self.log.child("collect"),
        )?;

        Ok(Pipeline {
            definition,
            registry,
            deploy,
            execute,
            collect,
        })
    }

    /// Runs Deploy, Execute and Collect, then Deploy cleanup.
    ///
    /// A no-op until a definition has been loaded.
    pub fn run_all(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let pipeline = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline,
            None => {
                debug!(target: self.log.target(), "nothing loaded. Skipping run");
                return Ok(summary);
            }
        };

        info!(target: self.log.target(), "running '{}'", pipeline.definition.name);

        let transports = self.transports.as_ref();
        let events = &self.events;

        let run_result = run_stages(pipeline, events, transports, &mut summary);

        let cleanup_result = if summary.deployed {
            pipeline
                .deploy
                .cleanup(events, transports)
                .map(|()| summary.cleaned_up = true)
        } else {
            Ok(())
        };

        match (run_result, cleanup_result) {
            (Ok(()), Ok(())) => Ok(summary),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                report(events, &self.log, e)?;
                Ok(summary)
            }
            (Err(run), Err(cleanup)) => {
                let run = report(events, &self.log, run);
                let cleanup = report(events, &self.log, cleanup);
                match (run, cleanup) {
                    (Err(run), Err(cleanup)) => {
                        error!(
                            target: self.log.target(),
                            "cleanup failed after an earlier error: {}", cleanup
                        );
                        Err(run)
                    }
                    (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
                    (Ok(()), Ok(())) => Ok(summary),
                }
            }
        }
    }
}

fn run_stages(
    pipeline: &mut Pipeline,
    events: &Events,
    transports: &dyn Transports,
    summary: &mut RunSummary,
) -> Result<()> {
    pipeline.deploy.run(events, transports)?;
    summary.deployed = pipeline.deploy.is_defined();

    summary.outcomes = pipeline.execute.run(events, transports)?;
    summary.executed = pipeline.execute.is_defined();

    pipeline.collect.run(events, transports)?;
    summary.collected = pipeline.collect.is_defined();

    Ok(())
}

/// Hands `err` to the unhandled-error channel, or returns it when nobody
/// is listening.
fn report(events: &Events, log: &Logger, err: Error) -> Result<()> {
    error!(target: log.target(), "{}", err);
    if events.unhandled_error.emit(&err).is_delivered() {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{record, Call, StubTransports};
    use std::cell::RefCell;
    use std::rc::Rc;

    const FULL: &str = r#"
name: smoke
version: "1.0"
protocols:
  sftp:
    address: target
  ssh:
    address: target
deploy:
  protocol: sftp
  transfer:
    - source: a.txt
      dest: /tmp/a.txt
execute:
  protocol: ssh
  commands:
    - script: "true"
      passing: "0"
collect:
  protocol: sftp
  transfer:
    - source: /tmp/a.txt
      dest: a.txt
"#;

    fn orchestrator(transports: &StubTransports) -> Orchestrator {
        Orchestrator::with_transports(Box::new(transports.clone()), Logger::new("test"))
    }

    fn load(orchestrator: &mut Orchestrator, yaml: &str) -> Result<()> {
        let definition = TestDefinition::from_yaml_str(yaml).unwrap();
        orchestrator.load(
            definition,
            Path::new("/suite"),
            &ReportDirectory::under("/reports/run"),
        )
    }

    #[test]
    fn test_run_before_load_is_noop() {
        let transports = StubTransports::default();
        let mut orchestrator = orchestrator(&transports);

        let summary = orchestrator.run_all().unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(transports.calls().is_empty());
    }

    #[test]
    fn test_full_run() {
        let transports = StubTransports::default();
        let mut orchestrator = orchestrator(&transports);
        let seen = record(orchestrator.events());

        load(&mut orchestrator, FULL).unwrap();
        let summary = orchestrator.run_all().unwrap();

        assert!(summary.deployed && summary.executed && summary.collected && summary.cleaned_up);
        assert_eq!(summary.count(Verdict::Pass), 1);
        assert!(!summary.has_failures());
        assert_eq!(
            transports.calls().last(),
            Some(&Call::Remove(
                "sftp".to_string(),
                vec![PathBuf::from("/tmp/a.txt")]
            ))
        );

        let seen = seen.borrow();
        let position = |name: &str| seen.iter().position(|s| s == name).unwrap();
        assert!(position("deploy_completed") < position("execute_started"));
        assert!(position("execute_completed") < position("collect_started"));
        assert!(position("collect_completed") < position("cleanup_started"));
    }

    #[test]
    fn test_definition_error_propagates_without_io() {
        let transports = StubTransports::default();
        let mut orchestrator = orchestrator(&transports);

        let yaml = FULL.replace("protocol: ssh", "protocol: missing");
        let err = load(&mut orchestrator, &yaml).unwrap_err();

        assert!(err.is_definition());
        assert!(!orchestrator.is_loaded());
        orchestrator.run_all().unwrap();
        assert!(transports.calls().is_empty());
    }

    #[test]
    fn test_bad_serial_settings_fail_load_before_deploy() {
        let transports = StubTransports::default();
        let mut orchestrator = orchestrator(&transports);

        let yaml = FULL.replace(
            "  ssh:\n    address: target\n",
            "  ssh:\n    address: target\n  console:\n    kind: serial\n    device: loop\n    parity: mark\n",
        );
        let yaml = yaml.replace("  protocol: ssh", "  protocol: console");
        let err = load(&mut orchestrator, &yaml).unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.is_definition());
        assert!(!orchestrator.is_loaded());

        let summary = orchestrator.run_all().unwrap();
        assert!(!summary.deployed);
        assert!(transports.calls().is_empty());
    }

    #[test]
    fn test_execute_failure_still_cleans_up() {
        let transports = StubTransports {
            fail_runs: true,
            ..StubTransports::default()
        };
        let mut orchestrator = orchestrator(&transports);
        let seen = record(orchestrator.events());

        load(&mut orchestrator, FULL).unwrap();
        let err = orchestrator.run_all().unwrap_err();

        assert!(matches!(err, Error::Connection(_)));
        let removes = transports
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Remove(..)))
            .count();
        assert_eq!(removes, 1);
        assert!(!seen.borrow().contains(&"collect_started".to_string()));
        assert!(seen.borrow().contains(&"cleanup_completed".to_string()));
    }

    #[test]
    fn test_attached_error_handler_absorbs_errors() {
        let transports = StubTransports {
            fail_runs: true,
            ..StubTransports::default()
        };
        let mut orchestrator = orchestrator(&transports);
        let caught = Rc::new(RefCell::new(Vec::new()));
        {
            let caught = Rc::clone(&caught);
            orchestrator
                .events()
                .unhandled_error
                .connect(move |e: &Error| caught.borrow_mut().push(e.to_string()));
        }

        load(&mut orchestrator, FULL).unwrap();
        let summary = orchestrator.run_all().unwrap();

        assert!(summary.deployed);
        assert!(!summary.executed);
        assert!(summary.cleaned_up);
        assert_eq!(caught.borrow().len(), 1);
        assert!(caught.borrow()[0].contains("stub target unreachable"));
    }

    #[test]
    fn test_attached_handler_absorbs_load_errors() {
        let transports = StubTransports::default();
        let mut orchestrator = orchestrator(&transports);
        let caught = Rc::new(RefCell::new(0));
        {
            let caught = Rc::clone(&caught);
            orchestrator
                .events()
                .unhandled_error
                .connect(move |_| *caught.borrow_mut() += 1);
        }

        let yaml = FULL.replace("protocol: sftp", "protocol: missing");
        load(&mut orchestrator, &yaml).unwrap();

        assert_eq!(*caught.borrow(), 1);
        assert!(!orchestrator.is_loaded());
    }

    #[test]
    fn test_read_file_emits_load_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.yml");
        std::fs::write(&path, FULL).unwrap();

        let transports = StubTransports::default();
        let orchestrator = orchestrator(&transports);
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            orchestrator
                .events()
                .file_load_completed
                .connect(move |def: &TestDefinition| seen.borrow_mut().push(def.name.clone()));
        }

        let (definition, test_dir) = orchestrator.read_file(&path).unwrap();

        assert_eq!(definition.name, "smoke");
        assert_eq!(test_dir, dir.path().canonicalize().unwrap());
        assert_eq!(*seen.borrow(), vec!["smoke"]);
        assert!(!orchestrator.is_loaded());
    }

    #[test]
    fn test_load_file_missing() {
        let transports = StubTransports::default();
        let mut orchestrator = orchestrator(&transports);
        let err = orchestrator
            .load_file(
                Path::new("/nonexistent/test.yml"),
                &ReportDirectory::under("/reports/run"),
            )
            .unwrap_err();
        assert!(err.is_definition());
    }
}
