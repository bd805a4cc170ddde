//! The deploy stage: pushes local files to the target and removes them
//! again during cleanup.

use super::{
    decode_section, resolve_against, resolve_transfer_protocol, BusObserver, StageState,
    TransferItem, TransferSection,
};
use crate::config::TestDefinition;
use crate::error::Result;
use crate::events::Events;
use crate::logging::Logger;
use crate::remote::{CleanupRegistry, DataItem, Registry, TransportDescriptor, Transports};
use log::debug;
use std::path::{Path, PathBuf};

pub struct DeployStage {
    state: StageState<TransferItem>,
    protocol: Option<TransportDescriptor>,
    pushed: CleanupRegistry,
    log: Logger,
}

impl DeployStage {
    /// Reads the `deploy` section.
    ///
    /// Relative sources are resolved against `test_dir`, the directory of
    /// the test definition file.
    pub fn read(
        definition: &TestDefinition,
        test_dir: &Path,
        registry: &Registry,
        events: &Events,
        log: Logger,
    ) -> Result<Self> {
        let section = match &definition.deploy {
            Some(section) => section,
            None => {
                debug!(target: log.target(), "'deploy' stage is not defined");
                return Ok(Self::skipped(log));
            }
        };

        events.deploy_read_started.fire();

        let decoded: TransferSection = decode_section(section, "deploy")?;
        debug!(target: log.target(), "default deploy protocol={}", decoded.protocol);
        let protocol = resolve_transfer_protocol(registry, &decoded.protocol, "deploy")?;

        let items = decoded
            .transfer
            .into_iter()
            .map(|entry| TransferItem {
                source: resolve_against(test_dir, &entry.source),
                destination: PathBuf::from(entry.dest),
                item_type: entry.item_type,
            })
            .collect::<Vec<_>>();
        debug!(target: log.target(), "transfer={:?}", items);

        events.deploy_read_completed.emit(section);

        Ok(Self {
            state: StageState::defined(items),
            protocol: Some(protocol),
            pushed: CleanupRegistry::new(),
            log,
        })
    }

    fn skipped(log: Logger) -> Self {
        Self {
            state: StageState::skipped(),
            protocol: None,
            pushed: CleanupRegistry::new(),
            log,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.state.defined
    }

    pub fn items(&self) -> &[TransferItem] {
        &self.state.items
    }

    pub fn protocol(&self) -> Option<&TransportDescriptor> {
        self.protocol.as_ref()
    }

    /// Remote paths pushed so far and not yet cleaned up.
    pub fn pending_cleanup(&self) -> &[PathBuf] {
        self.pushed.paths()
    }

    /// Pushes every item in one batch.
    pub fn run(&mut self, events: &Events, transports: &dyn Transports) -> Result<()> {
        let protocol = match (&self.protocol, self.state.defined) {
            (Some(protocol), true) => protocol,
            _ => {
                debug!(target: self.log.target(), "deploy is not defined. Skipping run");
                return Ok(());
            }
        };

        events.deploy_started.fire();

        let items = self
            .state
            .items
            .iter()
            .map(TransferItem::to_push)
            .collect::<Result<Vec<DataItem>>>()?;

        debug!(target: self.log.target(), "transfer data using {}", protocol);
        let files = transports.file_transfer(protocol)?;
        files.transfer(&items, &mut BusObserver { events })?;

        for item in &items {
            self.pushed.register(item.destination.clone());
        }

        events.deploy_completed.fire();
        Ok(())
    }

    /// Removes everything the last run pushed.
    ///
    /// Paths are forgotten once handed to the transport, so a second call
    /// removes nothing.
    pub fn cleanup(&mut self, events: &Events, transports: &dyn Transports) -> Result<()> {
        let protocol = match (&self.protocol, self.state.defined) {
            (Some(protocol), true) => protocol,
            _ => {
                debug!(target: self.log.target(), "deploy is not defined. Skipping cleanup");
                return Ok(());
            }
        };

        events.cleanup_started.fire();

        let paths = self.pushed.take();
        if !paths.is_empty() {
            debug!(target: self.log.target(), "removing {:?}", paths);
            let files = transports.file_transfer(protocol)?;
            files.remove(&paths, &mut BusObserver { events })?;
        }

        events.cleanup_completed.fire();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::stages::testing::{record, Call, StubTransports};

    fn load(yaml: &str) -> (TestDefinition, Registry) {
        let definition = TestDefinition::from_yaml_str(yaml).unwrap();
        let registry = Registry::from_definition(&definition, &Events::new()).unwrap();
        (definition, registry)
    }

    const DEPLOY: &str = r#"
name: t
version: "1"
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
    - source: /abs/b
      dest: /tmp/b
"#;

    #[test]
    fn test_read_resolves_relative_sources() {
        let (definition, registry) = load(DEPLOY);
        let stage = DeployStage::read(
            &definition,
            Path::new("/suite"),
            &registry,
            &Events::new(),
            Logger::new("test"),
        )
        .unwrap();

        assert!(stage.is_defined());
        assert_eq!(stage.items()[0].source, PathBuf::from("/suite/a.txt"));
        assert_eq!(stage.items()[1].source, PathBuf::from("/abs/b"));
        assert_eq!(stage.items()[0].item_type, "file");
        assert_eq!(stage.protocol().unwrap().name, "sftp");
    }

    #[test]
    fn test_undefined_stage_is_silent() {
        let (definition, registry) = load("name: t\nversion: '1'\nprotocols: {}\n");
        let events = Events::new();
        let seen = record(&events);
        let transports = StubTransports::default();

        let mut stage =
            DeployStage::read(&definition, Path::new("/"), &registry, &events, Logger::new("test"))
                .unwrap();
        stage.run(&events, &transports).unwrap();
        stage.cleanup(&events, &transports).unwrap();

        assert!(!stage.is_defined());
        assert!(seen.borrow().is_empty());
        assert!(transports.calls().is_empty());
    }

    #[test]
    fn test_missing_protocol_is_definition_error() {
        let yaml = DEPLOY.replace("protocol: sftp", "protocol: nowhere");
        let (definition, registry) = load(&yaml);
        let err = DeployStage::read(
            &definition,
            Path::new("/"),
            &registry,
            &Events::new(),
            Logger::new("test"),
        )
        .err()
        .unwrap();

        assert!(matches!(err, Error::Definition(_)));
        assert!(err.to_string().contains("/deploy/protocol"));
    }

    #[test]
    fn test_command_protocol_cannot_deploy() {
        let yaml = DEPLOY.replace("protocol: sftp", "protocol: ssh");
        let (definition, registry) = load(&yaml);
        let err = DeployStage::read(
            &definition,
            Path::new("/"),
            &registry,
            &Events::new(),
            Logger::new("test"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Definition(_)));
    }

    #[test]
    fn test_missing_transfer_key_is_definition_error() {
        let (definition, registry) = load(
            "name: t\nversion: '1'\nprotocols:\n  sftp:\n    address: h\ndeploy:\n  protocol: sftp\n",
        );
        let err = DeployStage::read(
            &definition,
            Path::new("/"),
            &registry,
            &Events::new(),
            Logger::new("test"),
        )
        .err()
        .unwrap();

        assert!(matches!(err, Error::Definition(_)));
        assert!(err.to_string().contains("transfer"));
    }

    #[test]
    fn test_run_then_cleanup() {
        let (definition, registry) = load(DEPLOY);
        let events = Events::new();
        let seen = record(&events);
        let transports = StubTransports::default();

        let mut stage =
            DeployStage::read(&definition, Path::new("/suite"), &registry, &events, Logger::new("test"))
                .unwrap();
        stage.run(&events, &transports).unwrap();
        assert_eq!(
            stage.pending_cleanup(),
            &[PathBuf::from("/tmp/a.txt"), PathBuf::from("/tmp/b")]
        );

        stage.cleanup(&events, &transports).unwrap();
        assert!(stage.pending_cleanup().is_empty());

        assert_eq!(
            transports.calls(),
            vec![
                Call::Transfer(
                    "sftp".to_string(),
                    vec![
                        DataItem::push("/suite/a.txt", "/tmp/a.txt"),
                        DataItem::push("/abs/b", "/tmp/b"),
                    ]
                ),
                Call::Remove(
                    "sftp".to_string(),
                    vec![PathBuf::from("/tmp/a.txt"), PathBuf::from("/tmp/b")]
                ),
            ]
        );
        assert_eq!(
            *seen.borrow(),
            vec![
                "deploy_read_started",
                "deploy_read_completed",
                "deploy_started",
                "deploy_completed",
                "cleanup_started",
                "cleanup_target_path /tmp/a.txt",
                "cleanup_target_path /tmp/b",
                "cleanup_completed",
            ]
        );
    }

    #[test]
    fn test_unsupported_item_type_fails_before_transfer() {
        let yaml = DEPLOY.replace("dest: /tmp/b", "dest: /tmp/b\n      type: archive");
        let (definition, registry) = load(&yaml);
        let events = Events::new();
        let transports = StubTransports::default();

        let mut stage =
            DeployStage::read(&definition, Path::new("/"), &registry, &events, Logger::new("test"))
                .unwrap();
        let err = stage.run(&events, &transports).unwrap_err();

        assert!(matches!(err, Error::NotImplemented(_)));
        assert!(transports.calls().is_empty());
        assert!(stage.pending_cleanup().is_empty());
    }
}
