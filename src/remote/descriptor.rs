//! Transport descriptors and the per-definition registry.

use crate::config::{SerialParams, SshParams, TestDefinition};
use crate::error::{Error, Result};
use crate::events::Events;
use crate::remote::serial::LineSettings;
use std::fmt;

/// The closed set of transports a stage can be bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportKind {
    Ssh(SshParams),
    Sftp(SshParams),
    Serial(SerialParams),
}

impl TransportKind {
    /// Builds a kind from a kind token and its raw parameters.
    pub fn from_value(kind: &str, params: &serde_yaml::Value) -> Result<Self> {
        let invalid = |e: serde_yaml::Error| {
            Error::Definition(format!("invalid '{}' parameters: {}", kind, e))
        };

        match kind {
            "ssh" => Ok(TransportKind::Ssh(
                serde_yaml::from_value(params.clone()).map_err(invalid)?,
            )),
            "sftp" => Ok(TransportKind::Sftp(
                serde_yaml::from_value(params.clone()).map_err(invalid)?,
            )),
            "serial" => Ok(TransportKind::Serial(
                serde_yaml::from_value(params.clone()).map_err(invalid)?,
            )),
            other => Err(Error::Definition(format!(
                "'{}' is not a supported protocol kind (expected ssh, sftp or serial)",
                other
            ))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Ssh(_) => "ssh",
            TransportKind::Sftp(_) => "sftp",
            TransportKind::Serial(_) => "serial",
        }
    }
}

/// A named, immutable transport description.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportDescriptor {
    pub name: String,
    pub kind: TransportKind,
}

impl TransportDescriptor {
    pub fn new(name: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Builds a descriptor from one `protocols` entry.
    ///
    /// The kind is taken from the entry's `kind` key, falling back to the
    /// entry name so that `ssh:`/`sftp:`/`serial:` sections need no `kind`.
    /// Serial line settings are validated here, so a bad parity or stop bit
    /// count is a [`Error::Configuration`] before anything connects.
    pub fn from_entry(name: &str, params: &serde_yaml::Value) -> Result<Self> {
        let kind = match params.get("kind") {
            Some(value) => value.as_str().ok_or_else(|| {
                Error::Definition(format!(
                    "'kind' must be a string. Path: /protocols/{}/kind",
                    name
                ))
            })?,
            None => name,
        };

        let kind = TransportKind::from_value(kind, params).map_err(|e| match e {
            Error::Definition(msg) => {
                Error::Definition(format!("{}. Path: /protocols/{}", msg, name))
            }
            other => other,
        })?;

        if let TransportKind::Serial(params) = &kind {
            LineSettings::from_params(params).map_err(|e| match e {
                Error::Configuration(msg) => {
                    Error::Configuration(format!("{}. Path: /protocols/{}", msg, name))
                }
                other => other,
            })?;
        }

        Ok(Self::new(name, kind))
    }
}

impl fmt::Display for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind.label())
    }
}

/// All descriptors declared by one test definition, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: Vec<TransportDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every `protocols` entry, emitting the per-protocol read events.
    pub fn from_definition(definition: &TestDefinition, events: &Events) -> Result<Self> {
        let mut registry = Registry::new();

        for (name, params) in definition.protocol_entries()? {
            events.protocol_read_started.emit(name.as_str());
            let descriptor = TransportDescriptor::from_entry(&name, params)?;
            events.protocol_read_completed.emit(&descriptor);
            registry.insert(descriptor)?;
        }

        Ok(registry)
    }

    /// Adds a descriptor; names must be unique.
    pub fn insert(&mut self, descriptor: TransportDescriptor) -> Result<()> {
        if self.get(&descriptor.name).is_some() {
            return Err(Error::Definition(format!(
                "protocol '{}' is defined more than once",
                descriptor.name
            )));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TransportDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Looks up a descriptor referenced from a stage.
    ///
    /// `path` names the referencing key for the error message.
    pub fn resolve(&self, name: &str, path: &str) -> Result<&TransportDescriptor> {
        self.get(name).ok_or_else(|| {
            Error::Definition(format!(
                "'{}' protocol is not defined anywhere. Path: {}",
                name, path
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransportDescriptor> {
        self.descriptors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn definition(protocols: &str) -> TestDefinition {
        TestDefinition::from_yaml_str(&format!(
            "name: t\nversion: '1'\nprotocols:\n{}",
            protocols
        ))
        .unwrap()
    }

    #[test]
    fn test_kind_inferred_from_name() {
        let def = definition("  ssh:\n    address: host\n  sftp:\n    address: host\n    port: 2222\n");
        let registry = Registry::from_definition(&def, &Events::new()).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("ssh").unwrap().kind.label(), "ssh");
        match &registry.get("sftp").unwrap().kind {
            TransportKind::Sftp(params) => assert_eq!(params.port, 2222),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_explicit_kind_overrides_name() {
        let def = definition("  board:\n    kind: serial\n    device: loop\n    baudrate: 9600\n");
        let registry = Registry::from_definition(&def, &Events::new()).unwrap();

        match &registry.get("board").unwrap().kind {
            TransportKind::Serial(params) => {
                assert_eq!(params.device, "loop");
                assert_eq!(params.baudrate, 9600);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_definition_error() {
        let def = definition("  telnet:\n    address: host\n");
        let err = Registry::from_definition(&def, &Events::new()).unwrap_err();
        assert!(matches!(err, Error::Definition(_)));
    }

    #[test]
    fn test_missing_address_is_definition_error() {
        let def = definition("  ssh:\n    port: 22\n");
        let err = Registry::from_definition(&def, &Events::new()).unwrap_err();
        assert!(err.to_string().contains("/protocols/ssh"));
    }

    #[test]
    fn test_bad_serial_settings_rejected_when_read() {
        let def = definition("  console:\n    kind: serial\n    device: loop\n    parity: mark\n");
        let err = Registry::from_definition(&def, &Events::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("/protocols/console"));

        let def = definition("  console:\n    kind: serial\n    device: loop\n    stop_bits: 1.5\n");
        assert!(Registry::from_definition(&def, &Events::new()).is_ok());
    }

    #[test]
    fn test_resolve_missing_name() {
        let registry = Registry::new();
        let err = registry.resolve("sftp", "/deploy/protocol").unwrap_err();
        assert!(matches!(err, Error::Definition(_)));
        assert!(err.to_string().contains("/deploy/protocol"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = Registry::new();
        let params = SshParams::new("host".to_string(), "user".to_string());
        registry
            .insert(TransportDescriptor::new("a", TransportKind::Ssh(params.clone())))
            .unwrap();
        assert!(registry
            .insert(TransportDescriptor::new("a", TransportKind::Sftp(params)))
            .is_err());
    }

    #[test]
    fn test_protocol_read_events() {
        let events = Events::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            events
                .protocol_read_started
                .connect(move |name: &str| seen.borrow_mut().push(format!("start {}", name)));
        }
        {
            let seen = Rc::clone(&seen);
            events
                .protocol_read_completed
                .connect(move |d: &TransportDescriptor| seen.borrow_mut().push(format!("done {}", d)));
        }

        let def = definition("  sftp:\n    address: host\n");
        Registry::from_definition(&def, &events).unwrap();

        assert_eq!(*seen.borrow(), vec!["start sftp", "done sftp (sftp)"]);
    }
}
