//! The seam between stages and concrete transports.
//!
//! Stages never construct transports themselves; they ask a [`Transports`]
//! factory for a file mover or a command runner bound to a descriptor.
//! [`RemoteTransports`] is the production factory.

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::remote::descriptor::{TransportDescriptor, TransportKind};
use crate::remote::executor::SshTransport;
use crate::remote::serial::SerialTransport;
use crate::remote::stream::{CommandStream, TransferObserver};
use crate::remote::transfer::{DataItem, SftpTransport};
use std::path::PathBuf;

/// Moves file trees to and from a target.
pub trait FileTransfer {
    fn transfer(&self, items: &[DataItem], observer: &mut dyn TransferObserver) -> Result<()>;

    fn remove(&self, paths: &[PathBuf], observer: &mut dyn TransferObserver) -> Result<()>;
}

/// Runs commands on a target, returning one terminal result per command.
pub trait CommandRunner {
    fn run(
        &self,
        commands: &[String],
        stream: Option<&mut dyn CommandStream>,
    ) -> Result<Vec<String>>;
}

/// Builds transports from descriptors.
pub trait Transports {
    fn file_transfer(&self, descriptor: &TransportDescriptor) -> Result<Box<dyn FileTransfer>>;

    fn command_runner(&self, descriptor: &TransportDescriptor) -> Result<Box<dyn CommandRunner>>;
}

impl FileTransfer for SftpTransport {
    fn transfer(&self, items: &[DataItem], observer: &mut dyn TransferObserver) -> Result<()> {
        SftpTransport::transfer(self, items, observer).map(|_| ())
    }

    fn remove(&self, paths: &[PathBuf], observer: &mut dyn TransferObserver) -> Result<()> {
        SftpTransport::remove(self, paths, observer)
    }
}

impl CommandRunner for SshTransport {
    fn run(
        &self,
        commands: &[String],
        stream: Option<&mut dyn CommandStream>,
    ) -> Result<Vec<String>> {
        Ok(self
            .execute(commands, stream)?
            .into_iter()
            .map(|result| result.exit_code.to_string())
            .collect())
    }
}

impl CommandRunner for SerialTransport {
    fn run(
        &self,
        commands: &[String],
        stream: Option<&mut dyn CommandStream>,
    ) -> Result<Vec<String>> {
        self.send_commands(commands, stream)
    }
}

/// Builds the real SSH, SFTP and serial transports.
#[derive(Debug, Clone)]
pub struct RemoteTransports {
    log: Logger,
}

impl RemoteTransports {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

impl Transports for RemoteTransports {
    fn file_transfer(&self, descriptor: &TransportDescriptor) -> Result<Box<dyn FileTransfer>> {
        let log = self.log.child(&descriptor.name);
        match &descriptor.kind {
            TransportKind::Sftp(params) => Ok(Box::new(SftpTransport::new(params.clone(), log))),
            TransportKind::Ssh(_) | TransportKind::Serial(_) => {
                Err(Error::Definition(format!(
                    "protocol '{}' cannot transfer files",
                    descriptor
                )))
            }
        }
    }

    fn command_runner(&self, descriptor: &TransportDescriptor) -> Result<Box<dyn CommandRunner>> {
        let log = self.log.child(&descriptor.name);
        match &descriptor.kind {
            TransportKind::Ssh(params) => Ok(Box::new(SshTransport::new(params.clone(), log))),
            TransportKind::Serial(params) => Ok(Box::new(SerialTransport::new(params, log)?)),
            TransportKind::Sftp(_) => Err(Error::Definition(format!(
                "protocol '{}' cannot execute commands",
                descriptor
            ))),
        }
    }
}

/// Whether a descriptor can serve as a file transfer transport.
pub fn supports_transfer(kind: &TransportKind) -> bool {
    match kind {
        TransportKind::Sftp(_) => true,
        TransportKind::Ssh(_) | TransportKind::Serial(_) => false,
    }
}

/// Whether a descriptor can run commands.
pub fn supports_commands(kind: &TransportKind) -> bool {
    match kind {
        TransportKind::Ssh(_) | TransportKind::Serial(_) => true,
        TransportKind::Sftp(_) => false,
    }
}
