//! Remote transport layer.
//!
//! This module provides the transports a pipeline talks to a target with:
//! SSH command execution, SFTP tree transfer and line-oriented serial
//! command execution, all observed through the same streaming contracts.

pub mod cleanup;
pub mod connection;
pub mod descriptor;
pub mod executor;
pub mod serial;
pub mod stream;
pub mod transfer;
pub mod transports;
pub mod tree;

pub use cleanup::CleanupRegistry;
pub use descriptor::{Registry, TransportDescriptor, TransportKind};
pub use executor::{ExecutionResult, SshTransport};
pub use serial::{LineSettings, SerialTransport, LOOPBACK_DEVICE};
pub use stream::{CommandStream, NullObserver, NullStream, TransferObserver};
pub use transfer::{check_local_sources, DataItem, Direction, SftpTransport};
pub use transports::{
    supports_commands, supports_transfer, CommandRunner, FileTransfer, RemoteTransports,
    Transports,
};
pub use tree::{copy_tree, remove_tree, CopyOptions, Filesystem, LocalFs, RemoteFs, TreeStats};
