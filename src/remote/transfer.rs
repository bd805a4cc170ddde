//! SFTP-based transfer of files and directory trees.
//!
//! This module handles pushing local trees to the target, pulling remote
//! trees back, and removing remote trees, each over a single SFTP session
//! opened for the duration of one call.

use crate::config::SshParams;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::remote::connection::Connection;
use crate::remote::stream::TransferObserver;
use crate::remote::tree::{self, CopyOptions, LocalFs, RemoteFs, Side, TreeError, TreeStats};
use log::debug;
use std::path::PathBuf;

/// Which way a transfer item moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local source to remote destination.
    Push,
    /// Remote source to local destination.
    Pull,
}

/// A file or directory tree to move in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub direction: Direction,
}

impl DataItem {
    pub fn push(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            direction: Direction::Push,
        }
    }

    pub fn pull(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            direction: Direction::Pull,
        }
    }
}

/// Fails with [`Error::LocalPathMissing`] for the first push item whose
/// local source does not exist.
pub fn check_local_sources(items: &[DataItem]) -> Result<()> {
    for item in items {
        if item.direction == Direction::Push && !item.source.exists() {
            return Err(Error::LocalPathMissing(item.source.clone()));
        }
    }
    Ok(())
}

/// Handles SFTP transfers to/from a target.
pub struct SftpTransport {
    params: SshParams,
    log: Logger,
}

impl SftpTransport {
    /// Create a new SFTP transfer handler for the given target.
    pub fn new(params: SshParams, log: Logger) -> Self {
        Self { params, log }
    }

    /// Moves every item, in order, over one SFTP session.
    ///
    /// Push sources are checked before any connection is opened.
    pub fn transfer(
        &self,
        items: &[DataItem],
        observer: &mut dyn TransferObserver,
    ) -> Result<TreeStats> {
        debug!(target: self.log.target(), "data={:?}", items);
        check_local_sources(items)?;

        let connection = Connection::open(&self.params, &self.log)?;
        let sftp = connection
            .session()
            .sftp()
            .map_err(|e| Error::Connection(format!("Failed to start SFTP subsystem: {}", e)))?;
        let remote = RemoteFs::new(&sftp);

        let mut stats = TreeStats::default();
        for item in items {
            let moved = match item.direction {
                Direction::Push => {
                    debug!(
                        target: self.log.target(),
                        "sending {} -> {}",
                        item.source.display(),
                        item.destination.display()
                    );
                    tree::copy_tree(
                        &LocalFs,
                        &item.source,
                        &remote,
                        &item.destination,
                        CopyOptions {
                            full_permissions: true,
                        },
                        observer,
                    )
                    .map_err(|e| push_error(item, e))?
                }
                Direction::Pull => {
                    debug!(
                        target: self.log.target(),
                        "fetching {} -> {}",
                        item.source.display(),
                        item.destination.display()
                    );
                    tree::copy_tree(
                        &remote,
                        &item.source,
                        &LocalFs,
                        &item.destination,
                        CopyOptions::default(),
                        observer,
                    )
                    .map_err(|e| pull_error(item, e))?
                }
            };
            stats.directories += moved.directories;
            stats.files += moved.files;
            stats.bytes += moved.bytes;
        }

        debug!(
            target: self.log.target(),
            "transferred {} files in {} directories ({} bytes)",
            stats.files,
            stats.directories,
            stats.bytes
        );
        Ok(stats)
    }

    /// Removes each remote path and everything below it.
    pub fn remove(&self, paths: &[PathBuf], observer: &mut dyn TransferObserver) -> Result<()> {
        debug!(target: self.log.target(), "paths={:?}", paths);

        let connection = Connection::open(&self.params, &self.log)?;
        let sftp = connection
            .session()
            .sftp()
            .map_err(|e| Error::Connection(format!("Failed to start SFTP subsystem: {}", e)))?;
        let remote = RemoteFs::new(&sftp);

        for path in paths {
            observer.removing(path);
            tree::remove_tree(&remote, path).map_err(|e| {
                debug!(target: self.log.target(), "remove failed: {}", e);
                Error::RemotePathMissing(path.clone())
            })?;
        }

        Ok(())
    }
}

fn push_error(item: &DataItem, e: TreeError) -> Error {
    match e.side {
        Side::Source => Error::Io(std::io::Error::new(
            e.source.kind(),
            format!("Failed to read '{}': {}", e.path.display(), e.source),
        )),
        Side::Destination => Error::Io(std::io::Error::new(
            e.source.kind(),
            format!(
                "Failed to write '{}' while sending '{}': {}",
                e.path.display(),
                item.source.display(),
                e.source
            ),
        )),
    }
}

fn pull_error(item: &DataItem, e: TreeError) -> Error {
    match e.side {
        Side::Source => Error::RemotePathMissing(item.source.clone()),
        Side::Destination => Error::Io(std::io::Error::new(
            e.source.kind(),
            format!("Failed to write '{}': {}", e.path.display(), e.source),
        )),
    }
}
