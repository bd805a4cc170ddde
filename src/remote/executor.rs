//! SSH-based remote command execution.
//!
//! This module provides the `SshTransport`, which opens one connection per
//! invocation and runs a sequence of commands over it, one channel per
//! command, streaming merged stdout/stderr line by line.

use crate::config::SshParams;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::remote::connection::Connection;
use crate::remote::stream::{trim_line_end, CommandStream, NullStream};
use log::debug;
use ssh2::{Channel, ExtendedData};
use std::io::{BufRead, BufReader};

/// Terminal type requested for each command's pseudo-terminal.
const PTY_TERM: &str = "xterm";

/// Result of executing a remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code reported by the remote side
    pub exit_code: i32,
}

/// SSH transport for running commands on a target.
pub struct SshTransport {
    params: SshParams,
    log: Logger,
}

impl SshTransport {
    pub fn new(params: SshParams, log: Logger) -> Self {
        Self { params, log }
    }

    /// Executes `commands` in order over a single connection.
    ///
    /// Stops at the first command that fails to run; the connection is
    /// closed before returning in every case.
    pub fn execute(
        &self,
        commands: &[String],
        stream: Option<&mut dyn CommandStream>,
    ) -> Result<Vec<ExecutionResult>> {
        debug!(target: self.log.target(), "commands={:?}", commands);

        let mut null = NullStream;
        let stream: &mut dyn CommandStream = match stream {
            Some(stream) => stream,
            None => &mut null,
        };

        let connection = Connection::open(&self.params, &self.log)?;
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            let result = self.execute_one(&connection, command, stream)?;
            debug!(target: self.log.target(), "Command exit code: {}", result.exit_code);
            results.push(result);
        }

        Ok(results)
    }

    fn execute_one(
        &self,
        connection: &Connection,
        command: &str,
        stream: &mut dyn CommandStream,
    ) -> Result<ExecutionResult> {
        let mut channel = connection
            .session()
            .channel_session()
            .map_err(|e| Error::CommandDispatch(format!("Failed to open channel: {}", e)))?;

        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(|e| Error::CommandDispatch(format!("Failed to merge stderr: {}", e)))?;
        channel
            .request_pty(PTY_TERM, None, None)
            .map_err(|e| Error::CommandDispatch(format!("Failed to request pty: {}", e)))?;

        stream.executing(command);

        channel.exec(command).map_err(|e| {
            Error::CommandDispatch(format!("Failed to execute '{}': {}", command, e))
        })?;

        read_lines(&mut channel, stream)?;

        channel
            .wait_close()
            .map_err(|e| Error::Connection(format!("Failed to close channel: {}", e)))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| Error::Connection(format!("Failed to get exit status: {}", e)))?;

        stream.completed(&exit_code.to_string());

        Ok(ExecutionResult { exit_code })
    }
}

/// Forwards every line read from the channel until EOF.
fn read_lines(channel: &mut Channel, stream: &mut dyn CommandStream) -> Result<()> {
    let mut reader = BufReader::new(channel);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let n = reader
            .read_until(b'\n', &mut raw)
            .map_err(|e| Error::Connection(format!("Failed to read command output: {}", e)))?;
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&raw);
        stream.output_line(trim_line_end(&line));
    }
}
