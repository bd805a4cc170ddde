//! SSH session establishment shared by the SSH and SFTP transports.

use crate::config::SshParams;
use crate::error::{Error, Result};
use crate::logging::Logger;
use log::{debug, warn};
use ssh2::Session;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// An authenticated SSH session.
///
/// The session is disconnected when the value is dropped, so every exit
/// path of an operation releases it.
pub struct Connection {
    session: Session,
    log: Logger,
}

impl Connection {
    /// Connects and authenticates using the given parameters.
    ///
    /// Every failure (resolution, TCP, handshake, authentication) is
    /// reported as [`Error::Connection`].
    pub fn open(params: &SshParams, log: &Logger) -> Result<Self> {
        debug!(
            target: log.target(),
            "Connecting to {}:{}", params.address, params.port
        );

        let timeout = timeout_from_secs(params.timeout);

        let addr_str = format!("{}:{}", params.address, params.port);
        let addr = addr_str
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(format!(
                    "Failed to resolve host '{}': {}",
                    params.address, e
                ))
            })?
            .next()
            .ok_or_else(|| {
                Error::Connection(format!("No addresses found for host '{}'", params.address))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            Error::Connection(format!("Failed to connect to {}: {}", addr_str, e))
        })?;
        tcp.set_read_timeout(Some(timeout))
            .and_then(|_| tcp.set_write_timeout(Some(timeout)))
            .map_err(|e| Error::Connection(format!("Failed to configure socket: {}", e)))?;

        let mut session = Session::new()
            .map_err(|e| Error::Connection(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| Error::Connection(format!("SSH handshake failed: {}", e)))?;

        authenticate(&session, params, log)?;

        debug!(target: log.target(), "Connected to {}", params.connection_string());
        Ok(Self {
            session,
            log: log.clone(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!(target: self.log.target(), "Disconnect failed: {}", e);
        }
    }
}

/// Authenticates with the first method that succeeds: password, key, agent.
fn authenticate(session: &Session, params: &SshParams, log: &Logger) -> Result<()> {
    let user = params.user.as_str();
    debug!(target: log.target(), "Authenticating as user: {}", user);

    if let Some(password) = params.password.as_deref().filter(|p| !p.is_empty()) {
        match session.userauth_password(user, password) {
            Ok(()) => return Ok(()),
            Err(e) => warn!(target: log.target(), "Password authentication failed: {}", e),
        }
    }

    if let Some(key_path) = params.expanded_ssh_key() {
        debug!(
            target: log.target(),
            "Attempting public key authentication with: {:?}", key_path
        );
        match session.userauth_pubkey_file(user, None, &key_path, None) {
            Ok(()) => return Ok(()),
            Err(e) => warn!(target: log.target(), "Public key authentication failed: {}", e),
        }
    }

    match session.userauth_agent(user) {
        Ok(()) => return Ok(()),
        Err(e) => debug!(target: log.target(), "Agent authentication failed: {}", e),
    }

    Err(Error::Connection(format!(
        "SSH authentication failed for {}",
        params.connection_string()
    )))
}

/// Converts a timeout in seconds to a duration; non-positive means one second.
pub(crate) fn timeout_from_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(timeout_from_secs(2.5), Duration::from_millis(2500));
        assert_eq!(timeout_from_secs(0.0), Duration::from_secs(1));
        assert_eq!(timeout_from_secs(f64::NAN), Duration::from_secs(1));
    }

    #[test]
    fn test_unresolvable_host_is_connection_error() {
        let params = SshParams::new("host.invalid".to_string(), "user".to_string())
            .with_timeout(1.0);
        let err = Connection::open(&params, &Logger::new("test")).err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_refused_port_is_connection_error() {
        let params = SshParams::new("127.0.0.1".to_string(), "user".to_string())
            .with_port(1)
            .with_timeout(1.0);
        let err = Connection::open(&params, &Logger::new("test")).err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
