//! Test definition documents.
//!
//! A test definition is a YAML document describing the transports of a test
//! and the three optional stages run against them.
//!
//! # Example Definition
//!
//! ```yaml
//! name: "smoke"
//! version: "1.0"
//! protocols:
//!   sftp:
//!     address: "10.0.0.5"
//!     user: "root"
//!     password: "root"
//!   ssh:
//!     address: "10.0.0.5"
//!     user: "root"
//!     password: "root"
//!   console:
//!     kind: serial
//!     device: "/dev/ttyUSB0"
//!     baudrate: 115200
//! deploy:
//!   protocol: sftp
//!   transfer:
//!     - source: "tests/runner.sh"
//!       dest: "/tmp/runner.sh"
//! execute:
//!   protocol: ssh
//!   commands:
//!     - script: "/tmp/runner.sh"
//!       passing: "0"
//!       failing: "1"
//!     - script: "uname -r\n"
//!       protocol: console
//! collect:
//!   protocol: sftp
//!   transfer:
//!     - source: "/tmp/results"
//!       dest: "results"
//! ```
//!
//! Stage sub-documents are kept as raw YAML values here; each stage decodes
//! and validates its own section when it is read.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default SSH port
const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH connection timeout in seconds
const DEFAULT_SSH_TIMEOUT: f64 = 60.0;

/// Default serial line speed
const DEFAULT_BAUDRATE: u32 = 115_200;

/// Default serial read timeout in seconds
const DEFAULT_SERIAL_TIMEOUT: f64 = 1.0;

/// A parsed test definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Test name
    pub name: String,

    /// Test version
    pub version: String,

    /// Transport parameters keyed by user-chosen name
    #[serde(default)]
    pub protocols: serde_yaml::Mapping,

    pub deploy: Option<serde_yaml::Value>,

    pub execute: Option<serde_yaml::Value>,

    pub collect: Option<serde_yaml::Value>,
}

impl TestDefinition {
    /// Parses a definition from YAML text.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Definition(format!("Failed to parse test definition: {}", e)))
    }

    /// Loads a definition from a file.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Definition(format!(
                "Test definition '{}' does not exist",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;

        serde_yaml::from_str(&contents).map_err(|e| {
            Error::Definition(format!(
                "Failed to parse test definition: {}\n\n\
                 File path: {}\n\n\
                 Suggestions:\n\
                 • Check YAML syntax in the test file\n\
                 • Verify indentation uses spaces, not tabs\n\
                 • Make sure 'name', 'version' and 'protocols' are present",
                e,
                path.display()
            ))
        })
    }

    /// Iterates protocol entries in document order.
    pub fn protocol_entries(&self) -> Result<Vec<(String, &serde_yaml::Value)>> {
        self.protocols
            .iter()
            .map(|(key, value)| match key.as_str() {
                Some(name) => Ok((name.to_string(), value)),
                None => Err(Error::Definition(format!(
                    "Protocol names must be strings, found {:?}. Path: /protocols",
                    key
                ))),
            })
            .collect()
    }
}

/// Connection parameters shared by the SSH and SFTP transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshParams {
    /// Hostname or IP address of the target
    pub address: String,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Login user; empty means the local user name is not assumed
    #[serde(default)]
    pub user: String,

    /// Login password (optional)
    #[serde(default)]
    pub password: Option<String>,

    /// Path to SSH private key file (optional)
    #[serde(default)]
    pub ssh_key: Option<String>,

    /// Connection and channel inactivity timeout in seconds
    #[serde(default = "default_ssh_timeout")]
    pub timeout: f64,
}

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialParams {
    /// Device path; `loop` selects an in-memory loopback line
    #[serde(alias = "port")]
    pub device: String,

    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// `none`, `odd` or `even`; checked when the protocol entry is read
    #[serde(default = "default_parity")]
    pub parity: String,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: f32,

    /// Read timeout in seconds
    #[serde(default = "default_serial_timeout")]
    pub timeout: f64,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_ssh_timeout() -> f64 {
    DEFAULT_SSH_TIMEOUT
}

fn default_baudrate() -> u32 {
    DEFAULT_BAUDRATE
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> f32 {
    1.0
}

fn default_serial_timeout() -> f64 {
    DEFAULT_SERIAL_TIMEOUT
}

impl SshParams {
    /// Creates SSH parameters with required fields.
    pub fn new(address: String, user: String) -> Self {
        Self {
            address,
            port: DEFAULT_SSH_PORT,
            user,
            password: None,
            ssh_key: None,
            timeout: DEFAULT_SSH_TIMEOUT,
        }
    }

    /// Builder method to set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set the password.
    pub fn with_password(mut self, password: String) -> Self {
        self.password = Some(password);
        self
    }

    /// Builder method to set the SSH key path.
    pub fn with_ssh_key(mut self, key_path: String) -> Self {
        self.ssh_key = Some(key_path);
        self
    }

    /// Builder method to set the timeout.
    pub fn with_timeout(mut self, timeout: f64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the SSH connection string (user@address:port).
    pub fn connection_string(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            format!("{}@{}", self.user, self.address)
        } else {
            format!("{}@{}:{}", self.user, self.address, self.port)
        }
    }

    /// Expands the SSH key path, replacing ~ with the home directory.
    pub fn expanded_ssh_key(&self) -> Option<PathBuf> {
        self.ssh_key.as_ref().map(|key| {
            if let Some(stripped) = key.strip_prefix("~/") {
                if let Some(home) = dirs::home_dir() {
                    return home.join(stripped);
                }
            }
            PathBuf::from(key)
        })
    }
}

impl SerialParams {
    /// Creates serial parameters for a device with default line settings.
    pub fn new(device: String) -> Self {
        Self {
            device,
            baudrate: DEFAULT_BAUDRATE,
            parity: default_parity(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            timeout: DEFAULT_SERIAL_TIMEOUT,
        }
    }

    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn with_parity(mut self, parity: &str) -> Self {
        self.parity = parity.to_string();
        self
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: f32) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}
