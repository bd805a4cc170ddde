use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestrigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command dispatch error: {0}")]
    CommandDispatch(String),

    #[error("Local path not found: '{}'", .0.display())]
    LocalPathMissing(PathBuf),

    #[error("Remote path not found: '{}'", .0.display())]
    RemotePathMissing(PathBuf),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl TestrigError {
    /// Returns true for errors raised while reading a test definition.
    ///
    /// These abort the pipeline before any transport is touched.
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            TestrigError::Definition(_) | TestrigError::Configuration(_) | TestrigError::Yaml(_)
        )
    }
}

pub type Error = TestrigError;
pub type Result<T> = std::result::Result<T, Error>;
