//! The Deploy, Execute and Collect stages.
//!
//! Each stage is built by a `read` step that decodes its section of the
//! test definition and resolves the transports it references, and is then
//! driven by `run`. A stage whose section is absent is skipped: it emits
//! nothing and performs no I/O.

pub mod collect;
pub mod deploy;
pub mod execute;

pub use collect::CollectStage;
pub use deploy::DeployStage;
pub use execute::ExecuteStage;

use crate::error::{Error, Result};
use crate::events::{Events, Progress, TransferNotice};
use crate::remote::{supports_transfer, DataItem, Registry, TransferObserver, TransportDescriptor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Transfer item type used when a definition names none.
pub const FILE_ITEM: &str = "file";

/// Three-valued classification of a command's terminal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Fail,
    Unknown,
}

impl Verdict {
    /// Classifies `result` against the declared tokens.
    ///
    /// An empty token never matches, so a command that declares neither
    /// token is always [`Verdict::Unknown`].
    pub fn classify(result: &str, passing: &str, failing: &str) -> Self {
        if !passing.is_empty() && result == passing {
            Verdict::Pass
        } else if !failing.is_empty() && result == failing {
            Verdict::Fail
        } else {
            Verdict::Unknown
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
            Verdict::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// The classified result of one declared command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Position of the command in the execute section
    pub index: usize,
    pub script: String,
    pub passing: String,
    pub failing: String,
    pub result: String,
    pub verdict: Verdict,
}

/// Whether a stage was declared, and the items it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct StageState<T> {
    pub defined: bool,
    pub items: Vec<T>,
}

impl<T> StageState<T> {
    pub fn skipped() -> Self {
        Self {
            defined: false,
            items: Vec::new(),
        }
    }

    pub fn defined(items: Vec<T>) -> Self {
        Self {
            defined: true,
            items,
        }
    }
}

/// One declared transfer with its paths already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub item_type: String,
}

impl TransferItem {
    /// Produces the concrete push item; only `file` items are supported.
    pub fn to_push(&self) -> Result<DataItem> {
        self.check_type()?;
        Ok(DataItem::push(&self.source, &self.destination))
    }

    /// Produces the concrete pull item; only `file` items are supported.
    pub fn to_pull(&self) -> Result<DataItem> {
        self.check_type()?;
        Ok(DataItem::pull(&self.source, &self.destination))
    }

    fn check_type(&self) -> Result<()> {
        if self.item_type == FILE_ITEM {
            Ok(())
        } else {
            Err(Error::NotImplemented(format!(
                "'{}' transfer items are not implemented",
                self.item_type
            )))
        }
    }
}

/// The `deploy` and `collect` sections share this shape.
#[derive(Debug, Deserialize)]
pub(crate) struct TransferSection {
    pub protocol: String,
    pub transfer: Vec<TransferEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransferEntry {
    pub source: String,
    pub dest: String,
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: String,
}

fn default_item_type() -> String {
    FILE_ITEM.to_string()
}

/// Decodes a stage section, reporting failures against its path.
pub(crate) fn decode_section<T>(value: &serde_yaml::Value, stage: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_yaml::from_value(value.clone())
        .map_err(|e| Error::Definition(format!("Invalid {} stage: {}. Path: /{}", stage, e, stage)))
}

/// Resolves a transfer stage's protocol, which must be able to move files.
pub(crate) fn resolve_transfer_protocol(
    registry: &Registry,
    name: &str,
    stage: &str,
) -> Result<TransportDescriptor> {
    let path = format!("/{}/protocol", stage);
    let descriptor = registry.resolve(name, &path)?;
    if !supports_transfer(&descriptor.kind) {
        return Err(Error::Definition(format!(
            "'{}' cannot transfer files. Path: {}",
            descriptor, path
        )));
    }
    Ok(descriptor.clone())
}

/// Joins `path` onto `base` unless it is already absolute.
pub(crate) fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Accepts any YAML scalar as a string, so `passing: 0` reads as `"0"`.
pub(crate) fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a scalar value, found {:?}",
            other
        ))),
    }
}

/// Forwards transfer notifications onto the bus.
pub(crate) struct BusObserver<'a> {
    pub events: &'a Events,
}

impl TransferObserver for BusObserver<'_> {
    fn item_started(&mut self, source: &Path, destination: &Path) {
        self.events.data_transfer.emit(&TransferNotice {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }

    fn progress(&mut self, current: u64, total: u64) {
        self.events
            .data_transfer_progress
            .emit(&Progress { current, total });
    }

    fn removing(&mut self, path: &Path) {
        self.events.cleanup_target_path.emit(path);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pass_fail_unknown() {
        assert_eq!(Verdict::classify("0", "0", "1"), Verdict::Pass);
        assert_eq!(Verdict::classify("1", "0", "1"), Verdict::Fail);
        assert_eq!(Verdict::classify("2", "0", "1"), Verdict::Unknown);
    }

    #[test]
    fn test_classify_empty_tokens_are_unknown() {
        assert_eq!(Verdict::classify("0", "", ""), Verdict::Unknown);
        assert_eq!(Verdict::classify("", "", ""), Verdict::Unknown);
        assert_eq!(Verdict::classify("1", "", "1"), Verdict::Fail);
    }

    #[test]
    fn test_classify_pass_wins_when_tokens_equal() {
        assert_eq!(Verdict::classify("ok", "ok", "ok"), Verdict::Pass);
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Pass.to_string(), "PASS");
        assert_eq!(Verdict::Fail.to_string(), "FAIL");
        assert_eq!(Verdict::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_transfer_item_type_check() {
        let file = TransferItem {
            source: PathBuf::from("/src"),
            destination: PathBuf::from("/dst"),
            item_type: FILE_ITEM.to_string(),
        };
        assert_eq!(file.to_push().unwrap(), DataItem::push("/src", "/dst"));
        assert_eq!(file.to_pull().unwrap(), DataItem::pull("/src", "/dst"));

        let archive = TransferItem {
            item_type: "archive".to_string(),
            ..file
        };
        assert!(matches!(archive.to_push(), Err(Error::NotImplemented(_))));
        assert!(matches!(archive.to_pull(), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn test_resolve_against() {
        let base = Path::new("/tests");
        assert_eq!(resolve_against(base, "a.txt"), PathBuf::from("/tests/a.txt"));
        assert_eq!(resolve_against(base, "/tmp/a.txt"), PathBuf::from("/tmp/a.txt"));
    }

    #[test]
    fn test_scalar_tokens() {
        #[derive(Deserialize)]
        struct Tokens {
            #[serde(deserialize_with = "scalar_string")]
            passing: String,
            #[serde(deserialize_with = "scalar_string")]
            failing: String,
        }

        let tokens: Tokens = serde_yaml::from_str("passing: 0\nfailing: FAILED").unwrap();
        assert_eq!(tokens.passing, "0");
        assert_eq!(tokens.failing, "FAILED");
    }
}
