//! Remote test orchestration.
//!
//! A test definition names the transports of a target (SSH, SFTP or a
//! serial line) and up to three stages: Deploy pushes files, Execute runs
//! commands and classifies their results, Collect pulls files back. The
//! [`Orchestrator`] runs them in order and always cleans up what Deploy
//! pushed.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod remote;
pub mod report;
pub mod stages;

pub use config::TestDefinition;
pub use error::{Error, Result, TestrigError};
pub use events::{Delivery, Event, Events};
pub use logging::{LogListener, Logger};
pub use orchestrator::{Orchestrator, RunSummary};
pub use report::ReportDirectory;
pub use stages::{CommandOutcome, Verdict};
