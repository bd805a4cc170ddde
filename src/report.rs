//! Per-run report directories.
//!
//! The pipeline only writes below a [`ReportDirectory`]; creating one is the
//! job of whoever embeds the pipeline (the `testrig` binary does it with
//! [`create_report_dir`]).

use crate::error::{Error, Result};
use crate::events::Events;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where one run stores its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDirectory {
    /// The run's own directory
    pub root: PathBuf,

    /// Local data staged before it is sent to the target
    pub local_staging: PathBuf,

    /// Data fetched back from the target
    pub remote_staging: PathBuf,
}

impl ReportDirectory {
    /// Describes the standard `data/{local,remote}` layout under `root`
    /// without touching the filesystem.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let data = root.join("data");
        Self {
            local_staging: data.join("local"),
            remote_staging: data.join("remote"),
            root,
        }
    }
}

/// Replaces every character outside `[A-Za-z0-9 _.-]` with `_`.
pub fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Creates `<reports_root>/<name>-<version>-<uuid>/data/{local,remote}`.
pub fn create_report_dir(
    reports_root: &Path,
    name: &str,
    version: &str,
    events: &Events,
) -> Result<ReportDirectory> {
    events.report_dir_create_started.emit(reports_root);

    if !reports_root.is_dir() {
        return Err(Error::Definition(format!(
            "Reports directory '{}' does not exist",
            reports_root.display()
        )));
    }
    if name.is_empty() {
        return Err(Error::Definition("Test name is empty".to_string()));
    }
    if version.is_empty() {
        return Err(Error::Definition("Test version is empty".to_string()));
    }

    let dir_name = format!(
        "{}-{}-{}",
        sanitize_component(name),
        sanitize_component(version),
        Uuid::new_v4()
    );
    let root = reports_root.canonicalize()?.join(dir_name);
    let report_dir = ReportDirectory::under(root);

    fs::create_dir(&report_dir.root)?;
    fs::create_dir_all(&report_dir.local_staging)?;
    fs::create_dir_all(&report_dir.remote_staging)?;

    events.report_dir_create_completed.emit(&report_dir);
    Ok(report_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("smoke test 1.0-rc_1"), "smoke test 1.0-rc_1");
        assert_eq!(sanitize_component("a/b:c*d"), "a_b_c_d");
    }

    #[test]
    fn test_under_layout() {
        let dir = ReportDirectory::under("/reports/run");
        assert_eq!(dir.local_staging, PathBuf::from("/reports/run/data/local"));
        assert_eq!(dir.remote_staging, PathBuf::from("/reports/run/data/remote"));
    }

    #[test]
    fn test_create_report_dir() {
        let reports = TempDir::new().unwrap();
        let events = Events::new();
        let created = Rc::new(RefCell::new(None));
        {
            let created = Rc::clone(&created);
            events
                .report_dir_create_completed
                .connect(move |dir: &ReportDirectory| *created.borrow_mut() = Some(dir.clone()));
        }

        let dir = create_report_dir(reports.path(), "net/smoke", "1.0", &events).unwrap();

        assert!(dir.local_staging.is_dir());
        assert!(dir.remote_staging.is_dir());
        let name = dir.root.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("net_smoke-1.0-"), "{}", name);
        assert_eq!(created.borrow().as_ref(), Some(&dir));
    }

    #[test]
    fn test_two_runs_get_distinct_dirs() {
        let reports = TempDir::new().unwrap();
        let events = Events::new();
        let first = create_report_dir(reports.path(), "t", "1", &events).unwrap();
        let second = create_report_dir(reports.path(), "t", "1", &events).unwrap();
        assert_ne!(first.root, second.root);
    }

    #[test]
    fn test_missing_reports_root() {
        let reports = TempDir::new().unwrap();
        let missing = reports.path().join("nope");
        let err = create_report_dir(&missing, "t", "1", &Events::new()).unwrap_err();
        assert!(matches!(err, Error::Definition(_)));
    }

    #[test]
    fn test_empty_name_rejected() {
        let reports = TempDir::new().unwrap();
        assert!(create_report_dir(reports.path(), "", "1", &Events::new()).is_err());
        assert!(create_report_dir(reports.path(), "t", "", &Events::new()).is_err());
    }
}
