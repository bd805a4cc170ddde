//! Observation contracts shared by every transport.

use std::path::Path;

/// Observes the lifecycle of commands run by a transport.
///
/// For each command a transport calls `executing` once, `output_line` for
/// every line in the order the remote side produced it, then `completed`
/// once with the terminal result, even when no output was produced.
pub trait CommandStream {
    fn executing(&mut self, _command: &str) {}

    fn output_line(&mut self, _line: &str) {}

    fn completed(&mut self, _result: &str) {}
}

/// A stream that ignores everything; used when the caller attached none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStream;

impl CommandStream for NullStream {}

/// Best-effort notifications emitted while moving or removing files.
pub trait TransferObserver {
    /// A file is about to be copied from `source` to `destination`.
    fn item_started(&mut self, _source: &Path, _destination: &Path) {}

    /// `current` of `total` bytes of the current file have been copied.
    fn progress(&mut self, _current: u64, _total: u64) {}

    /// A remote path is about to be removed.
    fn removing(&mut self, _path: &Path) {}
}

/// An observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TransferObserver for NullObserver {}

/// Strips trailing `\r` and `\n` characters.
pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end("ok\r\n"), "ok");
        assert_eq!(trim_line_end("ok\n"), "ok");
        assert_eq!(trim_line_end("ok"), "ok");
        assert_eq!(trim_line_end("  padded  \n"), "  padded  ");
        assert_eq!(trim_line_end("\r\n"), "");
    }
}
