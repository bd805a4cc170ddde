//! Recursive file tree operations over local and remote filesystems.
//!
//! Push, pull and remove are the same traversal run against different
//! [`Filesystem`] implementations: push copies [`LocalFs`] into
//! [`RemoteFs`], pull copies the other way, and remove walks a single
//! filesystem removing children before their parent.

use crate::remote::stream::TransferObserver;
use ssh2::{FileStat, Sftp};
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Size of the buffer used when copying file contents.
const CHUNK_SIZE: usize = 32 * 1024;

/// Permission bits applied to pushed files (rwxrwxrwx).
pub const FULL_PERMISSIONS: u32 = 0o777;

/// The capabilities a tree traversal needs from a filesystem.
pub trait Filesystem {
    fn is_dir(&self, path: &Path) -> io::Result<bool>;

    /// Returns the names of the immediate children of a directory.
    fn list(&self, path: &Path) -> io::Result<Vec<String>>;

    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Opens a file for reading, returning the reader and the file size.
    fn open(&self, path: &Path) -> io::Result<(Box<dyn Read + '_>, u64)>;

    /// Creates or truncates a file for writing.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + '_>>;

    fn set_full_permissions(&self, path: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// The machine running the pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl Filesystem for LocalFs {
    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        Ok(fs::metadata(path)?.is_dir())
    }

    fn list(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn open(&self, path: &Path) -> io::Result<(Box<dyn Read + '_>, u64)> {
        let file = fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok((Box::new(file), size))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + '_>> {
        Ok(Box::new(fs::File::create(path)?))
    }

    #[cfg(unix)]
    fn set_full_permissions(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(FULL_PERMISSIONS))
    }

    #[cfg(not(unix))]
    fn set_full_permissions(&self, path: &Path) -> io::Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }
}

/// The target side of an open SFTP session.
pub struct RemoteFs<'a> {
    sftp: &'a Sftp,
}

impl<'a> RemoteFs<'a> {
    pub fn new(sftp: &'a Sftp) -> Self {
        Self { sftp }
    }
}

impl Filesystem for RemoteFs<'_> {
    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        Ok(self.sftp.stat(path)?.is_dir())
    }

    fn list(&self, path: &Path) -> io::Result<Vec<String>> {
        Ok(self
            .sftp
            .readdir(path)?
            .into_iter()
            .filter_map(|(child, _)| child.file_name().map(|n| n.to_string_lossy().to_string()))
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        Ok(self.sftp.mkdir(path, 0o755)?)
    }

    fn open(&self, path: &Path) -> io::Result<(Box<dyn Read + '_>, u64)> {
        let size = self.sftp.stat(path)?.size.unwrap_or(0);
        let file = self.sftp.open(path)?;
        Ok((Box::new(file), size))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + '_>> {
        Ok(Box::new(self.sftp.create(path)?))
    }

    fn set_full_permissions(&self, path: &Path) -> io::Result<()> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(FULL_PERMISSIONS),
            atime: None,
            mtime: None,
        };
        Ok(self.sftp.setstat(path, stat)?)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        Ok(self.sftp.unlink(path)?)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        Ok(self.sftp.rmdir(path)?)
    }
}

/// Which filesystem of a copy an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

/// A failed filesystem call during a traversal.
#[derive(Debug)]
pub struct TreeError {
    pub side: Side,
    pub path: PathBuf,
    pub source: io::Error,
}

impl TreeError {
    fn source_side(path: &Path) -> impl FnOnce(io::Error) -> TreeError + '_ {
        move |source| TreeError {
            side: Side::Source,
            path: path.to_path_buf(),
            source,
        }
    }

    fn destination_side(path: &Path) -> impl FnOnce(io::Error) -> TreeError + '_ {
        move |source| TreeError {
            side: Side::Destination,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            Side::Source => "source",
            Side::Destination => "destination",
        };
        write!(f, "{} '{}': {}", side, self.path.display(), self.source)
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Options for [`copy_tree`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Set rwxrwxrwx on every file written to the destination.
    pub full_permissions: bool,
}

/// Counts of what a traversal touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

impl TreeStats {
    fn add(&mut self, other: TreeStats) {
        self.directories += other.directories;
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// Copies `src` (a file or a whole directory tree) to `dst`.
///
/// Directories are created top-down before anything is written into them;
/// children are visited in name order.
pub fn copy_tree(
    src_fs: &dyn Filesystem,
    src: &Path,
    dst_fs: &dyn Filesystem,
    dst: &Path,
    options: CopyOptions,
    observer: &mut dyn TransferObserver,
) -> Result<TreeStats, TreeError> {
    let mut stats = TreeStats::default();

    if src_fs.is_dir(src).map_err(TreeError::source_side(src))? {
        dst_fs
            .create_dir(dst)
            .map_err(TreeError::destination_side(dst))?;
        stats.directories += 1;

        let mut children = src_fs.list(src).map_err(TreeError::source_side(src))?;
        children.sort();

        for name in children {
            let child_stats = copy_tree(
                src_fs,
                &src.join(&name),
                dst_fs,
                &dst.join(&name),
                options,
                observer,
            )?;
            stats.add(child_stats);
        }
    } else {
        observer.item_started(src, dst);
        stats.bytes = copy_file(src_fs, src, dst_fs, dst, observer)?;
        stats.files = 1;

        if options.full_permissions {
            dst_fs
                .set_full_permissions(dst)
                .map_err(TreeError::destination_side(dst))?;
        }
    }

    Ok(stats)
}

fn copy_file(
    src_fs: &dyn Filesystem,
    src: &Path,
    dst_fs: &dyn Filesystem,
    dst: &Path,
    observer: &mut dyn TransferObserver,
) -> Result<u64, TreeError> {
    let (mut reader, total) = src_fs.open(src).map_err(TreeError::source_side(src))?;
    let mut writer = dst_fs.create(dst).map_err(TreeError::destination_side(dst))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut current = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TreeError::source_side(src)(e)),
        };
        writer
            .write_all(&buffer[..n])
            .map_err(TreeError::destination_side(dst))?;
        current += n as u64;
        observer.progress(current, total.max(current));
    }

    writer.flush().map_err(TreeError::destination_side(dst))?;
    Ok(current)
}

/// Removes `path` and everything below it, children before parents.
///
/// Callers announce the top-level path; descendants are removed silently.
pub fn remove_tree(fs: &dyn Filesystem, path: &Path) -> Result<TreeStats, TreeError> {
    let mut stats = TreeStats::default();

    if fs.is_dir(path).map_err(TreeError::source_side(path))? {
        let mut children = fs.list(path).map_err(TreeError::source_side(path))?;
        children.sort();

        for name in children {
            stats.add(remove_tree(fs, &path.join(&name))?);
        }

        fs.remove_dir(path).map_err(TreeError::source_side(path))?;
        stats.directories += 1;
    } else {
        fs.remove_file(path).map_err(TreeError::source_side(path))?;
        stats.files += 1;
    }

    Ok(stats)
}
