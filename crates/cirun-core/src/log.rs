//! The build log resource.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// File-backed log of one build attempt.
///
/// The executor owns the log and closes it. Backends receive cloned file
/// handles so child processes or log pumps can append without sharing the
/// owner.
#[derive(Debug)]
pub struct BuildLog {
    file: File,
    path: PathBuf,
}

impl BuildLog {
    /// Create (or truncate) the log at `path`.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A second handle to the same open file.
    pub fn writer(&self) -> io::Result<File> {
        self.file.try_clone()
    }

    /// A handle suitable as a child process' stdout or stderr.
    pub fn stdio(&self) -> io::Result<Stdio> {
        Ok(Stdio::from(self.writer()?))
    }

    /// Flush to disk and release the handle.
    pub fn close(mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

impl Write for BuildLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_shares_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");

        let mut log = BuildLog::create(&path).unwrap();
        log.write_all(b"first\n").unwrap();
        let mut writer = log.writer().unwrap();
        writer.write_all(b"second\n").unwrap();
        drop(writer);
        log.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_create_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");
        std::fs::write(&path, "stale").unwrap();

        let log = BuildLog::create(&path).unwrap();
        assert_eq!(log.path(), path.as_path());
        log.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
