//! Attempt-scoped log files.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub path: PathBuf,
    pub description: String,
}

/// Log files owned by one attempt.
///
/// Files live under the task's log directory. The handle only records which
/// files belong to the attempt; it is closed when the attempt finishes and
/// refuses new files afterwards.
#[derive(Debug)]
pub struct AttemptLogs {
    directory: PathBuf,
    entries: Vec<LogEntry>,
    closed: bool,
}

impl AttemptLogs {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            entries: Vec::new(),
            closed: false,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Creates an empty log file and registers it.
    ///
    /// An existing file with the same name is kept; the new one gets a
    /// numeric suffix.
    pub fn create(&mut self, file_name: &str, description: &str) -> io::Result<PathBuf> {
        if self.closed {
            return Err(io::Error::other(format!(
                "log set in {} is already closed",
                self.directory.display()
            )));
        }
        fs::create_dir_all(&self.directory)?;
        let path = unique_path(&self.directory, file_name);
        fs::File::create(&path)?;
        self.entries.push(LogEntry {
            path: path.clone(),
            description: description.to_string(),
        });
        Ok(path)
    }

    /// Registers a file produced by someone else (e.g. a make target).
    pub fn add_file(&mut self, path: impl Into<PathBuf>, description: &str) {
        self.entries.push(LogEntry {
            path: path.into(),
            description: description.to_string(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn unique_path(directory: &Path, file_name: &str) -> PathBuf {
    let candidate = directory.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (file_name, String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = directory.join(format!("{stem}-{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Appends lines to a log file.
pub fn append_lines<I, S>(path: &Path, lines: I) -> io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        writeln!(file, "{}", line.as_ref())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_registers_entries_and_avoids_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = AttemptLogs::new(dir.path().join("t"));

        let first = logs.create("install.log", "Install log").unwrap();
        let second = logs.create("install.log", "Install log #2").unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("install-2.log"));
        assert_eq!(logs.entries().len(), 2);
        assert_eq!(logs.entries()[1].description, "Install log #2");
    }

    #[test]
    fn closed_logs_refuse_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = AttemptLogs::new(dir.path());
        logs.close();
        assert!(logs.create("x.log", "x").is_err());
    }

    #[test]
    fn append_lines_writes_each_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        append_lines(&path, ["a", "b"]).unwrap();
        append_lines(&path, vec!["c".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
    }
}
