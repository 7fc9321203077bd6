//! Append-only JSON-lines log of accepted operations
//!
//! Each line is one [`OperationEvent`]. Folding the lines in order over a
//! fresh [`Data`](quire_editor::Data) reproduces the session state.

use crate::errors::LogError;
use crate::session::OperationEvent;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub struct OperationLog {
    path: PathBuf,
    file: File,
}

impl OperationLog {
    /// Open for appending, creating the file and its directory if needed
    pub fn open(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn append(&mut self, event: &OperationEvent) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(event).map_err(LogError::Encode)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every event from a log file. Blank lines are ignored.
pub fn read_events(path: &Path) -> Result<Vec<OperationEvent>, LogError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| LogError::Parse {
            line: index + 1,
            source,
        })?;
        events.push(event);
    }

    Ok(events)
}
