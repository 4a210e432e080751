//! Checkpoint store for resumable runs.
//!
//! The checkpoint is the set of identifiers whose artifacts have been
//! relayed. On disk it is a sorted, newline-delimited file that every
//! flush rewrites in full (write-then-rename), so a torn write from a
//! crashed run is replaced by the next successful flush.

use crate::models::{Identifier, RelayError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Durable set of fully processed identifiers.
#[derive(Debug)]
pub struct CheckpointStore {
    /// Path to the checkpoint file
    path: PathBuf,
    /// Identifiers known to be relayed
    done: BTreeSet<Identifier>,
    /// Entries recorded since the last flush
    unflushed: usize,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`. A missing file is an empty checkpoint.
    pub fn load(path: &Path) -> Result<Self> {
        let done = match fs::read_to_string(path) {
            Ok(content) => content.lines().filter_map(Identifier::parse).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(RelayError::io("reading checkpoint", e)),
        };

        let store = Self {
            path: path.to_path_buf(),
            done,
            unflushed: 0,
        };

        if !store.done.is_empty() {
            info!(
                path = %path.display(),
                collected = store.done.len(),
                "Resuming from checkpoint"
            );
        }
        Ok(store)
    }

    /// Whether `identifier` was relayed in this or an earlier run.
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.done.contains(identifier)
    }

    /// Record a relayed identifier. The set never shrinks.
    pub fn record(&mut self, identifier: Identifier) {
        if self.done.insert(identifier) {
            self.unflushed += 1;
        }
    }

    /// Write the full set, sorted, replacing the previous file.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| RelayError::io("creating checkpoint dir", e))?;
        }

        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        {
            let file = fs::File::create(&temp_path)
                .map_err(|e| RelayError::io("creating temp checkpoint", e))?;
            let mut writer = BufWriter::new(file);
            for identifier in &self.done {
                writeln!(writer, "{identifier}")
                    .map_err(|e| RelayError::io("writing temp checkpoint", e))?;
            }
            let file = writer
                .into_inner()
                .map_err(|e| RelayError::io("flushing temp checkpoint", e.into_error()))?;
            file.sync_all()
                .map_err(|e| RelayError::io("syncing temp checkpoint", e))?;
        }

        // Atomic rename
        fs::rename(&temp_path, &self.path)
            .map_err(|e| RelayError::io("renaming checkpoint", e))?;

        debug!(
            path = %self.path.display(),
            collected = self.done.len(),
            new = self.unflushed,
            "Checkpoint saved"
        );
        self.unflushed = 0;
        Ok(())
    }

    /// Number of recorded identifiers.
    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Entries recorded since the last flush.
    pub fn unflushed(&self) -> usize {
        self.unflushed
    }

    /// Get checkpoint path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
