//! Scripted stand-ins for the external tools, used by unit tests.

use crate::client::{Acquire, CatalogSearch, Transport};
use crate::models::{Identifier, RelayError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Catalog that replays a fixed script of responses, or lists fixed identifiers.
pub struct ScriptedCatalog {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    listed: Option<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedCatalog {
    /// Replay `script` in order; errors once it runs out.
    pub fn new(script: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            listed: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    /// Answer every query, listing exactly `ids` as catalogued.
    pub fn listing(ids: &[&str]) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            listed: Some(ids.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSearch for ScriptedCatalog {
    async fn search(&self, query: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(listed) = &self.listed {
            let id = query.trim_start_matches("inurl:");
            return Ok(if listed.contains(id) {
                format!(r#"{{"url": "https://i.ytimg.com/vi/{id}/hq.jpg"}}"#)
            } else {
                r#"{"contents": []}"#.to_string()
            });
        }

        match self.script.lock().pop_front() {
            Some(Ok(body)) => Ok(body),
            Some(Err(e)) => Err(RelayError::Catalog(e)),
            None => Err(RelayError::Catalog("script exhausted".to_string())),
        }
    }
}

enum AcquireMode {
    Create(String),
    Silent,
    Fail,
}

/// Acquisition tool that writes an empty artifact, writes nothing, or fails.
pub struct FakeAcquirer {
    mode: AcquireMode,
    fail_ids: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeAcquirer {
    fn with_mode(mode: AcquireMode) -> Self {
        Self {
            mode,
            fail_ids: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create `<dir>/<id>.<ext>` for every identifier.
    pub fn succeeding(extension: &str) -> Self {
        Self::with_mode(AcquireMode::Create(extension.to_string()))
    }

    /// Report success without producing a file.
    pub fn silent() -> Self {
        Self::with_mode(AcquireMode::Silent)
    }

    pub fn failing() -> Self {
        Self::with_mode(AcquireMode::Fail)
    }

    /// Fail only for `ids`.
    pub fn failing_for(mut self, ids: &[&str]) -> Self {
        self.fail_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Identifiers fetched so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Acquire for FakeAcquirer {
    async fn acquire(&self, identifier: &Identifier, output_dir: &Path) -> Result<()> {
        self.calls.lock().push(identifier.to_string());

        if self.fail_ids.contains(identifier.as_str()) {
            return Err(RelayError::Acquisition {
                identifier: identifier.to_string(),
                cause: "scripted failure".to_string(),
            });
        }

        match &self.mode {
            AcquireMode::Create(ext) => {
                let path = output_dir.join(format!("{identifier}.{ext}"));
                tokio::fs::write(&path, b"RIFF")
                    .await
                    .map_err(|e| RelayError::io("writing fake artifact", e))
            }
            AcquireMode::Silent => Ok(()),
            AcquireMode::Fail => Err(RelayError::Acquisition {
                identifier: identifier.to_string(),
                cause: "scripted failure".to_string(),
            }),
        }
    }
}

/// Transport that records every sync and succeeds or fails on demand.
pub struct FakeTransport {
    fail: bool,
    /// Cancelled while a sync is in flight
    cancel: Option<CancellationToken>,
    synced: Mutex<Vec<PathBuf>>,
}

impl FakeTransport {
    pub fn succeeding() -> Self {
        Self {
            fail: false,
            cancel: None,
            synced: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::succeeding()
        }
    }

    /// Succeed, but cancel `token` during every sync, as an interrupt
    /// arriving mid-relay would.
    pub fn cancelling(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> usize {
        self.synced.lock().len()
    }

    pub fn synced(&self) -> Vec<PathBuf> {
        self.synced.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn sync(&self, path: &Path, _destination: &str) -> Result<()> {
        self.synced.lock().push(path.to_path_buf());
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        if self.fail {
            Err(RelayError::Relay {
                path: path.to_path_buf(),
                cause: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
