//! Watch-triggered relay.
//!
//! Instead of pulling identifiers, react to artifacts appearing on disk
//! and relay each one as soon as it materializes, however it was created.
//! There is no checkpoint and no breaker: a relayed file is deleted, so
//! the same path only comes back if a new file is written there.

use crate::client::TransferSink;
use crate::models::Result;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Unbounded, non-restartable sequence of newly materialized artifact paths.
pub struct CreationEvents {
    rx: mpsc::UnboundedReceiver<PathBuf>,
    /// Keeps the OS subscription alive; dropping it stops observation.
    _watcher: Option<RecommendedWatcher>,
}

impl CreationEvents {
    /// Observe `dir` for new files with `extension`.
    pub fn watch(dir: &Path, recursive: bool, extension: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let wanted = extension.to_string();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in materialized_paths(&event, &wanted) {
                    // Receiver gone means the consumer stopped; nothing to do.
                    let _ = tx.send(path);
                }
            }
            Err(e) => warn!(error = %e, "Filesystem watch error"),
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(dir, mode)?;

        info!(dir = %dir.display(), recursive, "Watching for new .{} files", extension);
        Ok(Self {
            rx,
            _watcher: Some(watcher),
        })
    }

    /// Events fed from an existing channel instead of the filesystem.
    pub fn from_channel(rx: mpsc::UnboundedReceiver<PathBuf>) -> Self {
        Self { rx, _watcher: None }
    }

    /// Next materialized path, or `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }
}

/// Paths in `event` that are newly present files with `extension`.
///
/// Plain creation and rename-into-place both count.
fn materialized_paths(event: &Event, extension: &str) -> Vec<PathBuf> {
    let candidates: Vec<&PathBuf> = match &event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().into_iter().collect()
        }
        _ => Vec::new(),
    };

    candidates
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == extension))
        .filter(|p| !p.is_dir())
        .cloned()
        .collect()
}

/// Counters for a watch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub relayed: usize,
    pub failed: usize,
}

/// Relays every artifact announced by a [`CreationEvents`] subscription.
pub struct WatchPipeline {
    sink: TransferSink,
}

impl WatchPipeline {
    pub fn new(sink: TransferSink) -> Self {
        Self { sink }
    }

    /// Relay events one at a time, in arrival order, until `cancel` fires
    /// or the event source ends.
    ///
    /// A relay already running when `cancel` fires is finished first.
    pub async fn run(&self, mut events: CreationEvents, cancel: CancellationToken) -> WatchStats {
        let mut stats = WatchStats::default();

        loop {
            let path = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stop requested, no longer watching");
                    break;
                }
                next = events.next() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            info!(path = %path.display(), "Detected new artifact");
            match self.sink.relay(&path).await {
                Ok(()) => stats.relayed += 1,
                Err(_) => stats.failed += 1,
            }
        }

        info!(relayed = stats.relayed, failed = stats.failed, "Watch stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use notify::event::DataChange;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn wait_until_gone(path: &Path) {
        for _ in 0..500 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} was never relayed", path.display());
    }

    #[tokio::test]
    async fn test_same_path_twice_is_relayed_twice() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x.wav");
        let transport = Arc::new(FakeTransport::succeeding());
        let pipeline = WatchPipeline::new(TransferSink::new(transport.clone(), "remote:/wavs/"));

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            pipeline
                .run(CreationEvents::from_channel(rx), CancellationToken::new())
                .await
        });

        fs::write(&path, b"RIFF").unwrap();
        tx.send(path.clone()).unwrap();
        wait_until_gone(&path).await;

        fs::write(&path, b"RIFF").unwrap();
        tx.send(path.clone()).unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.relayed, 2);
        assert_eq!(transport.synced(), vec![path.clone(), path.clone()]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_relay_keeps_file_and_continues() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("y.wav");
        fs::write(&path, b"RIFF").unwrap();

        let pipeline = WatchPipeline::new(TransferSink::new(
            Arc::new(FakeTransport::failing()),
            "remote:/wavs/",
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(path.clone()).unwrap();
        drop(tx);

        let stats = pipeline
            .run(CreationEvents::from_channel(rx), CancellationToken::new())
            .await;
        assert_eq!(stats, WatchStats { relayed: 0, failed: 1 });
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_cancel_stops_observing() {
        let pipeline = WatchPipeline::new(TransferSink::new(
            Arc::new(FakeTransport::succeeding()),
            "remote:/wavs/",
        ));
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = pipeline.run(CreationEvents::from_channel(rx), cancel).await;
        assert_eq!(stats, WatchStats::default());
    }

    #[tokio::test]
    async fn test_watcher_reports_new_file_in_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        let mut events = CreationEvents::watch(temp_dir.path(), true, "wav").unwrap();

        fs::write(nested.join("skip.part"), b"").unwrap();
        fs::write(nested.join("z.wav"), b"RIFF").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("no creation event within 5s")
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "z.wav");
    }

    #[test]
    fn test_only_new_matching_files_count() {
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/w/a.wav"))
            .add_path(PathBuf::from("/w/a.part"));
        assert_eq!(materialized_paths(&created, "wav"), vec![PathBuf::from("/w/a.wav")]);

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/b.temp.wav"))
            .add_path(PathBuf::from("/w/b.wav"));
        assert_eq!(materialized_paths(&renamed, "wav"), vec![PathBuf::from("/w/b.wav")]);

        let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/w/c.wav"));
        assert!(materialized_paths(&written, "wav").is_empty());

        let folder = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/w/d.wav"));
        assert!(materialized_paths(&folder, "wav").is_empty());
    }
}
