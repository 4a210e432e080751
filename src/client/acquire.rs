//! Acquisition: resolve an identifier to a local audio artifact.
//!
//! The external tool writes `<output_dir>/<identifier>.<ext>`. It runs with
//! per-item error isolation, so its exit status alone does not decide the
//! outcome; the artifact on disk does.

use crate::client::process::run_tool;
use crate::models::{AcquisitionConfig, Identifier, RelayError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// Invocation contract of the external acquisition tool.
///
/// Implementations may hold state that is unsafe to share; the driver only
/// ever calls through `&self`, so such an implementation must serialize
/// internally or be created per worker.
#[async_trait]
pub trait Acquire: Send + Sync {
    /// Fetch `identifier` into `output_dir`.
    ///
    /// `Err` means the tool itself reported failure or could not run.
    async fn acquire(&self, identifier: &Identifier, output_dir: &Path) -> Result<()>;
}

/// yt-dlp driven as a subprocess, one process per identifier.
pub struct YtDlp {
    config: AcquisitionConfig,
}

impl YtDlp {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for one identifier.
    fn args(&self, identifier: &Identifier, output_dir: &Path) -> Vec<OsString> {
        let cfg = &self.config;
        let mut args: Vec<OsString> = vec![
            "--format".into(),
            cfg.format.clone().into(),
            "--output".into(),
            output_dir.join("%(id)s.%(ext)s").into_os_string(),
            "--no-playlist".into(),
            "--ignore-errors".into(),
            "--no-warnings".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            cfg.audio_format.clone().into(),
            "--audio-quality".into(),
            cfg.audio_quality.clone().into(),
            "--extractor-args".into(),
            format!("youtube:player_client={}", cfg.player_client).into(),
        ];

        if cfg.skip_live {
            args.push("--match-filter".into());
            args.push("!is_live".into());
        }

        if let Some(cookies) = &cfg.cookies {
            args.push("--cookies".into());
            args.push(cookies.clone().into_os_string());
        }

        args.extend(cfg.extra_args.iter().map(OsString::from));
        args.push(cfg.url_template.replace("{id}", identifier.as_str()).into());
        args
    }
}

#[async_trait]
impl Acquire for YtDlp {
    async fn acquire(&self, identifier: &Identifier, output_dir: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.args(identifier, output_dir));

        let output = run_tool(&self.config.program, &mut cmd).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RelayError::Acquisition {
                identifier: identifier.to_string(),
                cause: output.describe_failure(),
            })
        }
    }
}

/// Fetches one identifier and locates the resulting artifact.
pub struct AcquisitionWorker {
    tool: Arc<dyn Acquire>,
    output_dir: PathBuf,
    extension: String,
}

impl AcquisitionWorker {
    pub fn new(tool: Arc<dyn Acquire>, output_dir: PathBuf, extension: impl Into<String>) -> Self {
        Self {
            tool,
            output_dir,
            extension: extension.into(),
        }
    }

    /// Fetch `identifier`, returning the artifact path.
    ///
    /// A tool that reports success but leaves no artifact is a failure
    /// (`MissingArtifact`), same as a tool error.
    pub async fn fetch(&self, identifier: &Identifier) -> Result<PathBuf> {
        let tool_result = self.tool.acquire(identifier, &self.output_dir).await;

        match (locate_artifact(&self.output_dir, identifier, &self.extension), tool_result) {
            (Some(path), Ok(())) => {
                info!(identifier = %identifier, path = %path.display(), "Fetched");
                Ok(path)
            }
            (Some(path), Err(e)) => {
                warn!(
                    identifier = %identifier,
                    error = %e,
                    "Tool reported an error but produced an artifact"
                );
                Ok(path)
            }
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Err(RelayError::MissingArtifact {
                identifier: identifier.to_string(),
            }),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Artifact for `identifier` in `dir`.
///
/// `<dir>/<identifier>.<ext>` wins. Otherwise the first file, in
/// lexicographic order, named `<identifier>.f<format>.<ext>` (the tool's
/// per-format intermediate naming). Files of other identifiers never
/// match, even when their name starts with `identifier`.
pub fn locate_artifact(dir: &Path, identifier: &Identifier, extension: &str) -> Option<PathBuf> {
    let exact = dir.join(format!("{identifier}.{extension}"));
    if exact.is_file() {
        return Some(exact);
    }

    let pattern = format!(
        "{}/{}.*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(identifier.as_str()),
        glob::Pattern::escape(extension)
    );

    let mut matches: Vec<PathBuf> = glob::glob(&pattern)
        .ok()?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| is_format_variant(stem, identifier.as_str()))
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Whether `stem` is `<identifier>.f<format id>`.
fn is_format_variant(stem: &str, identifier: &str) -> bool {
    stem.strip_prefix(identifier)
        .and_then(|rest| rest.strip_prefix(".f"))
        .is_some_and(|format| {
            !format.is_empty() && format.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAcquirer;
    use std::fs;
    use tempfile::TempDir;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_created_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let worker = AcquisitionWorker::new(
            Arc::new(FakeAcquirer::succeeding("wav")),
            temp_dir.path().to_path_buf(),
            "wav",
        );

        let path = worker.fetch(&id("abc")).await.unwrap();
        assert_eq!(path, temp_dir.path().join("abc.wav"));
    }

    #[tokio::test]
    async fn test_success_without_artifact_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let worker = AcquisitionWorker::new(
            Arc::new(FakeAcquirer::silent()),
            temp_dir.path().to_path_buf(),
            "wav",
        );

        let err = worker.fetch(&id("abc")).await.unwrap_err();
        assert!(matches!(err, RelayError::MissingArtifact { .. }));
    }

    #[tokio::test]
    async fn test_tool_error_without_artifact_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let worker = AcquisitionWorker::new(
            Arc::new(FakeAcquirer::failing()),
            temp_dir.path().to_path_buf(),
            "wav",
        );

        let err = worker.fetch(&id("abc")).await.unwrap_err();
        assert!(matches!(err, RelayError::Acquisition { .. }));
    }

    #[test]
    fn test_locate_ignores_other_extensions_and_ids() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("abc.webm"), b"").unwrap();
        fs::write(temp_dir.path().join("abd.wav"), b"").unwrap();
        assert!(locate_artifact(temp_dir.path(), &id("abc"), "wav").is_none());

        fs::write(temp_dir.path().join("abc.wav"), b"").unwrap();
        assert_eq!(
            locate_artifact(temp_dir.path(), &id("abc"), "wav"),
            Some(temp_dir.path().join("abc.wav"))
        );
    }

    #[test]
    fn test_locate_never_claims_a_longer_identifier() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("abcd.wav"), b"").unwrap();
        fs::write(temp_dir.path().join("abc-x.wav"), b"").unwrap();
        fs::write(temp_dir.path().join("abc.extra.wav"), b"").unwrap();
        assert!(locate_artifact(temp_dir.path(), &id("abc"), "wav").is_none());

        fs::write(temp_dir.path().join("abc.f251.wav"), b"").unwrap();
        assert_eq!(
            locate_artifact(temp_dir.path(), &id("abc"), "wav"),
            Some(temp_dir.path().join("abc.f251.wav"))
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_ignores_file_of_prefixed_identifier() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("abcd.wav"), b"RIFF").unwrap();
        let worker = AcquisitionWorker::new(
            Arc::new(FakeAcquirer::failing()),
            temp_dir.path().to_path_buf(),
            "wav",
        );

        let err = worker.fetch(&id("abc")).await.unwrap_err();
        assert!(matches!(err, RelayError::Acquisition { .. }));
        assert!(temp_dir.path().join("abcd.wav").exists());
    }

    #[test]
    fn test_locate_escapes_glob_metacharacters() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a-b.wav"), b"").unwrap();
        assert!(locate_artifact(temp_dir.path(), &id("[a]-b"), "wav").is_none());
    }

    #[test]
    fn test_ytdlp_args_carry_cookies_and_filters() {
        let config = AcquisitionConfig {
            cookies: Some(PathBuf::from("/tmp/cookies.txt")),
            ..AcquisitionConfig::default()
        };
        let args: Vec<String> = YtDlp::new(config)
            .args(&id("abc"), Path::new("/out"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["--format", "bestaudio/best"]));
        assert!(args.windows(2).any(|w| w == ["--audio-format", "wav"]));
        assert!(args.windows(2).any(|w| w == ["--match-filter", "!is_live"]));
        assert!(args.windows(2).any(|w| w == ["--cookies", "/tmp/cookies.txt"]));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"/out/%(id)s.%(ext)s".to_string()));
        assert_eq!(
            args.last().unwrap(),
            "https://www.youtube.com/watch?v=abc"
        );
    }
}
