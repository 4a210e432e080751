//! Configuration models for audiorelay.
//!
//! Every tunable of the pipeline lives here and is resolved from a TOML
//! file, with CLI flags applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for audiorelay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// External acquisition tool settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Remote transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Catalog availability filter settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Driver settings (concurrency, checkpoint, circuit breaker)
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Watch-mode settings
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Acquisition tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Program to invoke (path or name on PATH)
    #[serde(default = "default_acquisition_program")]
    pub program: String,

    /// Directory artifacts are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Format selector
    #[serde(default = "default_format")]
    pub format: String,

    /// Container the audio is transcoded into; also the artifact extension
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// Transcoding quality (0 = best)
    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,

    /// URL built from an identifier; `{id}` is substituted
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// Extractor player client
    #[serde(default = "default_player_client")]
    pub player_client: String,

    /// Exclude live streams
    #[serde(default = "default_true")]
    pub skip_live: bool,

    /// Cookie bundle passed through to the tool
    #[serde(default)]
    pub cookies: Option<PathBuf>,

    /// Extra arguments appended before the URL
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_acquisition_program() -> String {
    "yt-dlp".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("wavs")
}

fn default_format() -> String {
    "bestaudio/best".to_string()
}

fn default_audio_format() -> String {
    "wav".to_string()
}

fn default_audio_quality() -> String {
    "0".to_string()
}

fn default_url_template() -> String {
    "https://www.youtube.com/watch?v={id}".to_string()
}

fn default_player_client() -> String {
    "web".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            program: default_acquisition_program(),
            output_dir: default_output_dir(),
            format: default_format(),
            audio_format: default_audio_format(),
            audio_quality: default_audio_quality(),
            url_template: default_url_template(),
            player_client: default_player_client(),
            skip_live: true,
            cookies: None,
            extra_args: Vec::new(),
        }
    }
}

/// Remote transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Sync program to invoke
    #[serde(default = "default_transfer_program")]
    pub program: String,

    /// Remote destination (e.g. "host:/scratch/wavs/")
    #[serde(default)]
    pub destination: String,

    /// Bandwidth cap in KiB/s
    #[serde(default = "default_bwlimit")]
    pub bwlimit_kbps: u32,

    /// SSH identity file for the remote shell
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,

    /// Extra arguments inserted before the source path
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_transfer_program() -> String {
    "rsync".to_string()
}

fn default_bwlimit() -> u32 {
    20_000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            program: default_transfer_program(),
            destination: String::new(),
            bwlimit_kbps: default_bwlimit(),
            ssh_key: None,
            extra_args: Vec::new(),
        }
    }
}

/// Catalog availability filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Skip identifiers already present in the catalog
    #[serde(default)]
    pub enabled: bool,

    /// Lookup attempts before failing open
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Search API base URL
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,

    /// Client name sent in the request context
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Client version sent in the request context
    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// Request timeout in seconds
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
}

fn default_attempts() -> u32 {
    5
}

fn default_catalog_base_url() -> String {
    "https://music.youtube.com/youtubei/v1".to_string()
}

fn default_client_name() -> String {
    "WEB_REMIX".to_string()
}

fn default_client_version() -> String {
    "1.20240403.01.00".to_string()
}

fn default_catalog_timeout() -> u64 {
    30
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            attempts: default_attempts(),
            base_url: default_catalog_base_url(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            timeout_secs: default_catalog_timeout(),
        }
    }
}

/// Pipeline driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent jobs (1 = sequential)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Checkpoint file of fully relayed identifiers
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Flush the checkpoint every N settled jobs
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Consecutive failures that abort the run
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Lower bound of the pause after a relayed job
    #[serde(default = "default_delay_min")]
    pub delay_min_secs: f64,

    /// Upper bound of the pause after a relayed job
    #[serde(default = "default_delay_max")]
    pub delay_max_secs: f64,
}

fn default_workers() -> usize {
    1
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("collected_ids.txt")
}

fn default_flush_every() -> usize {
    20
}

fn default_failure_threshold() -> u32 {
    50
}

fn default_delay_min() -> f64 {
    2.0
}

fn default_delay_max() -> f64 {
    6.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            checkpoint_path: default_checkpoint_path(),
            flush_every: default_flush_every(),
            failure_threshold: default_failure_threshold(),
            delay_min_secs: default_delay_min(),
            delay_max_secs: default_delay_max(),
        }
    }
}

/// Watch-mode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory to observe
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Observe subdirectories too
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: None,
            recursive: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text and expand environment references.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.expand();
        Ok(config)
    }

    /// Expand `${VAR}` and `~/` in every user-supplied path and the destination.
    fn expand(&mut self) {
        self.transfer.destination = expand_env_vars(&self.transfer.destination);
        self.acquisition.output_dir = expand_path(&self.acquisition.output_dir);
        self.acquisition.cookies = self.acquisition.cookies.as_deref().map(expand_path);
        self.transfer.ssh_key = self.transfer.ssh_key.as_deref().map(expand_path);
        self.pipeline.checkpoint_path = expand_path(&self.pipeline.checkpoint_path);
        self.watch.directory = self.watch.directory.as_deref().map(expand_path);
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.destination.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "transfer.destination must be set".to_string(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        if self.pipeline.flush_every == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.flush_every must be at least 1".to_string(),
            ));
        }
        if self.pipeline.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.catalog.attempts == 0 {
            return Err(ConfigError::Invalid(
                "catalog.attempts must be at least 1".to_string(),
            ));
        }
        let (min, max) = (self.pipeline.delay_min_secs, self.pipeline.delay_max_secs);
        if !(min >= 0.0 && max >= min && max <= MAX_DELAY_SECS) {
            return Err(ConfigError::Invalid(format!(
                "pipeline delay range [{min}, {max}] is invalid"
            )));
        }
        Ok(())
    }
}

/// Longest polite delay accepted from configuration.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    re.replace_all(s, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
    })
    .into_owned()
}

/// Expand environment variables and a leading `~/` in a path.
pub fn expand_path(path: &Path) -> PathBuf {
    let expanded = expand_env_vars(&path.to_string_lossy());
    match (expanded.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(expanded),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_documented_values() {
        let config = Config::from_toml("[transfer]\ndestination = \"host:/wavs/\"\n").unwrap();
        assert_eq!(config.acquisition.program, "yt-dlp");
        assert_eq!(config.acquisition.audio_format, "wav");
        assert_eq!(config.transfer.bwlimit_kbps, 20_000);
        assert_eq!(config.catalog.attempts, 5);
        assert!(!config.catalog.enabled);
        assert_eq!(config.pipeline.flush_every, 20);
        assert_eq!(config.pipeline.failure_threshold, 50);
        assert_eq!(config.pipeline.workers, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_destination_is_invalid() {
        let config = Config::from_toml("").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_inverted_delay_range_is_invalid() {
        let config = Config::from_toml(
            "[transfer]\ndestination = \"h:/\"\n[pipeline]\ndelay_min_secs = 5.0\ndelay_max_secs = 1.0\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_delay_is_invalid() {
        let config = Config::from_toml(
            "[transfer]\ndestination = \"h:/\"\n[pipeline]\ndelay_max_secs = 1e20\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        let config =
            Config::from_toml("[transfer]\ndestination = \"h:/\"\n[pipeline]\nworkers = 0\n")
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_var_expansion_leaves_unknown_placeholders() {
        // SAFETY: tests in this module do not read this variable concurrently.
        unsafe { std::env::set_var("AUDIORELAY_TEST_HOST", "scratch") };
        assert_eq!(
            expand_env_vars("${AUDIORELAY_TEST_HOST}:/wavs/${AUDIORELAY_UNSET_VAR}"),
            "scratch:/wavs/${AUDIORELAY_UNSET_VAR}"
        );
    }

    #[test]
    fn test_parse_error_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline\nworkers = 2").unwrap();
        match Config::from_file(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
