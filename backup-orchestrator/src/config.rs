//! Configuration management for the backup orchestrator.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`BACKUP_ORCHESTRATOR_<SECTION>__<KEY>`, e.g.
//! `BACKUP_ORCHESTRATOR_REMOTE__HOST`). The result is immutable and handed to
//! each component when it is constructed.

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/backup-orchestrator/config.toml";
const ENV_PREFIX: &str = "BACKUP_ORCHESTRATOR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding one subdirectory per run
    pub backup_root: PathBuf,

    /// Directory receiving compressed archives (pushed to the remote)
    pub archive_store: PathBuf,

    /// Scratch area for archives being written
    pub work_dir: PathBuf,

    /// Lock sentinel guarding against concurrent runs
    pub lock_file: PathBuf,

    /// Directory for per-run log files
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Directories to mirror; their first-level git repositories are mirrored too
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// Repositories mirrored regardless of discovery
    #[serde(default)]
    pub repositories: Vec<PathBuf>,

    /// Filter rules for directory sync (file name, optional leading/trailing `*`)
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Login used for the reachability check and the transfer
    pub user: String,

    /// Remote address
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key; the SSH agent is used when unset
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Host keys trusted by both the reachability check and the transfer; defaults to
    /// `~/.ssh/known_hosts` of the running user
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,

    /// Destination directory on the remote host
    pub target_dir: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Minimum free space on the backup root, in GiB
    #[serde(default = "default_min_free_gb")]
    pub min_free_gb: u64,

    /// Days between two pushes unless forced
    #[serde(default = "default_push_interval_days")]
    pub push_interval_days: u64,

    #[serde(default)]
    pub archive_current: ArchiveCurrentPolicy,

    /// Delete a superseded snapshot even when its compression failed
    #[serde(default)]
    pub delete_on_compress_failure: bool,

    #[serde(default)]
    pub compression: CompressionKind,

    /// Compression level (1-9 for gzip, 1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

/// When the current run's snapshot is archived as well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCurrentPolicy {
    Always,
    #[default]
    Forced,
    Never,
}

impl ArchiveCurrentPolicy {
    pub fn applies(self, force: bool) -> bool {
        match self {
            ArchiveCurrentPolicy::Always => true,
            ArchiveCurrentPolicy::Forced => force,
            ArchiveCurrentPolicy::Never => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Gzip,
    Zstd,
}

impl CompressionKind {
    pub fn extension(self) -> &'static str {
        match self {
            CompressionKind::Gzip => "tar.gz",
            CompressionKind::Zstd => "tar.zst",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Prefix of every run name; defaults to the host name
    #[serde(default)]
    pub cycle: Option<String>,

    /// Exit non-zero when a best-effort step failed
    #[serde(default)]
    pub fail_on_step_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_git")]
    pub git: String,

    #[serde(default = "default_rsync")]
    pub rsync: String,

    #[serde(default = "default_ssh")]
    pub ssh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_min_free_gb() -> u64 {
    1
}

fn default_push_interval_days() -> u64 {
    30
}

fn default_compression_level() -> u32 {
    6
}

fn default_git() -> String {
    "git".to_string()
}

fn default_rsync() -> String {
    "rsync".to_string()
}

fn default_ssh() -> String {
    "ssh".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            min_free_gb: default_min_free_gb(),
            push_interval_days: default_push_interval_days(),
            archive_current: ArchiveCurrentPolicy::default(),
            delete_on_compress_failure: false,
            compression: CompressionKind::default(),
            compression_level: default_compression_level(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            rsync: default_rsync(),
            ssh: default_ssh(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("cannot read config file {}: {}", path.display(), e)
        })?;
        Self::load(&content, true)
    }

    /// Parse configuration from TOML text without environment overrides
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Self::load(content, false)
    }

    fn load(content: &str, with_env: bool) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(File::from_str(content, FileFormat::Toml));
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            );
        }
        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Run name prefix: the configured cycle or the sanitized host name
    pub fn cycle(&self) -> String {
        let raw = self.run.cycle.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "backup".to_string())
        });
        crate::utils::naming::sanitize_component(&raw)
    }

    /// Known hosts file shared by the reachability check and the transfer
    pub fn known_hosts_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.remote.known_hosts_file {
            return Some(path.clone());
        }
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(|| {
                nix::unistd::User::from_uid(nix::unistd::getuid())
                    .ok()
                    .flatten()
                    .map(|user| user.dir)
            })?;
        Some(home.join(".ssh/known_hosts"))
    }

    /// Connect timeout for the reachability check and the transfer
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.remote.connect_timeout_secs)
    }
}
