use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/usync/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsyncConfig {
    /// Size of one file segment in bytes.
    pub segment_size: usize,
    /// Maximum size of one pack container article in bytes.
    pub pack_size: usize,
    /// Compress a segment only if the deflated size is below this fraction of the raw size.
    pub compression_threshold: f64,
    /// Number of replica copies posted per segment (0 = originals only, max 15).
    pub redundancy_level: u8,
    /// Concurrent upload workers.
    pub upload_workers: usize,
    /// Concurrent download workers.
    pub download_workers: usize,
    /// Concurrent file-hashing workers during a scan.
    pub scanner_workers: usize,
    /// Attempts per task before it is marked failed.
    pub max_retries: u32,
    /// Newsgroups used for posting.
    pub newsgroups: Vec<String>,
    /// File/directory names skipped by the scanner. A leading dot entry
    /// (".*") skips all dot-prefixed names.
    pub skip_patterns: Vec<String>,
    /// Admission blocks when pending tasks exceed `queue_high_water * workers`.
    pub queue_high_water: usize,
}

impl Default for UsyncConfig {
    fn default() -> Self {
        Self {
            segment_size: 768 * 1024,
            pack_size: 50 * 1024 * 1024,
            compression_threshold: 0.9,
            redundancy_level: 0,
            upload_workers: 4,
            download_workers: 4,
            scanner_workers: 8,
            max_retries: 3,
            newsgroups: vec!["alt.binaries.misc".to_string()],
            skip_patterns: vec![
                ".*".to_string(),
                "__pycache__".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
            queue_high_water: 10,
        }
    }
}

impl UsyncConfig {
    /// Clamp values that have hard limits (redundancy, worker counts).
    pub fn sanitized(mut self) -> Self {
        self.redundancy_level = self.redundancy_level.min(15);
        self.upload_workers = self.upload_workers.max(1);
        self.download_workers = self.download_workers.max(1);
        self.scanner_workers = self.scanner_workers.max(1);
        self.segment_size = self.segment_size.max(1);
        self
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("usync")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<UsyncConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = UsyncConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: UsyncConfig = toml::from_str(&data)?;
    Ok(cfg.sanitized())
}
