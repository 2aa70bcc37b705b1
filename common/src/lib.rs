/*!
common/src/lib.rs

Shared configuration types and archive store helpers for Gazette.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader with default-file + override-file merging
- The feed source catalog and canonical article record types
- Helpers to load and atomically persist the JSON archive artifacts
*/

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One entry of the feed source catalog (`[[sources]]` in config TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    /// Human-readable publication name, e.g. "The Weekly Ledger"
    pub name: String,
    /// RSS/Atom endpoint URL
    pub url: String,
    /// Stable short identifier, e.g. "weekly-ledger"
    pub slug: String,
    /// Editorial category, e.g. "tech", "politics"
    pub category: String,
    /// Byline to use when the feed item carries no author
    pub author: Option<String>,
}

impl FeedSource {
    /// Host portion of the endpoint URL, lowercased. None for unparseable URLs.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }
}

/// Throttling / politeness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum seconds between two requests to the same host
    pub host_spacing_seconds: Option<u64>,
    /// Minimum seconds between two requests to *any* host of the defensive class
    pub defensive_spacing_seconds: Option<u64>,
    /// Host suffixes whose provider rate-limits across its whole customer base
    #[serde(default)]
    pub defensive_hosts: Vec<String>,
    /// Interleave one defensive-class source after this many general sources
    pub interleave_every: Option<usize>,
}

impl ThrottleConfig {
    pub fn host_spacing(&self) -> Duration {
        Duration::from_secs(self.host_spacing_seconds.unwrap_or(2))
    }

    pub fn defensive_spacing(&self) -> Duration {
        Duration::from_secs(self.defensive_spacing_seconds.unwrap_or(20))
    }

    pub fn interleave_every(&self) -> usize {
        self.interleave_every.unwrap_or(4).max(1)
    }
}

/// Retry / backoff configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_seconds: Option<u64>,
    pub multiplier: Option<u32>,
    pub cap_seconds: Option<u64>,
    /// Total attempts per source, first try included
    pub max_attempts: Option<u32>,
    /// Skip-list cooldown after a source exhausts its budget on rate limits
    pub skip_cooldown_seconds: Option<u64>,
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_secs(self.base_seconds.unwrap_or(2))
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier.unwrap_or(2).max(1)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_secs(self.cap_seconds.unwrap_or(60))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3).max(1)
    }

    pub fn skip_cooldown(&self) -> Duration {
        Duration::from_secs(self.skip_cooldown_seconds.unwrap_or(2 * 60 * 60))
    }
}

/// Fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: Option<u64>,
    /// Per-source ceiling on parsed items; newest items are kept when a payload is larger
    pub max_items_per_source: Option<usize>,
    /// Upper bound of the randomized addition to each clearance wait
    pub jitter_millis: Option<u64>,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(10))
    }

    pub fn max_items_per_source(&self) -> usize {
        self.max_items_per_source.unwrap_or(25).max(1)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_millis.unwrap_or(250))
    }
}

/// Archive artifact configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory holding archive.json and display.json (e.g. "data")
    pub dir: Option<String>,
    /// Size of the bounded display set
    pub display_limit: Option<usize>,
}

impl ArchiveConfig {
    pub fn dir(&self) -> PathBuf {
        PathBuf::from(self.dir.as_deref().unwrap_or("data"))
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir().join("archive.json")
    }

    pub fn display_path(&self) -> PathBuf {
        self.dir().join("display.json")
    }

    pub fn display_limit(&self) -> usize {
        self.display_limit.unwrap_or(500).max(1)
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<FeedSource>,
    pub throttle: Option<ThrottleConfig>,
    pub backoff: Option<BackoffConfig>,
    pub fetch: Option<FetchConfig>,
    pub archive: Option<ArchiveConfig>,
}

impl Config {
    pub fn throttle(&self) -> ThrottleConfig {
        self.throttle.clone().unwrap_or_default()
    }

    pub fn backoff(&self) -> BackoffConfig {
        self.backoff.clone().unwrap_or_default()
    }

    pub fn fetch(&self) -> FetchConfig {
        self.fetch.clone().unwrap_or_default()
    }

    pub fn archive(&self) -> ArchiveConfig {
        self.archive.clone().unwrap_or_default()
    }

    /// Load configuration from a TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Publication metadata embedded in every article record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub name: String,
    pub slug: String,
    pub category: String,
}

/// Canonical article record. Created once on first successful parse of an
/// item and never mutated afterwards; `id` is a pure function of the source
/// slug and the item's link-or-guid-or-title, stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub title: String,
    pub canonical_link: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub content: String,
    pub excerpt: String,
    pub word_count: usize,
    pub read_time_minutes: u32,
    pub is_paid: bool,
    pub publication: Publication,
    /// URL-safe title slug, never empty (falls back to the record id)
    pub slug: String,
}

/// Unbounded archive artifact: id-keyed, monotonically growing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveFile {
    #[serde(default)]
    pub articles: BTreeMap<String, ArticleRecord>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_articles: usize,
}

/// Bounded display artifact: the N most recent records, recomputed each run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayFile {
    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_articles: usize,
}

/// Load the archive artifact. A missing file yields an empty archive; a
/// present-but-unparseable file is an error (run-fatal for the caller),
/// never silently replaced.
pub async fn load_archive(path: &Path) -> Result<ArchiveFile> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => {
            let archive: ArchiveFile = serde_json::from_str(&data)
                .with_context(|| format!("Archive file is corrupt: {}", path.display()))?;
            Ok(archive)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ArchiveFile::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read archive: {}", path.display())),
    }
}

pub async fn save_archive(path: &Path, archive: &ArchiveFile) -> Result<()> {
    let data = serde_json::to_vec_pretty(archive).context("Failed to serialize archive")?;
    write_atomic(path, &data).await
}

pub async fn save_display(path: &Path, display: &DisplayFile) -> Result<()> {
    let data = serde_json::to_vec_pretty(display).context("Failed to serialize display set")?;
    write_atomic(path, &data).await
}

/// Write via temp file + rename so an interrupted run never leaves a
/// half-written artifact behind.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data)
        .await
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace artifact: {}", path.display()))?;
    Ok(())
}
