//! Config module.
//! Reads `guildboard.json` (or the `--config` path) with serde; a missing file
//! means defaults. Environment variables win over the file so secrets can stay
//! out of it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::RestStore;

pub const DEFAULT_PATH: &str = "guildboard.json";
pub const DEFAULT_OCR_URL: &str = "http://127.0.0.1:5000";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub backend_key: String,
    pub ocr_url: String,
    pub discord_webhook: Option<String>,
    pub logged_by: String,
    pub capture: CaptureConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub monitor: usize,
    pub interval_ms: u64,
    /// RMSE on a 0-255 scale below which a frame counts as unchanged.
    pub change_threshold: f64,
    pub health_interval_secs: u64,
    pub debug_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            backend_key: String::new(),
            ocr_url: DEFAULT_OCR_URL.to_string(),
            discord_webhook: None,
            logged_by: "cli".to_string(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            monitor: 0,
            interval_ms: 500,
            change_threshold: 1.0,
            health_interval_secs: 10,
            debug_dir: PathBuf::from("screenshots"),
        }
    }
}

impl CaptureConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(50))
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

impl Config {
    /// File (or defaults when absent) with the process environment on top.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).with_context(|| format!("Invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Applies overrides from `lookup`; blank values are ignored.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("SUPABASE_URL") {
            self.backend_url = url;
        }
        if let Some(key) = get("SUPABASE_SERVICE_ROLE_KEY").or_else(|| get("SUPABASE_ANON_KEY")) {
            self.backend_key = key;
        }
        if let Some(url) = get("OCR_SERVICE_URL") {
            self.ocr_url = url;
        }
        if let Some(hook) = get("DISCORD_WEBHOOK_URL") {
            self.discord_webhook = Some(hook);
        }
        if let Some(who) = get("GUILDBOARD_LOGGED_BY") {
            self.logged_by = who;
        }
    }

    /// Writes pretty JSON via a temp file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Copy safe to print: the backend key keeps only its last four characters.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if !out.backend_key.is_empty() {
            let tail: String = {
                let chars: Vec<char> = out.backend_key.chars().collect();
                chars[chars.len().saturating_sub(4)..].iter().collect()
            };
            out.backend_key = format!("****{tail}");
        }
        out
    }

    pub fn store(&self) -> crate::error::Result<RestStore> {
        RestStore::new(&self.backend_url, &self.backend_key)
    }
}
