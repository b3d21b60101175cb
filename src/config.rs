use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::network::Session;
use crate::storage::ensure_parent_dir;

pub const DEFAULT_CONFIG_PATH: &str = "config/luma.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    Local,
    Firebase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_key: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub database_path: String,
    pub blob_dir: String,
    pub blob_backend: BlobBackend,
    pub max_upload_bytes: usize,
    pub max_commit_attempts: u32,
    pub audio_updates_summaries: bool,
    pub preserve_draft_on_failure: bool,
    pub session_path: String,
    /// How often the chat view checks for messages written by other processes.
    pub poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project_id: String::new(),
            storage_bucket: String::new(),
            database_path: "data/luma.db".to_string(),
            blob_dir: "data/blobs".to_string(),
            blob_backend: BlobBackend::Local,
            max_upload_bytes: 10 * 1024 * 1024,
            max_commit_attempts: 5,
            audio_updates_summaries: false,
            preserve_draft_on_failure: false,
            session_path: "data/session.json".to_string(),
            poll_interval_ms: 250,
        }
    }
}

impl AppConfig {
    /// Values from the environment win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("LUMA_API_KEY") {
            self.api_key = key;
        }
        if let Some(bucket) = lookup("LUMA_STORAGE_BUCKET") {
            self.storage_bucket = bucket;
        }
        if let Some(path) = lookup("LUMA_DATABASE_PATH") {
            self.database_path = path;
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

/// Load the session kept by "keep me signed in", if any.
pub fn load_session(path: &str) -> Option<Session> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Session>(&content) {
        Ok(session) => Some(session),
        Err(err) => {
            log::warn!("Ignoring unreadable session file {path}: {err}");
            None
        }
    }
}

pub fn save_session(path: &str, session: &Session) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(session)?;
    fs::write(path, json)
}

pub fn clear_session(path: &str) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
