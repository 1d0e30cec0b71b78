//! Last-resort local backup for writes the backend never accepted
//!
//! When a key exhausts its retries the store writes a copy here, outside
//! the primary backend, so the value survives until it can be re-submitted.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::Result;
use super::lock;

/// A backed-up value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub key: String,
    pub value: Value,
    pub saved_at: DateTime<Utc>,
}

/// Storage for values the primary backend could not take
pub trait LocalBackup: Send + Sync {
    fn save(&self, key: &str, value: &Value) -> Result<()>;

    fn load_all(&self) -> Result<Vec<BackupEntry>>;

    fn remove(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> bool;
}

/// Directory of `{key}.json` backup files
pub struct FileBackup {
    dir: PathBuf,
}

impl FileBackup {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            dir: data_dir.join("backup"),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl LocalBackup for FileBackup {
    fn save(&self, key: &str, value: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let entry = BackupEntry {
            key: key.to_string(),
            value: value.clone(),
            saved_at: Utc::now(),
        };
        fs::write(self.entry_path(key), serde_json::to_string_pretty(&entry)?)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<BackupEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                let content = fs::read_to_string(&path)?;
                match serde_json::from_str::<BackupEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => log::warn!("Backup: skipping unreadable {}: {}", path.display(), e),
                }
            }
        }

        entries.sort_by(|a, b| a.saved_at.cmp(&b.saved_at));
        Ok(entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn contains(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }
}

/// In-process backup, for tests and runs without a data directory
#[derive(Default)]
pub struct MemoryBackup {
    entries: Mutex<HashMap<String, BackupEntry>>,
}

impl MemoryBackup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.entries).get(key).map(|e| e.value.clone())
    }
}

impl LocalBackup for MemoryBackup {
    fn save(&self, key: &str, value: &Value) -> Result<()> {
        lock(&self.entries).insert(
            key.to_string(),
            BackupEntry {
                key: key.to_string(),
                value: value.clone(),
                saved_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<BackupEntry>> {
        let mut entries: Vec<BackupEntry> = lock(&self.entries).values().cloned().collect();
        entries.sort_by(|a, b| a.saved_at.cmp(&b.saved_at));
        Ok(entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }
}
