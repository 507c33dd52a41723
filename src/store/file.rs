use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{sanitize_chat_id, CachedModels, ClientStore, Preferences};
use crate::error::Result;
use crate::types::QueuedMessage;

const QUEUE_VERSION: u32 = 1;

/// JSON files under a state directory.
///
/// Layout: `queues/<chat>.json`, `drafts/<chat>.txt`, `prefs.json`,
/// `models.json`.
#[derive(Debug, Clone)]
pub struct FileClientStore {
    base_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueFile {
    version: u32,
    items: Vec<QueuedMessage>,
}

impl FileClientStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn queue_path(&self, chat_id: &str) -> PathBuf {
        self.base_dir
            .join("queues")
            .join(format!("{}.json", sanitize_chat_id(chat_id)))
    }

    fn draft_path(&self, chat_id: &str) -> PathBuf {
        self.base_dir
            .join("drafts")
            .join(format!("{}.txt", sanitize_chat_id(chat_id)))
    }

    fn prefs_path(&self) -> PathBuf {
        self.base_dir.join("prefs.json")
    }

    fn models_path(&self) -> PathBuf {
        self.base_dir.join("models.json")
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match Self::read_optional(path)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        Self::ensure_parent(path)?;
        let serialized = serde_json::to_string_pretty(value)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl ClientStore for FileClientStore {
    fn load_draft(&self, chat_id: &str) -> Result<Option<String>> {
        Self::read_optional(&self.draft_path(chat_id))
    }

    fn save_draft(&self, chat_id: &str, text: &str) -> Result<()> {
        let path = self.draft_path(chat_id);
        if text.is_empty() {
            return Self::remove(&path);
        }
        Self::ensure_parent(&path)?;
        fs::write(&path, text)?;
        Ok(())
    }

    fn load_queue(&self, chat_id: &str) -> Result<Vec<QueuedMessage>> {
        Ok(Self::read_json::<QueueFile>(&self.queue_path(chat_id))?
            .map(|file| file.items)
            .unwrap_or_default())
    }

    fn save_queue(&self, chat_id: &str, queue: &[QueuedMessage]) -> Result<()> {
        let path = self.queue_path(chat_id);
        if queue.is_empty() {
            return Self::remove(&path);
        }
        let file = QueueFile {
            version: QUEUE_VERSION,
            items: queue.to_vec(),
        };
        Self::write_json(&path, &file)
    }

    fn load_prefs(&self) -> Result<Preferences> {
        Ok(Self::read_json(&self.prefs_path())?.unwrap_or_default())
    }

    fn save_prefs(&self, prefs: &Preferences) -> Result<()> {
        Self::write_json(&self.prefs_path(), prefs)
    }

    fn load_model_cache(&self) -> Result<Option<CachedModels>> {
        Self::read_json(&self.models_path())
    }

    fn save_model_cache(&self, cache: &CachedModels) -> Result<()> {
        Self::write_json(&self.models_path(), cache)
    }
}
