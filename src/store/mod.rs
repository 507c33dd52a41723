//! Client-local durable state: drafts, queues, preferences, model cache.

mod file;
mod memory;

pub use file::FileClientStore;
pub use memory::MemoryClientStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::{ModelList, QueuedMessage};

/// Preferences remembered across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
}

/// Model list plus the time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedModels {
    pub fetched_at: DateTime<Utc>,
    pub list: ModelList,
}

/// Storage abstraction for client-local state.
///
/// Queue projections never carry images: [`QueuedMessage`] skips them when
/// serialized, and implementations must not keep them either.
pub trait ClientStore: Send + Sync {
    fn load_draft(&self, chat_id: &str) -> Result<Option<String>>;
    /// An empty draft clears the stored one.
    fn save_draft(&self, chat_id: &str, text: &str) -> Result<()>;

    fn load_queue(&self, chat_id: &str) -> Result<Vec<QueuedMessage>>;
    /// An empty queue clears the stored one.
    fn save_queue(&self, chat_id: &str, queue: &[QueuedMessage]) -> Result<()>;

    fn load_prefs(&self) -> Result<Preferences>;
    fn save_prefs(&self, prefs: &Preferences) -> Result<()>;

    fn load_model_cache(&self) -> Result<Option<CachedModels>>;
    fn save_model_cache(&self, cache: &CachedModels) -> Result<()>;
}

/// Hex digits of the raw-id digest appended to rewritten stems.
const ID_DIGEST_CHARS: usize = 8;

/// Map a chat id onto a safe file stem (`[A-Za-z0-9_-]`).
///
/// Ids that had to be rewritten get a short digest of the raw id appended,
/// so `a/b` and `a_b` never share a file.
pub fn sanitize_chat_id(chat_id: &str) -> String {
    let safe = |ch: char| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_';
    if !chat_id.is_empty() && chat_id.chars().all(safe) {
        return chat_id.to_string();
    }
    let stem: String = chat_id
        .trim()
        .chars()
        .map(|ch| if safe(ch) { ch } else { '_' })
        .collect();
    let stem = if stem.trim_matches('_').is_empty() {
        "default"
    } else {
        stem.as_str()
    };
    let digest: String = Sha256::digest(chat_id.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("{stem}-{}", &digest[..ID_DIGEST_CHARS])
}
