use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{CachedModels, ClientStore, Preferences};
use crate::error::Result;
use crate::types::QueuedMessage;

/// In-process store for headless hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryClientStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    drafts: HashMap<String, String>,
    queues: HashMap<String, Vec<QueuedMessage>>,
    prefs: Preferences,
    models: Option<CachedModels>,
}

impl MemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl ClientStore for MemoryClientStore {
    fn load_draft(&self, chat_id: &str) -> Result<Option<String>> {
        Ok(self.with(|s| s.drafts.get(chat_id).cloned()))
    }

    fn save_draft(&self, chat_id: &str, text: &str) -> Result<()> {
        self.with(|s| {
            if text.is_empty() {
                s.drafts.remove(chat_id);
            } else {
                s.drafts.insert(chat_id.to_string(), text.to_string());
            }
        });
        Ok(())
    }

    fn load_queue(&self, chat_id: &str) -> Result<Vec<QueuedMessage>> {
        Ok(self.with(|s| s.queues.get(chat_id).cloned().unwrap_or_default()))
    }

    fn save_queue(&self, chat_id: &str, queue: &[QueuedMessage]) -> Result<()> {
        // Same projection as on disk: no images.
        let projected: Vec<QueuedMessage> = queue
            .iter()
            .map(|m| QueuedMessage::new(m.prompt.clone()).with_display_text(m.display_text.clone()))
            .collect();
        self.with(|s| {
            if projected.is_empty() {
                s.queues.remove(chat_id);
            } else {
                s.queues.insert(chat_id.to_string(), projected);
            }
        });
        Ok(())
    }

    fn load_prefs(&self) -> Result<Preferences> {
        Ok(self.with(|s| s.prefs.clone()))
    }

    fn save_prefs(&self, prefs: &Preferences) -> Result<()> {
        self.with(|s| s.prefs = prefs.clone());
        Ok(())
    }

    fn load_model_cache(&self) -> Result<Option<CachedModels>> {
        Ok(self.with(|s| s.models.clone()))
    }

    fn save_model_cache(&self, cache: &CachedModels) -> Result<()> {
        self.with(|s| s.models = Some(cache.clone()));
        Ok(())
    }
}
