//! Model list with a client-side freshness window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::service::AgentService;
use crate::store::{CachedModels, ClientStore};
use crate::types::ModelList;

/// Cached model list plus the remembered model preference.
pub struct ModelCatalog {
    service: Arc<dyn AgentService>,
    store: Arc<dyn ClientStore>,
    ttl: Duration,
}

impl ModelCatalog {
    pub fn new(service: Arc<dyn AgentService>, store: Arc<dyn ClientStore>, ttl: Duration) -> Self {
        Self { service, store, ttl }
    }

    /// Cached list while fresh, otherwise a fetch. A failed fetch falls back
    /// to a stale cache when one exists.
    pub async fn models(&self) -> Result<ModelList> {
        let cached = self.store.load_model_cache().unwrap_or_else(|err| {
            warn!(error = %err, "unreadable model cache");
            None
        });
        if let Some(cache) = &cached {
            if self.is_fresh(cache, Utc::now()) {
                debug!(count = cache.list.models.len(), "using cached model list");
                return Ok(cache.list.clone());
            }
        }
        match self.refresh().await {
            Ok(list) => Ok(list),
            Err(err) => match cached {
                Some(stale) => {
                    warn!(error = %err, "model fetch failed, using stale cache");
                    Ok(stale.list)
                }
                None => Err(err),
            },
        }
    }

    /// Fetch and re-cache unconditionally.
    pub async fn refresh(&self) -> Result<ModelList> {
        let list = self.service.list_models().await?;
        let cache = CachedModels {
            fetched_at: Utc::now(),
            list: list.clone(),
        };
        if let Err(err) = self.store.save_model_cache(&cache) {
            warn!(error = %err, "failed to cache model list");
        }
        Ok(list)
    }

    pub fn preferred_model(&self) -> Option<String> {
        self.store.load_prefs().ok().and_then(|p| p.last_model)
    }

    pub fn set_preferred_model(&self, model: &str) -> Result<()> {
        let mut prefs = self.store.load_prefs()?;
        prefs.last_model = Some(model.to_string());
        self.store.save_prefs(&prefs)
    }

    /// The preferred model if the server still offers it, else the
    /// server default.
    pub async fn resolve_model(&self) -> Result<Option<String>> {
        let list = self.models().await?;
        let preferred = self
            .preferred_model()
            .filter(|id| list.models.iter().any(|m| &m.id == id));
        Ok(preferred.or(list.default))
    }

    fn is_fresh(&self, cache: &CachedModels, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(cache.fetched_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            // Timestamp in the future: clock moved back, refetch.
            Err(_) => false,
        }
    }
}
