use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::service::{AgentService, HttpAgentService};
use crate::store::{ClientStore, FileClientStore};

/// Process-wide state shared by every session.
///
/// Holds the two pieces of cross-session state: the running-session count
/// (restart gating) and the server epoch token (probed once).
pub struct EngineContext {
    pub config: EngineConfig,
    pub service: Arc<dyn AgentService>,
    pub store: Arc<dyn ClientStore>,
    running: AtomicUsize,
    epoch: OnceCell<String>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        service: Arc<dyn AgentService>,
        store: Arc<dyn ClientStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            service,
            store,
            running: AtomicUsize::new(0),
            epoch: OnceCell::new(),
        })
    }

    /// HTTP service and file store from configuration.
    pub fn from_config(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let service = Arc::new(HttpAgentService::new(config.server_url.clone())?);
        let store = Arc::new(FileClientStore::new(config.state_dir.clone()));
        Ok(Self::new(config, service, store))
    }

    /// Sessions currently running a turn.
    pub fn running_sessions(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn session_started(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(running = now, "session started running");
    }

    pub(crate) fn session_stopped(&self) {
        let previous = self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            warn!("running-session count underflow");
        }
    }

    /// Epoch token of the server process, probed at most once successfully.
    pub async fn epoch(&self) -> Option<String> {
        let probe = self
            .epoch
            .get_or_try_init(|| async { self.service.health_probe().await })
            .await;
        match probe {
            Ok(token) => Some(token.clone()),
            Err(err) => {
                debug!(error = %err, "epoch probe failed");
                None
            }
        }
    }

    pub fn cached_epoch(&self) -> Option<String> {
        self.epoch.get().cloned()
    }
}
