//! Detect a server restart between turns and ask the host to reload.
//!
//! The server reports a start-time token through its health endpoint. A
//! token different from the one observed at startup means a new process; the
//! host reloads only while no session in this process is running a turn.

use std::sync::Arc;

use strum::Display;
use tracing::{debug, info};

use crate::render::SessionHost;
use crate::session::EngineContext;

/// What a restart check concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RestartCheck {
    /// Some session is running; nothing was probed.
    Busy,
    /// No epoch was ever observed, so there is nothing to compare with.
    NoBaseline,
    /// The epoch changed and the host was asked to reload.
    Reloaded,
    /// The epoch changed but a session started running meanwhile.
    Deferred,
    /// The token never changed within the polling budget.
    Abandoned,
}

pub struct RestartWatcher {
    ctx: Arc<EngineContext>,
}

impl RestartWatcher {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Record the baseline epoch. Call once at startup.
    pub async fn prime(&self) -> Option<String> {
        self.ctx.epoch().await
    }

    /// Poll the health endpoint for a changed epoch.
    pub async fn check(&self, host: &dyn SessionHost) -> RestartCheck {
        if self.ctx.running_sessions() > 0 {
            return RestartCheck::Busy;
        }
        let Some(known) = self.ctx.cached_epoch() else {
            return RestartCheck::NoBaseline;
        };

        let attempts = self.ctx.config.restart_poll_attempts;
        let interval = self.ctx.config.restart_poll_interval;
        for attempt in 1..=attempts {
            match self.ctx.service.health_probe().await {
                Ok(token) if token != known => {
                    if self.ctx.running_sessions() > 0 {
                        debug!(attempt, "server restarted but a session is running");
                        return RestartCheck::Deferred;
                    }
                    info!(previous = %known, current = %token, "server restarted, reloading");
                    host.reload();
                    return RestartCheck::Reloaded;
                }
                Ok(_) => debug!(attempt, "server epoch unchanged"),
                Err(err) => debug!(attempt, error = %err, "health probe failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        RestartCheck::Abandoned
    }
}
