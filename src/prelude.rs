//! Convenience re-exports for common use.

pub use crate::config::EngineConfig;
pub use crate::error::{ErrorCategory, GatekeepError, Result};
pub use crate::models::ModelCatalog;
pub use crate::render::{Banner, FinalAnswer, RecordingRenderer, Renderer, SessionHost};
pub use crate::restart::{RestartCheck, RestartWatcher};
pub use crate::service::{AgentService, HttpAgentService};
pub use crate::session::{EngineContext, SessionRunner, SubmitOutcome, TurnOutcome};
pub use crate::store::{ClientStore, FileClientStore, MemoryClientStore};
pub use crate::types::{AgentEvent, PermissionChoice, QueuedMessage, TurnRequest};
