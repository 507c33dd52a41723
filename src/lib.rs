//! Gatekeep: client-side engine for approval-gated coding agents
//!
//! Consumes the agent server's line-delimited event stream and turns it into
//! renderable content blocks, tool cards, permission and question
//! negotiations, and a persisted final answer. Sessions queue follow-up
//! messages while a turn runs and a shared watcher reloads the host after a
//! server restart.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatekeep::prelude::*;
//!
//! # async fn example() -> gatekeep::error::Result<()> {
//! let ctx = EngineContext::from_config(EngineConfig::from_env()?)?;
//! let chat_id = ctx.service.create_chat().await?;
//! let ui = Arc::new(RecordingRenderer::new());
//! let session = SessionRunner::open(chat_id, ctx, ui.clone(), ui);
//! if let SubmitOutcome::Started { handle, .. } = session.submit(QueuedMessage::new("fix bug"))? {
//!     let outcome = handle.await;
//!     println!("{outcome:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod assembler;
pub mod config;
pub mod error;
pub mod models;
pub mod prelude;
pub mod render;
pub mod restart;
pub mod service;
pub mod session;
pub mod store;
pub mod stream;
pub mod tools;
pub mod types;

#[cfg(test)]
mod test_support;

#[cfg(feature = "cli")]
pub mod cli;
