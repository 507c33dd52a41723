//! Core types shared by the engine.

pub mod block;
pub mod event;
pub mod message;
pub mod negotiation;
pub mod tool;

pub use block::*;
pub use event::*;
pub use message::*;
pub use negotiation::*;
pub use tool::*;
