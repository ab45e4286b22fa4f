//! Runtime-facing state: command messages and the shared status snapshot.

mod manager;
mod messages;
mod model;

pub use manager::StatusManager;
pub use messages::{EngineMessage, Reply};
pub use model::PlaybackStatus;
