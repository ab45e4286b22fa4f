//! Threaded runtime.
//!
//! The runtime confines a [`crate::PlaybackEngine`] to a dedicated thread:
//! - Commands arrive over a message queue
//! - The scheduler is polled at the configured interval
//! - A status snapshot is shared with every handle

pub mod thread;

pub use thread::{Runtime, RuntimeHandle};
