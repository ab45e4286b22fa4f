//! Shared status for thread-safe reads.
//!
//! The runtime thread is the only writer. Readers get a consistent snapshot
//! without a round trip through the message queue.

use std::sync::{Arc, PoisonError, RwLock};

use super::model::PlaybackStatus;

/// Thread-safe holder of the latest [`PlaybackStatus`].
#[derive(Clone, Default)]
pub struct StatusManager {
    status: Arc<RwLock<PlaybackStatus>>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the status with a closure.
    pub fn with_status_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&PlaybackStatus) -> R,
    {
        let status = self.status.read().unwrap_or_else(PoisonError::into_inner);
        f(&status)
    }

    /// Replace the status.
    pub fn publish(&self, status: PlaybackStatus) {
        let mut guard = self.status.write().unwrap_or_else(PoisonError::into_inner);
        *guard = status;
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> PlaybackStatus {
        self.with_status_read(Clone::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_is_visible_to_clones() {
        let manager = StatusManager::new();
        let reader = manager.clone();
        manager.publish(PlaybackStatus {
            playing: true,
            version: 3,
            ..PlaybackStatus::default()
        });
        assert!(reader.with_status_read(|s| s.playing));
        assert_eq!(reader.snapshot().version, 3);
    }
}
