//! Bounds how many lookups run at once and lets a long-running one be
//! cancelled (e.g. on shutdown) without leaking its in-flight RPC calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::constants::MAX_ACTIVE_TASKS;

#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Gates how many lookup tasks (node/value/peer lookups, announces) may be
/// active at once across the whole node.
pub struct TaskManager {
    slots: Arc<Semaphore>,
}

impl TaskManager {
    pub fn new() -> Self {
        TaskManager { slots: Arc::new(Semaphore::new(MAX_ACTIVE_TASKS)) }
    }

    /// Acquire a slot, blocking until one is free. The returned permit keeps
    /// the task counted as active until dropped.
    pub async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .expect("task manager semaphore is never closed")
    }

    pub fn active_count(&self) -> usize {
        MAX_ACTIVE_TASKS - self.slots.available_permits()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquiring_a_slot_increases_active_count() {
        let manager = TaskManager::new();
        let permit = manager.acquire().await;
        assert_eq!(manager.active_count(), 1);
        drop(permit);
    }

    #[test]
    fn cancel_token_reflects_cancellation() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
