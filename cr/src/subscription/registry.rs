//! Active subscriber accounting
//!
//! A process-wide atomic counter. Every live subscription holds a
//! [`Registration`]; dropping it is the one and only decrement.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

/// Shared counter of live subscriptions
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    active: Arc<AtomicUsize>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more live subscription until the returned guard drops
    pub fn register(&self) -> Registration {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(active = now, "SubscriberRegistry::register");
        Registration {
            active: self.active.clone(),
        }
    }

    /// Snapshot of the number of live subscriptions
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Proof of registration; decrements the registry exactly once on drop
#[derive(Debug)]
pub struct Registration {
    active: Arc<AtomicUsize>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let before = self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(active = before - 1, "Registration::drop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_register_and_drop() {
        let registry = SubscriberRegistry::new();
        assert_eq!(registry.active_count(), 0);

        let a = registry.register();
        let b = registry.register();
        assert_eq!(registry.active_count(), 2);

        drop(a);
        assert_eq!(registry.active_count(), 1);
        drop(b);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_clones_share_the_counter() {
        let registry = SubscriberRegistry::new();
        let other = registry.clone();
        let _guard = other.register();
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_drop_loses_no_updates() {
        let registry = SubscriberRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let guard = registry.register();
                    tokio::task::yield_now().await;
                    drop(guard);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.active_count(), 0);
    }

    proptest! {
        /// `true` registers a new guard, `false` drops the oldest live one
        #[test]
        fn prop_count_matches_live_guards(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let registry = SubscriberRegistry::new();
            let mut live = std::collections::VecDeque::new();
            for op in ops {
                if op {
                    live.push_back(registry.register());
                } else {
                    live.pop_front();
                }
                prop_assert_eq!(registry.active_count(), live.len());
            }
            live.clear();
            prop_assert_eq!(registry.active_count(), 0);
        }
    }
}
