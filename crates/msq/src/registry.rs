//! A fixed set of independent queues.
//!
//! The application builds one `QueueRegistry` at startup, shares it (or the
//! individual queues) by `Arc`, and tears it down with `shutdown`. Each queue
//! gets its own `DomainId`, so hazard records and retire lists are never
//! shared between shards.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Index;
use std::sync::Arc;

use tracing::debug;

use crate::atomic::AtomicTagged;
use crate::config::{ConfigError, QueueConfig};
use crate::hazard::DomainId;
use crate::queue::LockFreeQueue;

/// `N` queues of `T`, addressed by index or by key.
pub struct QueueRegistry<T: Clone + Default, const N: usize> {
    queues: [Arc<LockFreeQueue<T>>; N],
}

impl<T: Clone + Default, const N: usize> QueueRegistry<T, N> {
    const NOT_EMPTY: () = assert!(N > 0, "a registry needs at least one queue");

    /// Queue `i` lives in `DomainId(i)`.
    #[must_use]
    pub fn new() -> Self {
        let () = Self::NOT_EMPTY;
        let queues = std::array::from_fn(|i| Arc::new(LockFreeQueue::with_domain(domain_of(i))));
        debug!(
            queues = N,
            lock_free = AtomicTagged::is_lock_free(),
            "constructed queue registry"
        );
        Self { queues }
    }

    /// Build every queue from `config_for(domain)`; the first invalid
    /// configuration aborts construction.
    pub fn with_config<F>(mut config_for: F) -> Result<Self, ConfigError>
    where
        F: FnMut(DomainId) -> QueueConfig,
    {
        let () = Self::NOT_EMPTY;
        let configs: [QueueConfig; N] = std::array::from_fn(|i| config_for(domain_of(i)));
        for config in &configs {
            config.validate()?;
        }

        let mut built = Vec::with_capacity(N);
        for config in configs {
            built.push(Arc::new(LockFreeQueue::with_config(config)?));
        }
        let queues = match built.try_into() {
            Ok(queues) => queues,
            Err(_) => unreachable!("built exactly N queues"),
        };
        debug!(
            queues = N,
            lock_free = AtomicTagged::is_lock_free(),
            "constructed queue registry"
        );
        Ok(Self { queues })
    }

    pub const fn len(&self) -> usize {
        N
    }

    /// Always `false`: a registry holds at least one queue. Present to pair
    /// with `len`.
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    pub fn get(&self, index: usize) -> Option<&Arc<LockFreeQueue<T>>> {
        self.queues.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LockFreeQueue<T>>> {
        self.queues.iter()
    }

    /// The shard `key` maps to. Stable for the lifetime of the process.
    pub fn shard_for<K: Hash + ?Sized>(&self, key: &K) -> &Arc<LockFreeQueue<T>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.queues[(hasher.finish() % N as u64) as usize]
    }

    /// Tear the registry down. Queues still referenced elsewhere stay alive
    /// until their last `Arc` drops; returns how many were dropped here.
    pub fn shutdown(self) -> usize {
        let mut dropped = 0;
        for queue in self.queues {
            let domain = queue.domain();
            match Arc::try_unwrap(queue) {
                Ok(queue) => {
                    drop(queue);
                    dropped += 1;
                }
                Err(_) => debug!(%domain, "queue still shared at shutdown"),
            }
        }
        debug!(queues = N, dropped, "queue registry shut down");
        dropped
    }
}

impl<T: Clone + Default, const N: usize> Default for QueueRegistry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default, const N: usize> Index<usize> for QueueRegistry<T, N> {
    type Output = LockFreeQueue<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.queues[index]
    }
}

fn domain_of(index: usize) -> DomainId {
    DomainId(index as u32)
}
