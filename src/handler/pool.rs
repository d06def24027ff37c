//! Reusable object pools for the request hot path.
//!
//! # Responsibilities
//! - Bound per-request heap churn by recycling descriptors and wire payloads
//! - Guarantee full field reset before an object re-enters circulation
//! - Guarantee exactly-once release on every exit path (RAII guard)
//!
//! # Design Decisions
//! - Lock-striped shards behind plain `std::sync::Mutex`; the critical
//!   section is a Vec push/pop, no await ever happens under the lock
//! - The pool is the long-term owner; a request task holds a temporary
//!   exclusive borrow through `Pooled<T>`
//! - Shard depth is bounded, overflow objects are simply dropped

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::executor::Payload;

/// Clears every reference-bearing field so the next borrower observes
/// default state. Buffers keep their capacity; owned side effects (temp
/// files) are released here.
pub trait Reset: Default + Send + 'static {
    fn reset(&mut self);
}

impl Reset for Payload {
    fn reset(&mut self) {
        self.body.clear();
        self.context.clear();
        self.codec = Default::default();
    }
}

/// Lock-striped pool of pre-reset objects.
pub struct ObjectPool<T> {
    shards: Vec<Mutex<Vec<T>>>,
    next: AtomicUsize,
    shard_depth: usize,
}

impl<T: Reset> ObjectPool<T> {
    pub fn new(shards: usize, shard_depth: usize) -> Arc<Self> {
        let shards = shards.max(1);
        Arc::new(Self {
            shards: (0..shards).map(|_| Mutex::new(Vec::new())).collect(),
            next: AtomicUsize::new(0),
            shard_depth,
        })
    }

    /// Borrow an object, allocating a fresh one when the shard is empty.
    pub fn get(self: &Arc<Self>) -> Pooled<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        let obj = {
            let mut shard = self.shards[idx].lock().unwrap_or_else(|e| e.into_inner());
            shard.pop()
        };
        Pooled {
            obj: Some(obj.unwrap_or_default()),
            pool: Arc::clone(self),
        }
    }

    fn put(&self, obj: T) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        let mut shard = self.shards[idx].lock().unwrap_or_else(|e| e.into_inner());
        if shard.len() < self.shard_depth {
            shard.push(obj);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }
}

/// Exclusive borrow of a pooled object. Dropping it resets the object and
/// returns it to the pool, which makes double-release unrepresentable.
pub struct Pooled<T: Reset> {
    obj: Option<T>,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Reset> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.obj.as_ref().expect("pooled object taken")
    }
}

impl<T: Reset> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.obj.as_mut().expect("pooled object taken")
    }
}

impl<T: Reset> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut obj) = self.obj.take() {
            obj.reset();
            self.pool.put(obj);
        }
    }
}
