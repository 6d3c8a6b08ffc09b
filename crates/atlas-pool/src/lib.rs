//! # Atlas Pool
//!
//! Recycling pool for objects whose construction cost dominates their use
//! (connections, parsers, large buffers). [`Pool::acquire`] lends a resource
//! out as a [`Lease`]; dropping the lease returns the resource to the pool,
//! or destroys it if the pool has already been dropped.
//!
//! ## Handoff protocol
//! The pool's state lives behind an `Arc`; every lease carries a `Weak` back
//! to it. On lease drop the weak reference either upgrades (pool alive,
//! resource re-enters the idle queue) or fails (pool gone, resource is
//! destroyed in place). At any moment each resource is owned either by the
//! idle queue or by exactly one outstanding lease.
//!
//! Because the `Arc` pins the pool's identity on the heap, the [`Pool`]
//! handle itself can be moved (or sent to another thread) while leases are
//! outstanding and their weak references keep resolving.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

struct State<R> {
    /// Idle resources, recycled FIFO.
    idle: VecDeque<R>,
    /// Builds a fresh resource when the idle queue is empty.
    factory: Box<dyn FnMut() -> R + Send>,
    /// Leases currently out.
    outstanding: usize,
    /// Resources ever built by the factory.
    created: u64,
}

struct Shared<R> {
    state: Mutex<State<R>>,
}

/// A pool of reusable resources.
///
/// Non-cloneable: the pool is the single owner of its idle queue. All
/// methods take `&self`; the internal mutex makes acquire and lease-return
/// safe from any thread when `R: Send`.
pub struct Pool<R> {
    shared: Arc<Shared<R>>,
}

impl<R: Default + 'static> Pool<R> {
    /// Create a pool that default-constructs resources on demand.
    pub fn new() -> Self {
        Self::with_factory(R::default)
    }
}

impl<R: Default + 'static> Default for Pool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Pool<R> {
    /// Create a pool with an explicit resource factory.
    pub fn with_factory(factory: impl FnMut() -> R + Send + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    idle: VecDeque::new(),
                    factory: Box::new(factory),
                    outstanding: 0,
                    created: 0,
                }),
            }),
        }
    }

    /// Borrow a resource, reusing the oldest idle one or building a new one.
    pub fn acquire(&self) -> Lease<R> {
        let mut state = self.shared.state.lock();
        let resource = match state.idle.pop_front() {
            Some(resource) => {
                trace!("reusing idle resource");
                resource
            }
            None => {
                trace!("idle queue empty, building a new resource");
                state.created += 1;
                (state.factory)()
            }
        };
        state.outstanding += 1;
        drop(state);

        Lease {
            resource: Some(resource),
            pool: Arc::downgrade(&self.shared),
        }
    }

    /// Number of idle resources waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Number of leases currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Total resources the factory has ever built.
    pub fn created(&self) -> u64 {
        self.shared.state.lock().created
    }

    /// Destroy every idle resource. Outstanding leases are unaffected and
    /// still return to the pool on drop.
    pub fn drain(&self) {
        let drained = {
            let mut state = self.shared.state.lock();
            std::mem::take(&mut state.idle)
        };
        trace!(count = drained.len(), "draining idle resources");
        drop(drained);
    }
}

/// An exclusive borrow of one pooled resource.
///
/// Dereferences to `R`. On drop the resource goes back to its pool's idle
/// queue, or is destroyed if the pool no longer exists.
pub struct Lease<R> {
    resource: Option<R>,
    pool: Weak<Shared<R>>,
}

impl<R> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect("resource held until drop")
    }
}

impl<R> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("resource held until drop")
    }
}

impl<R> Drop for Lease<R> {
    fn drop(&mut self) {
        let resource = match self.resource.take() {
            Some(resource) => resource,
            None => return,
        };
        match self.pool.upgrade() {
            Some(shared) => {
                trace!("recycling resource");
                let mut state = shared.state.lock();
                state.idle.push_back(resource);
                state.outstanding -= 1;
            }
            None => {
                trace!("pool gone, destroying resource");
                drop(resource);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resource that reports its construction id and counts its drops.
    struct Tracked {
        id: usize,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked_pool() -> (Pool<Tracked>, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let drops_in_factory = Arc::clone(&drops);
        let next_id = AtomicUsize::new(0);
        let pool = Pool::with_factory(move || Tracked {
            id: next_id.fetch_add(1, Ordering::SeqCst),
            drops: Arc::clone(&drops_in_factory),
        });
        (pool, drops)
    }

    #[test]
    fn test_recycles_instead_of_allocating() {
        let (pool, _drops) = tracked_pool();

        let first = pool.acquire();
        assert_eq!(pool.idle_count(), 0);
        let first_id = first.id;
        drop(first);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.acquire();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(second.id, first_id, "the recycled instance comes back");
        assert_eq!(pool.created(), 1, "no second allocation happened");
    }

    #[test]
    fn test_idle_queue_is_fifo() {
        let (pool, _drops) = tracked_pool();

        let a = pool.acquire();
        let b = pool.acquire();
        let (a_id, b_id) = (a.id, b.id);
        drop(a);
        drop(b);

        assert_eq!(pool.acquire().id, a_id);
        assert_eq!(pool.acquire().id, b_id);
    }

    #[test]
    fn test_lease_outlives_pool() {
        let (pool, drops) = tracked_pool();
        let lease = pool.acquire();
        drop(pool);

        // the lease still works after the pool died
        assert_eq!(lease.id, 0);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(lease);
        assert_eq!(drops.load(Ordering::SeqCst), 1, "destroyed exactly once");
    }

    #[test]
    fn test_pool_drop_destroys_idle_only() {
        let (pool, drops) = tracked_pool();
        let held = pool.acquire();
        drop(pool.acquire()); // goes idle
        drop(pool.acquire()); // goes idle

        drop(pool);
        assert_eq!(drops.load(Ordering::SeqCst), 2, "idle resources destroyed with the pool");

        drop(held);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_conservation() {
        let (pool, _drops) = tracked_pool();

        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire());
        }
        held.truncate(2);

        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(
            pool.idle_count() + pool.outstanding(),
            pool.created() as usize,
            "every resource is idle xor leased"
        );
    }

    #[test]
    fn test_drain() {
        let (pool, drops) = tracked_pool();
        let held = pool.acquire();
        drop(pool.acquire());
        drop(pool.acquire());
        assert_eq!(pool.idle_count(), 2);

        pool.drain();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 2);

        // the outstanding lease still returns normally
        drop(held);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_constructible_resources() {
        let pool: Pool<String> = Pool::new();
        let mut lease = pool.acquire();
        lease.push_str("hello");
        assert_eq!(&*lease, "hello");
        drop(lease);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_moving_the_pool_keeps_leases_valid() {
        let (pool, _drops) = tracked_pool();
        let lease = pool.acquire();

        // moving the handle does not change the pool's identity
        let moved = pool;
        drop(lease);
        assert_eq!(moved.idle_count(), 1);
    }

    #[test]
    fn test_lease_returns_from_another_thread() {
        let (pool, _drops) = tracked_pool();
        let lease = pool.acquire();

        std::thread::spawn(move || drop(lease))
            .join()
            .expect("drop thread panicked");

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.outstanding(), 0);
    }
}
