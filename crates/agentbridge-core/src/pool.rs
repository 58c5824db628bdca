//! Generic object pool for reusable containers and scratch buffers.
//!
//! The router and the offline queue pull short-lived containers (queue
//! backings, serialization buffers, recipient lists) from an [`ObjectPool`]
//! instead of allocating them per message.
//!
//! Contract:
//! - [`ObjectPool::acquire`] hands out an owned object. The caller owns it
//!   exclusively until it passes it back to [`ObjectPool::release`].
//! - `release` resets the object to its template state *before* it goes on
//!   the free list. Ownership moves into the pool, so a released object can
//!   no longer be reached by its previous owner.
//! - Acquiring the same logical object twice without an intervening release
//!   is a caller bug. The pool does not track identities and cannot detect it.
//!
//! The free list is only touched from the control-plane loop; the pool is
//! deliberately not `Sync`-shared.

use std::collections::VecDeque;

use agentbridge_types::config::PoolConfig;
use agentbridge_types::metrics::PoolStatistics;
use tokio::time::Instant;

/// Objects that can be returned to a pool.
pub trait Recyclable {
    /// Reset to the state a freshly constructed object would have.
    ///
    /// Must drop every reference the object holds to external data.
    fn reset(&mut self);
}

impl<T> Recyclable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Recyclable for VecDeque<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Recyclable for String {
    fn reset(&mut self) {
        self.clear();
    }
}

/// A free object and when it was returned.
struct Idle<T> {
    object: T,
    since: Instant,
}

/// Bounded free-list allocator.
pub struct ObjectPool<T: Recyclable> {
    name: &'static str,
    factory: Box<dyn Fn() -> T + Send>,
    /// Oldest release at the front, most recent at the back.
    free: VecDeque<Idle<T>>,
    config: PoolConfig,
    in_use: usize,
    acquisitions: u64,
    hits: u64,
    releases: u64,
    discarded: u64,
    evicted: u64,
    created: u64,
}

impl<T: Recyclable> ObjectPool<T> {
    /// Create a pool and pre-construct `config.initial_size` objects.
    pub fn new(name: &'static str, config: PoolConfig, factory: impl Fn() -> T + Send + 'static) -> Self {
        let mut pool = Self {
            name,
            factory: Box::new(factory),
            free: VecDeque::with_capacity(config.initial_size),
            config,
            in_use: 0,
            acquisitions: 0,
            hits: 0,
            releases: 0,
            discarded: 0,
            evicted: 0,
            created: 0,
        };
        pool.warm(Instant::now());
        pool
    }

    fn warm(&mut self, now: Instant) {
        let target = self.config.initial_size.min(self.config.max_size);
        while self.free.len() < target {
            let object = (self.factory)();
            self.created += 1;
            self.free.push_back(Idle { object, since: now });
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take an object from the free list, or construct a new one.
    pub fn acquire(&mut self) -> T {
        self.acquisitions += 1;
        self.in_use += 1;
        match self.free.pop_back() {
            Some(idle) => {
                self.hits += 1;
                idle.object
            }
            None => {
                self.created += 1;
                (self.factory)()
            }
        }
    }

    /// Reset `object` and keep it if the free list has room; otherwise drop it.
    pub fn release(&mut self, mut object: T) {
        self.releases += 1;
        self.in_use = self.in_use.saturating_sub(1);
        object.reset();
        if self.free.len() < self.config.max_size {
            self.free.push_back(Idle {
                object,
                since: Instant::now(),
            });
        } else {
            self.discarded += 1;
        }
    }

    /// Periodic maintenance.
    ///
    /// Evicts objects idle longer than `max_idle`, then, if utilization is
    /// below `shrink_threshold`, halves the surplus above the floor. Never
    /// shrinks below `min_size`. Returns the number of objects evicted.
    pub fn maintain(&mut self, now: Instant) -> usize {
        let floor = self.config.min_size;
        let max_idle = self.config.max_idle();
        let mut evicted = 0;

        while self.free.len() > floor {
            match self.free.front() {
                Some(idle) if now.saturating_duration_since(idle.since) >= max_idle => {
                    self.free.pop_front();
                    evicted += 1;
                }
                _ => break,
            }
        }

        if self.utilization() < self.config.shrink_threshold && self.free.len() > floor {
            let surplus = self.free.len() - floor;
            let target = floor + surplus / 2;
            while self.free.len() > target {
                self.free.pop_front();
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(pool = self.name, evicted, size = self.free.len(), "pool maintenance");
        }
        self.evicted += evicted as u64;
        evicted
    }

    /// Drop every free object above the floor. Used by memory collection.
    pub fn drain_to_floor(&mut self) -> usize {
        let floor = self.config.min_size;
        let mut drained = 0;
        while self.free.len() > floor {
            self.free.pop_front();
            drained += 1;
        }
        self.evicted += drained as u64;
        drained
    }

    /// Objects currently on the free list.
    pub fn size(&self) -> usize {
        self.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    fn utilization(&self) -> f64 {
        let total = self.in_use + self.free.len();
        if total == 0 {
            0.0
        } else {
            self.in_use as f64 / total as f64
        }
    }

    pub fn statistics(&self) -> PoolStatistics {
        let hit_rate = if self.acquisitions == 0 {
            0.0
        } else {
            self.hits as f64 / self.acquisitions as f64
        };
        PoolStatistics {
            acquisitions: self.acquisitions,
            hits: self.hits,
            misses: self.acquisitions - self.hits,
            releases: self.releases,
            discarded: self.discarded,
            evicted: self.evicted,
            created: self.created,
            size: self.free.len(),
            in_use: self.in_use,
            max_size: self.config.max_size,
            hit_rate,
            utilization: self.utilization(),
        }
    }
}

impl<T: Recyclable> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.name)
            .field("size", &self.free.len())
            .field("in_use", &self.in_use)
            .field("max_size", &self.config.max_size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
