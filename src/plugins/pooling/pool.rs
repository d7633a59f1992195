//! Growable pool of reusable instances with optional time-to-live reclaim.
//!
//! The pool only tracks *handles*; creating, activating and destroying the
//! underlying objects is the owner's job (usually a spawn through `Commands`).
//!
//! # Invariants
//! - every instance is either idle (on the stack) or active, never both
//! - an active instance has at most one live expiry timer
//! - instances are created lazily and only go away through `clear`

use std::fmt::Debug;
use std::hash::Hash;

use bevy::platform::collections::{HashMap, HashSet};

use super::schedule::{TaskHandle, TaskScheduler};

/// Result of an acquire: the instance and whether it was freshly created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquired<T> {
    pub instance: T,
    pub fresh: bool,
}

#[derive(Debug)]
pub struct Pool<T: Copy + Eq + Hash + Debug> {
    idle: Vec<T>,
    active: HashSet<T>,
    timers: HashMap<T, TaskHandle>,
    scheduler: TaskScheduler<T>,
}

impl<T: Copy + Eq + Hash + Debug> Default for Pool<T> {
    fn default() -> Self {
        Self {
            idle: Vec::new(),
            active: HashSet::default(),
            timers: HashMap::default(),
            scheduler: TaskScheduler::default(),
        }
    }
}

impl<T: Copy + Eq + Hash + Debug> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    #[inline]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Every instance the pool knows about.
    #[inline]
    pub fn len(&self) -> usize {
        self.idle.len() + self.active.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_active(&self, instance: T) -> bool {
        self.active.contains(&instance)
    }

    #[inline]
    pub fn is_idle(&self, instance: T) -> bool {
        self.idle.contains(&instance)
    }

    #[inline]
    pub fn has_timer(&self, instance: T) -> bool {
        self.timers.contains_key(&instance)
    }

    pub fn active(&self) -> impl Iterator<Item = T> + '_ {
        self.active.iter().copied()
    }

    /// Grow the idle set until it holds at least `count` instances.
    pub fn prewarm(&mut self, count: usize, mut create: impl FnMut() -> T) -> usize {
        let mut created = 0;
        while self.idle.len() < count {
            self.idle.push(create());
            created += 1;
        }
        created
    }

    /// Pop an idle instance, or create one when none is idle. Never fails.
    pub fn acquire_with(&mut self, create: impl FnOnce() -> T) -> Acquired<T> {
        let acquired = match self.idle.pop() {
            Some(instance) => Acquired { instance, fresh: false },
            None => Acquired { instance: create(), fresh: true },
        };
        self.active.insert(acquired.instance);
        acquired
    }

    /// Acquire and arm an expiry timer that releases the instance after `ttl` seconds.
    pub fn acquire_with_ttl(&mut self, ttl: f32, create: impl FnOnce() -> T) -> Acquired<T> {
        let acquired = self.acquire_with(create);
        self.set_ttl(acquired.instance, ttl);
        acquired
    }

    /// (Re)start the expiry timer of an active instance, cancelling any previous one.
    /// Returns `false` when the instance is not active.
    pub fn set_ttl(&mut self, instance: T, ttl: f32) -> bool {
        if !self.active.contains(&instance) {
            return false;
        }
        self.cancel_timer(instance);
        let handle = self.scheduler.schedule(ttl, instance);
        self.timers.insert(instance, handle);
        true
    }

    /// Cancel the expiry timer of an instance, if any.
    pub fn cancel_timer(&mut self, instance: T) -> bool {
        match self.timers.remove(&instance) {
            Some(handle) => self.scheduler.cancel(handle).is_some(),
            None => false,
        }
    }

    /// Mark an active instance idle and cancel its timer.
    /// Releasing something that is not active is a no-op and returns `false`.
    pub fn release(&mut self, instance: T) -> bool {
        if !self.active.remove(&instance) {
            return false;
        }
        self.cancel_timer(instance);
        self.idle.push(instance);
        true
    }

    /// Advance expiry timers by `dt` seconds. Returns the instances that were
    /// released because their timer fired.
    pub fn tick(&mut self, dt: f32) -> Vec<T> {
        self.scheduler
            .advance(dt)
            .into_iter()
            .filter_map(|(handle, instance)| {
                // Only the timer currently registered for the instance is authoritative.
                if self.timers.get(&instance) != Some(&handle) {
                    return None;
                }
                self.timers.remove(&instance);
                self.active.remove(&instance);
                self.idle.push(instance);
                Some(instance)
            })
            .collect()
    }

    /// Cancel every timer and hand back all instances (idle and active) for destruction.
    pub fn clear(&mut self) -> Vec<T> {
        self.scheduler.clear();
        self.timers.clear();
        let mut all: Vec<T> = self.idle.drain(..).collect();
        all.extend(self.active.drain());
        all
    }
}
