//! Cancellable delayed tasks driven by an explicit clock.
//!
//! Nothing here runs on its own thread: the owner advances the scheduler from the
//! fixed step, and due tasks are handed back as values. Because `cancel` and
//! `advance` both need `&mut self`, a cancelled task can never also fire.

use bevy::platform::collections::HashMap;

/// Cancellation handle for one scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

#[derive(Debug)]
struct ScheduledTask<T> {
    due: f64,
    payload: T,
}

#[derive(Debug)]
pub struct TaskScheduler<T> {
    now: f64,
    next_id: u64,
    tasks: HashMap<u64, ScheduledTask<T>>,
}

impl<T> Default for TaskScheduler<T> {
    fn default() -> Self {
        Self {
            now: 0.0,
            next_id: 0,
            tasks: HashMap::default(),
        }
    }
}

impl<T> TaskScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds advanced so far.
    #[inline]
    pub fn now(&self) -> f64 {
        self.now
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Schedule `payload` to come due after `delay` seconds (negative delays clamp to 0).
    pub fn schedule(&mut self, delay: f32, payload: T) -> TaskHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(
            id,
            ScheduledTask {
                due: self.now + f64::from(delay.max(0.0)),
                payload,
            },
        );
        TaskHandle(id)
    }

    /// Cancel a pending task. Returns its payload if it had not fired yet.
    pub fn cancel(&mut self, handle: TaskHandle) -> Option<T> {
        self.tasks.remove(&handle.0).map(|task| task.payload)
    }

    #[inline]
    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.tasks.contains_key(&handle.0)
    }

    /// Move the clock forward and return every task that came due,
    /// ordered by due time, then by scheduling order.
    pub fn advance(&mut self, dt: f32) -> Vec<(TaskHandle, T)> {
        self.now += f64::from(dt.max(0.0));
        let now = self.now;

        let mut due: Vec<(f64, u64)> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.due <= now)
            .map(|(id, task)| (task.due, *id))
            .collect();
        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        due.into_iter()
            .filter_map(|(_, id)| {
                self.tasks
                    .remove(&id)
                    .map(|task| (TaskHandle(id), task.payload))
            })
            .collect()
    }

    /// Drop every pending task without firing it.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
