//! Generic pooling: a growable instance pool plus the delayed-task scheduler that
//! drives its time-to-live reclaim.

pub mod pool;
pub mod schedule;

pub use pool::{Acquired, Pool};
pub use schedule::{TaskHandle, TaskScheduler};
