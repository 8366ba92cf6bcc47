//! Utilities for multithreading.

mod pool;

pub use pool::{TaskHandle, TaskPool};
