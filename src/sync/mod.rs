//! Concurrency admission control.

mod semaphore;

pub use semaphore::{AdmissionGuard, PrioritySemaphore};
