//! Batch execution of many targets over a bounded worker pool.

pub mod board;
pub mod runner;

pub use board::RunCounters;
pub use runner::BatchRunner;
