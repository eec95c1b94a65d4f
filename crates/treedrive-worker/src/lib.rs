//! # treedrive-worker
//!
//! Durable background job processing: a Postgres-backed queue, a
//! handler-dispatching executor, and the polling runner. Delivery is
//! at-least-once; handlers are idempotent or guarded by their own state.

pub mod executor;
pub mod jobs;
pub mod queue;
pub mod runner;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use queue::JobQueue;
pub use runner::WorkerRunner;
