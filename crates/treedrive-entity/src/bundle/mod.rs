//! Folder bundle entities.

pub mod model;

pub use model::{BundleEntry, BundleJob, BundlePayload, BundleStatus};
