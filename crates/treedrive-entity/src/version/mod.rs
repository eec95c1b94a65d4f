//! Content version entity.

pub mod model;

pub use model::{BeginVersion, NodeVersion, VersionStatus};
