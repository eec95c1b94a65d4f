//! Access grant entities.

pub mod model;

pub use model::{AccessGrant, AccessLevel};
