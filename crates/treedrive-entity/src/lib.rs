//! # treedrive-entity
//!
//! Domain entity models for TreeDrive: tree nodes, content versions,
//! access grants, folder bundles, usage counters, background jobs, and
//! the read-only user lookup model.

pub mod bundle;
pub mod grant;
pub mod job;
pub mod node;
pub mod usage;
pub mod user;
pub mod version;
