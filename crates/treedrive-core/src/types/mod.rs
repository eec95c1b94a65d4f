//! Common value types shared across TreeDrive crates.

pub mod pagination;

pub use pagination::{PageRequest, PageResponse};
