//! Core traits defined in `treedrive-core` and implemented by other crates.

pub mod object_store;

pub use object_store::{ByteStream, ObjectMetadata, ObjectStore};
