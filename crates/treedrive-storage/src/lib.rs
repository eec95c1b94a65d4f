//! # treedrive-storage
//!
//! Object store providers (S3-compatible and in-memory) and the zip
//! archive builder used by folder bundling.

pub mod archive;
pub mod providers;

pub use archive::ArchiveBuilder;
pub use providers::create_object_store;
pub use providers::memory::MemoryObjectStore;
