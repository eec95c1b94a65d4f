//! # treedrive-service
//!
//! Business logic service layer for TreeDrive. Each service orchestrates
//! repositories and the object store to implement application-level use
//! cases.
//!
//! Services follow constructor injection — all dependencies are provided
//! at construction time via `Arc` references.

pub mod access;
pub mod download;
pub mod tree;
pub mod upload;

pub use access::{AccessResolver, AccessService};
pub use download::DownloadService;
pub use tree::TreeService;
pub use upload::UploadService;
