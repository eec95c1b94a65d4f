//! # treedrive-core
//!
//! Core crate for TreeDrive. Contains the object-store trait,
//! configuration schemas, pagination types, and the unified
//! error system.
//!
//! This crate has **no** internal dependencies on other TreeDrive crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
