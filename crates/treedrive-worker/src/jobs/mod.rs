//! Concrete job handlers.

pub mod bundle;
pub mod cleanup;

pub use bundle::BundleHandler;
pub use cleanup::BundleExpiryHandler;
