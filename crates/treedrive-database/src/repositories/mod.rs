//! Concrete repository implementations backed by PostgreSQL.

pub mod bundle;
pub mod grant;
pub mod job;
pub mod node;
pub mod usage;
pub mod user;
pub mod version;

pub use bundle::BundleRepository;
pub use grant::GrantRepository;
pub use job::JobRepository;
pub use node::NodeRepository;
pub use usage::UsageRepository;
pub use user::UserRepository;
pub use version::VersionRepository;
