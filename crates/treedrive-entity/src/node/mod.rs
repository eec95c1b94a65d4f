//! Tree node entity: files and folders in the user hierarchy.

pub mod model;
pub mod tree;

pub use model::{CreateNode, Node, NodeKind, NodeStatus};
