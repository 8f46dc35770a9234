//! Ownership graph queries
//!
//! The graph is never materialised in memory: [`GroupTraversal`] reads the
//! edge tables of the store one company at a time while it walks.

mod traversal;

pub use traversal::{Depth, Direction, EdgeWindow, GroupMember, GroupTraversal, TraversalOptions};

/// Depth used when a query does not give one
pub const DEFAULT_MAX_DEPTH: u32 = 8;
