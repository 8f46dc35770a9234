//! Derived index over the stored companies
//!
//! Features:
//! - Derived per-company fields (employee trend, active shareholders, board size)
//! - Ownership edge tables in both directions, with holders resolved to
//!   companies where possible
//! - Person index over personnel, shareholders and beneficial owners
//! - Generation swap so readers never see a half-built index

mod builder;

pub use builder::{derive_fields, resolve_holder, BuildMode, BuildReport, IndexBuildError, IndexBuilder};
