//! Casebridge core contracts and value types.
//!
//! This crate exposes the case payload model shared by the workflow jobs, the
//! `CaseApi` client seam against the engagement platform, and the case
//! reconciliation protocol that guarantees at most one open case per contact.
pub mod client;
pub mod format;
pub mod model;
pub mod reconcile;

pub use client::*;
pub use format::*;
pub use model::*;
pub use reconcile::*;
