//! Shared domain types for the DUE sync workspace.
//!
//! Every other crate in the workspace depends on this one for the identifiers
//! and partitions that show up at every seam: invoice keys, DUE numbers, and
//! the Cancelled/Pending/Settled situation split that governs refresh
//! eligibility.

mod ids;
mod situation;
mod summary;

pub use ids::{DueNumber, IdError, InvoiceKey};
pub use situation::SituationPartitions;
pub use summary::{ErrorCategory, RunSummary};
