//! Shared value types.

pub mod id;
pub mod pagination;
pub mod transaction;
pub mod viewers;

pub use id::{CategoryId, StreamId, UserId};
pub use pagination::PageRequest;
pub use transaction::{CommitOutcome, Guard, StoreOp, Transaction};
pub use viewers::{ViewerMergePolicy, ViewerSource};
