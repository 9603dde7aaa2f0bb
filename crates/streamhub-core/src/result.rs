//! Convenience result type alias for StreamHub.

use crate::error::AppError;

/// A specialized `Result` type for StreamHub operations.
pub type AppResult<T> = Result<T, AppError>;
