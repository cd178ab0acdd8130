//! Error types for the stream-clipper application

pub mod types;

pub use types::*;

/// Convenience result alias for the application error type
pub type AppResult<T> = Result<T, AppError>;
