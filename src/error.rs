//! Crate error types.

/// Why a waiting operation gave up before finishing.
///
/// Interruptions are benign: seeks return them alongside partial results,
/// and the maintenance loops swallow them.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The owning [`crate::Dht`] was shut down.
    #[error("operation cancelled")]
    Cancelled,
    /// The deadline passed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}
