//! Error types for the lock engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Rejected at the API boundary by the core model.
    #[error(transparent)]
    Core(#[from] trilock_core::Error),

    /// The engine task has exited and no longer accepts commands.
    #[error("Lock engine is not running")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, EngineError>;
