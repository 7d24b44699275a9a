// src/error.rs

use thiserror::Error;

/// Errors produced by the payment ledger and the cycle operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("no pending due date left for this participant")]
    NoPendingDueDate,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("a settled payment already exists for this due date")]
    DuplicatePayment,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// True when the sqlx error is a Postgres unique violation (23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.code().as_deref() == Some("23505"))
}
