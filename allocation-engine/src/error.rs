//! Error types for the allocation engine

use crate::types::AllocationStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type for allocation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Allocation engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Wallet ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] wallet_ledger::Error),

    /// Notification bridge error
    #[error("Notification error: {0}")]
    Notification(#[from] notification_bridge::Error),

    /// Record store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Allocation not found
    #[error("Allocation not found: {0}")]
    AllocationNotFound(Uuid),

    /// Alert not found
    #[error("Alert not found: {0}")]
    AlertNotFound(Uuid),

    /// Company not found
    #[error("Company not found: {0}")]
    CompanyNotFound(String),

    /// Driver not found
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Company wallet missing
    #[error("Wallet not found for company {0}")]
    WalletNotFound(String),

    /// Accepted or running allocation without a driver
    #[error("Allocation {0} has no driver")]
    MissingDriver(Uuid),

    /// Status change not allowed by the lifecycle
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Allocation ID
        id: Uuid,
        /// Current status
        from: AllocationStatus,
        /// Requested status
        to: AllocationStatus,
    },

    /// Offer can no longer be answered
    #[error("Offer unavailable: {0}")]
    OfferUnavailable(String),

    /// Rejected request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Data problem confined to one row.
    ///
    /// Periodic checks log these and move on to the next row; anything else
    /// aborts the pass until the next tick.
    pub fn is_row_level(&self) -> bool {
        match self {
            Error::AllocationNotFound(_)
            | Error::AlertNotFound(_)
            | Error::CompanyNotFound(_)
            | Error::DriverNotFound(_)
            | Error::WalletNotFound(_)
            | Error::MissingDriver(_)
            | Error::InvalidTransition { .. }
            | Error::OfferUnavailable(_)
            | Error::InvalidRequest(_) => true,
            Error::Ledger(inner) => matches!(
                inner,
                wallet_ledger::Error::WalletNotFound(_) | wallet_ledger::Error::InvalidEntry(_)
            ),
            _ => false,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
