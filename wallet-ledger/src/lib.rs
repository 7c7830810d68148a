//! Wallet Ledger
//!
//! Per-owner wallets (company, driver, platform) with an append-only
//! transaction log.
//!
//! # Architecture
//!
//! - **Single Writer**: one actor task applies every mutation, so the
//!   read-compute-write of a balance never interleaves with another write
//! - **Atomic postings**: balance update and transaction append land in one
//!   RocksDB write batch
//! - **Exact arithmetic**: `Decimal` amounts at 2-digit currency precision
//!
//! # Invariants
//!
//! - `new_balance == previous_balance + amount` for every transaction
//! - Σ(transaction amounts) == available balance for every wallet
//! - Append-only: transactions are never modified or deleted
//! - A (wallet, reference, type) triple is posted at most once

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use storage::Storage;
pub use types::{
    money, NewTransaction, OwnerType, Posting, PostingOutcome, TransactionStatus,
    TransactionType, Wallet, WalletOwner, WalletStatus, WalletTransaction,
};
