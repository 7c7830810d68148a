//! Main ledger orchestration layer
//!
//! Ties storage, the single-writer actor and metrics into the wallet API used
//! by settlement and admin tooling.
//!
//! # Example
//!
//! ```no_run
//! use wallet_ledger::{Config, Ledger, Posting, TransactionType, WalletOwner};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let wallet = ledger
//!         .get_or_create_wallet(WalletOwner::Company("acme".to_string()))
//!         .await?;
//!     let posting = Posting::credit(wallet.id, TransactionType::Deposit, Decimal::new(50000, 2))
//!         .with_description("Recarga");
//!     ledger.post(posting).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    metrics::Metrics,
    types::{
        NewTransaction, OwnerType, Posting, PostingOutcome, TransactionType, Wallet, WalletOwner,
        WalletTransaction,
    },
    Config, Error, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let handle = spawn_ledger_actor(storage.clone(), config.mailbox_capacity);
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Wallet of an owner, if one exists
    pub fn get_wallet_by_owner(
        &self,
        owner_id: &str,
        owner_type: OwnerType,
    ) -> Result<Option<Wallet>> {
        self.storage
            .find_wallet_by_owner(&WalletOwner::from_parts(owner_id, owner_type))
    }

    /// Wallet by ID
    pub fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.storage.get_wallet(wallet_id)
    }

    /// The platform's singleton wallet (created on first use)
    pub async fn get_platform_wallet(&self) -> Result<Wallet> {
        if let Some(wallet) = self.storage.find_wallet_by_owner(&WalletOwner::Platform)? {
            return Ok(wallet);
        }
        self.handle.get_or_create_wallet(WalletOwner::Platform).await
    }

    /// Wallet of an owner, created lazily
    pub async fn get_or_create_wallet(&self, owner: WalletOwner) -> Result<Wallet> {
        if let Some(wallet) = self.storage.find_wallet_by_owner(&owner)? {
            return Ok(wallet);
        }
        self.handle.get_or_create_wallet(owner).await
    }

    /// Set the available balance verbatim (caller computes the value)
    pub async fn update_wallet_balance(
        &self,
        wallet_id: Uuid,
        new_available: Decimal,
    ) -> Result<Wallet> {
        self.handle.update_balance(wallet_id, new_available).await
    }

    /// Append a caller-computed ledger row
    pub async fn create_wallet_transaction(
        &self,
        entry: NewTransaction,
    ) -> Result<WalletTransaction> {
        let tx = self.handle.append_transaction(entry).await?;
        self.metrics.record_posting(tx.tx_type, "appended");
        Ok(tx)
    }

    /// Apply a posting: balance update and transaction append as one unit
    ///
    /// A posting whose (wallet, reference, type) already exists returns
    /// [`PostingOutcome::Duplicate`] and leaves the balance untouched.
    pub async fn post(&self, posting: Posting) -> Result<PostingOutcome> {
        let start = Instant::now();
        let tx_type = posting.tx_type;

        let result = self.handle.post(posting).await;

        self.metrics
            .record_posting_duration(start.elapsed().as_secs_f64());
        let status = match &result {
            Ok(PostingOutcome::Applied(_)) => "applied",
            Ok(PostingOutcome::Duplicate(_)) => "duplicate",
            Err(_) => "error",
        };
        self.metrics.record_posting(tx_type, status);

        result
    }

    /// Transaction history of a wallet in append order
    pub fn transactions_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        self.storage.wallet_transactions(wallet_id)
    }

    /// Transaction previously posted with this reference and type
    pub fn find_transaction(
        &self,
        wallet_id: Uuid,
        reference: &str,
        tx_type: TransactionType,
    ) -> Result<Option<WalletTransaction>> {
        self.storage.find_by_reference(wallet_id, tx_type, reference)
    }

    /// Replay a wallet's history and check it against the stored balance
    ///
    /// Verifies that every entry is balanced, entries chain (each
    /// `previous_balance` equals the prior `new_balance`) starting from zero,
    /// and that the final balance equals Σ amounts equals `available_balance`.
    pub fn verify_wallet(&self, wallet_id: Uuid) -> Result<bool> {
        let wallet = self.storage.get_wallet(wallet_id)?;
        let history = self.storage.wallet_transactions(wallet_id)?;

        let mut running = Decimal::ZERO;
        let mut total = Decimal::ZERO;

        for tx in &history {
            if !tx.is_balanced() || tx.previous_balance != running {
                tracing::error!(
                    wallet_id = %wallet_id,
                    transaction_id = %tx.id,
                    "Wallet history does not chain"
                );
                return Ok(false);
            }
            running = tx.new_balance;
            total += tx.amount;
        }

        Ok(total == wallet.available_balance && running == wallet.available_balance)
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down wallet ledger");
        self.handle.shutdown().await
    }
}
