//! Actor-based concurrency for the wallet ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One writer task applies every balance mutation in arrival order
//! - Read-compute-write of a balance never races another write
//! - Async message passing with backpressure (bounded mailbox)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Allocation jobs / admin API (many tasks)      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   dedupe reference → read wallet → compute balance   │
//! │                       │                               │
//! │                       ▼                               │
//! │           Storage::commit_posting()                   │
//! │        (one RocksDB write batch per posting)          │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::types::{
    money, NewTransaction, Posting, PostingOutcome, TransactionStatus, Wallet, WalletOwner,
    WalletTransaction,
};
use crate::{Error, Result, Storage};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Return the owner's wallet, creating it if missing
    GetOrCreateWallet {
        /// Wallet owner
        owner: WalletOwner,
        /// Reply channel
        response: oneshot::Sender<Result<Wallet>>,
    },

    /// Overwrite the available balance verbatim
    UpdateBalance {
        /// Wallet ID
        wallet_id: Uuid,
        /// New available balance
        new_available: Decimal,
        /// Reply channel
        response: oneshot::Sender<Result<Wallet>>,
    },

    /// Append a caller-computed transaction
    AppendTransaction {
        /// Entry to append
        entry: NewTransaction,
        /// Reply channel
        response: oneshot::Sender<Result<WalletTransaction>>,
    },

    /// Apply a posting atomically
    Post {
        /// Posting to apply
        posting: Posting,
        /// Reply channel
        response: oneshot::Sender<Result<PostingOutcome>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(storage: Arc<Storage>, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self { storage, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                LedgerMessage::GetOrCreateWallet { owner, response } => {
                    let _ = response.send(self.get_or_create_wallet(owner));
                }
                LedgerMessage::UpdateBalance {
                    wallet_id,
                    new_available,
                    response,
                } => {
                    let _ = response.send(self.update_balance(wallet_id, new_available));
                }
                LedgerMessage::AppendTransaction { entry, response } => {
                    let _ = response.send(self.append_transaction(entry));
                }
                LedgerMessage::Post { posting, response } => {
                    let result = self.apply_posting(posting);
                    if let Err(e) = &result {
                        tracing::error!("Posting failed: {}", e);
                    }
                    let _ = response.send(result);
                }
            }
        }

        tracing::info!("Ledger actor stopped");
    }

    fn get_or_create_wallet(&self, owner: WalletOwner) -> Result<Wallet> {
        if let Some(wallet) = self.storage.find_wallet_by_owner(&owner)? {
            return Ok(wallet);
        }

        let wallet = Wallet::new(&owner);
        self.storage.create_wallet(&wallet)?;
        tracing::info!(wallet_id = %wallet.id, owner = %owner, "Wallet created lazily");

        Ok(wallet)
    }

    fn update_balance(&self, wallet_id: Uuid, new_available: Decimal) -> Result<Wallet> {
        let mut wallet = self.storage.get_wallet(wallet_id)?;
        wallet.available_balance = money::normalize(new_available);
        wallet.updated_at = Utc::now();
        self.storage.put_wallet(&wallet)?;
        Ok(wallet)
    }

    fn append_transaction(&self, entry: NewTransaction) -> Result<WalletTransaction> {
        let mut wallet = self.storage.get_wallet(entry.wallet_id)?;
        wallet.version += 1;

        let tx = entry.into_transaction(wallet.version)?;
        self.storage.commit_posting(&wallet, &tx)?;

        Ok(tx)
    }

    fn apply_posting(&self, posting: Posting) -> Result<PostingOutcome> {
        if posting.amount.is_zero() {
            return Err(Error::InvalidEntry("Posting amount must be non-zero".to_string()));
        }

        if !money::is_cent_exact(posting.amount) {
            return Err(Error::InvalidEntry(format!(
                "Posting amount {} has sub-cent precision",
                posting.amount
            )));
        }

        if let Some(reference) = &posting.reference {
            if let Some(existing) =
                self.storage
                    .find_by_reference(posting.wallet_id, posting.tx_type, reference)?
            {
                tracing::warn!(
                    wallet_id = %posting.wallet_id,
                    tx_type = %posting.tx_type,
                    reference = %reference,
                    "Duplicate posting ignored"
                );
                return Ok(PostingOutcome::Duplicate(existing));
            }
        }

        let mut wallet = self.storage.get_wallet(posting.wallet_id)?;
        let previous_balance = wallet.available_balance;
        let new_balance = money::normalize(previous_balance + posting.amount);

        wallet.available_balance = new_balance;
        wallet.version += 1;
        wallet.updated_at = Utc::now();

        let tx = NewTransaction {
            wallet_id: wallet.id,
            tx_type: posting.tx_type,
            status: TransactionStatus::Completed,
            amount: posting.amount,
            previous_balance,
            new_balance,
            description: posting.description,
            reference: posting.reference,
        }
        .into_transaction(wallet.version)?;

        self.storage.commit_posting(&wallet, &tx)?;

        Ok(PostingOutcome::Applied(tx))
    }
}

/// Handle for sending messages to the ledger actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Actor response channel closed".to_string()))?
    }

    /// Get or create the owner's wallet
    pub async fn get_or_create_wallet(&self, owner: WalletOwner) -> Result<Wallet> {
        self.request(|response| LedgerMessage::GetOrCreateWallet { owner, response })
            .await
    }

    /// Overwrite the available balance
    pub async fn update_balance(&self, wallet_id: Uuid, new_available: Decimal) -> Result<Wallet> {
        self.request(|response| LedgerMessage::UpdateBalance {
            wallet_id,
            new_available,
            response,
        })
        .await
    }

    /// Append a caller-computed transaction
    pub async fn append_transaction(&self, entry: NewTransaction) -> Result<WalletTransaction> {
        self.request(|response| LedgerMessage::AppendTransaction { entry, response })
            .await
    }

    /// Apply a posting
    pub async fn post(&self, posting: Posting) -> Result<PostingOutcome> {
        self.request(|response| LedgerMessage::Post { posting, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        Ok(())
    }
}

/// Spawn ledger actor
pub fn spawn_ledger_actor(storage: Arc<Storage>, mailbox_capacity: usize) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));

    let actor = LedgerActor::new(storage, rx);
    tokio::spawn(actor.run());

    LedgerHandle::new(tx)
}
