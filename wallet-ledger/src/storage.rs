//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet rows (key: wallet_id)
//! - `transactions` - Append-only transaction log (key: transaction_id)
//! - `indices` - Secondary indices for owner, wallet history and reference lookups

use crate::{
    error::{Error, Result},
    types::{TransactionType, Wallet, WalletOwner, WalletTransaction},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";

/// Index key prefixes
const IDX_OWNER: &[u8] = b"o|";
const IDX_WALLET_TX: &[u8] = b"w|";
const IDX_REFERENCE: &[u8] = b"r|";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_zstd()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_lz4()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened wallet ledger storage");

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_lz4() -> Options {
        let mut opts = Options::default();
        // Point lookups dominate, favour speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_zstd() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Wallet operations

    /// Insert a new wallet together with its owner index (atomic)
    pub fn create_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, wallet.id.as_bytes(), bincode::serialize(wallet)?);
        batch.put_cf(
            &cf_indices,
            Self::index_key_owner(&wallet.owner()),
            wallet.id.as_bytes(),
        );
        self.db.write(batch)?;

        tracing::debug!(wallet_id = %wallet.id, owner = %wallet.owner(), "Wallet created");

        Ok(())
    }

    /// Overwrite a wallet row
    pub fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf_handle(CF_WALLETS)?;
        self.db
            .put_cf(&cf, wallet.id.as_bytes(), bincode::serialize(wallet)?)?;
        Ok(())
    }

    /// Get wallet by ID
    pub fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let cf = self.cf_handle(CF_WALLETS)?;

        let value = self
            .db
            .get_cf(&cf, wallet_id.as_bytes())?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Find the wallet belonging to an owner
    pub fn find_wallet_by_owner(&self, owner: &WalletOwner) -> Result<Option<Wallet>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let Some(id_bytes) = self.db.get_cf(&cf_indices, Self::index_key_owner(owner))? else {
            return Ok(None);
        };

        let wallet_id = Self::uuid_from_slice(&id_bytes)?;
        self.get_wallet(wallet_id).map(Some)
    }

    /// All wallets (admin/reconciliation use)
    pub fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;

        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            wallets.push(bincode::deserialize(&value)?);
        }

        Ok(wallets)
    }

    // Transaction operations

    /// Append a transaction and its indices (atomic)
    pub fn append_transaction(&self, tx: &WalletTransaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_transaction(&mut batch, tx)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Persist the new wallet row and its transaction in one write batch
    pub fn commit_posting(&self, wallet: &Wallet, tx: &WalletTransaction) -> Result<()> {
        let cf_wallets = self.cf_handle(CF_WALLETS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, wallet.id.as_bytes(), bincode::serialize(wallet)?);
        self.stage_transaction(&mut batch, tx)?;

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            wallet_id = %wallet.id,
            transaction_id = %tx.id,
            tx_type = %tx.tx_type,
            amount = %tx.amount,
            "Posting committed"
        );

        Ok(())
    }

    fn stage_transaction(&self, batch: &mut WriteBatch, tx: &WalletTransaction) -> Result<()> {
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        batch.put_cf(&cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);

        // Index: wallet_id || sequence -> transaction_id
        batch.put_cf(
            &cf_indices,
            Self::index_key_wallet_tx(tx.wallet_id, Some(tx.sequence)),
            tx.id.as_bytes(),
        );

        // Index: wallet_id || type || reference -> transaction_id
        if let Some(reference) = &tx.reference {
            batch.put_cf(
                &cf_indices,
                Self::index_key_reference(tx.wallet_id, tx.tx_type, reference),
                tx.id.as_bytes(),
            );
        }

        Ok(())
    }

    /// Get transaction by ID
    pub fn get_transaction(&self, tx_id: Uuid) -> Result<WalletTransaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        let value = self
            .db
            .get_cf(&cf, tx_id.as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(tx_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Transactions of a wallet in append order
    pub fn wallet_transactions(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_wallet_tx(wallet_id, None);

        let iter = self
            .db
            .iterator_cf(&cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut transactions = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let tx_id = Self::uuid_from_slice(&value)?;
            transactions.push(self.get_transaction(tx_id)?);
        }

        Ok(transactions)
    }

    /// Find a transaction by its idempotency reference
    pub fn find_by_reference(
        &self,
        wallet_id: Uuid,
        tx_type: TransactionType,
        reference: &str,
    ) -> Result<Option<WalletTransaction>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key_reference(wallet_id, tx_type, reference);

        match self.db.get_cf(&cf_indices, key)? {
            Some(id_bytes) => {
                let tx_id = Self::uuid_from_slice(&id_bytes)?;
                self.get_transaction(tx_id).map(Some)
            }
            None => Ok(None),
        }
    }

    // Index key helpers

    fn index_key_owner(owner: &WalletOwner) -> Vec<u8> {
        let mut key = IDX_OWNER.to_vec();
        key.extend_from_slice(owner.owner_type().as_str().as_bytes());
        key.push(b'|');
        if let Some(id) = owner.owner_id() {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    fn index_key_wallet_tx(wallet_id: Uuid, sequence: Option<u64>) -> Vec<u8> {
        let mut key = IDX_WALLET_TX.to_vec();
        key.extend_from_slice(wallet_id.as_bytes());
        if let Some(seq) = sequence {
            // Big-endian keeps lexicographic order == numeric order
            key.extend_from_slice(&seq.to_be_bytes());
        }
        key
    }

    fn index_key_reference(wallet_id: Uuid, tx_type: TransactionType, reference: &str) -> Vec<u8> {
        let mut key = IDX_REFERENCE.to_vec();
        key.extend_from_slice(wallet_id.as_bytes());
        key.extend_from_slice(tx_type.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(reference.as_bytes());
        key
    }

    fn uuid_from_slice(bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes).map_err(|e| Error::Storage(format!("Corrupt index entry: {}", e)))
    }
}
