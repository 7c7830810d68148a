//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money, serialized as strings)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Currency helpers (2-digit precision)
pub mod money {
    use rust_decimal::{Decimal, RoundingStrategy};
    use std::str::FromStr;

    /// Currency scale (cents)
    pub const SCALE: u32 = 2;

    /// Round half away from zero to cents and fix the scale at 2
    pub fn normalize(amount: Decimal) -> Decimal {
        let mut rounded =
            amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(SCALE);
        rounded
    }

    /// True when the amount carries no sub-cent digits
    pub fn is_cent_exact(amount: Decimal) -> bool {
        normalize(amount) == amount
    }

    /// Fixed 2-decimal string ("100.00")
    pub fn format(amount: Decimal) -> String {
        normalize(amount).to_string()
    }

    /// Parse a decimal string, rejecting sub-cent precision
    pub fn parse(value: &str) -> crate::Result<Decimal> {
        let amount = Decimal::from_str(value.trim())
            .map_err(|e| crate::Error::InvalidEntry(format!("Invalid amount '{}': {}", value, e)))?;

        if !is_cent_exact(amount) {
            return Err(crate::Error::InvalidEntry(format!(
                "Amount '{}' has more than {} decimal places",
                value, SCALE
            )));
        }

        Ok(normalize(amount))
    }
}

/// Kind of wallet owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    /// Company paying for allocations
    Company,
    /// Driver receiving payouts
    Driver,
    /// The platform (commission holder)
    Platform,
}

impl OwnerType {
    /// Storage/wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::Company => "company",
            OwnerType::Driver => "driver",
            OwnerType::Platform => "platform",
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Owner of exactly one wallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletOwner {
    /// Company wallet
    Company(String),
    /// Driver wallet
    Driver(String),
    /// Platform singleton
    Platform,
}

impl WalletOwner {
    /// Owner type
    pub fn owner_type(&self) -> OwnerType {
        match self {
            WalletOwner::Company(_) => OwnerType::Company,
            WalletOwner::Driver(_) => OwnerType::Driver,
            WalletOwner::Platform => OwnerType::Platform,
        }
    }

    /// Owner ID (absent for the platform)
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            WalletOwner::Company(id) | WalletOwner::Driver(id) => Some(id),
            WalletOwner::Platform => None,
        }
    }

    /// Build from the (owner id, owner type) pair used by lookups
    pub fn from_parts(owner_id: &str, owner_type: OwnerType) -> Self {
        match owner_type {
            OwnerType::Company => WalletOwner::Company(owner_id.to_string()),
            OwnerType::Driver => WalletOwner::Driver(owner_id.to_string()),
            OwnerType::Platform => WalletOwner::Platform,
        }
    }
}

impl fmt::Display for WalletOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner_id() {
            Some(id) => write!(f, "{}:{}", self.owner_type(), id),
            None => write!(f, "{}", self.owner_type()),
        }
    }
}

/// Wallet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    /// Normal operation
    Active,
    /// Frozen by an operator
    Suspended,
}

/// Balance holder for one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: Uuid,

    /// Owner ID (None for the platform wallet)
    pub owner_id: Option<String>,

    /// Owner type
    pub owner_type: OwnerType,

    /// Authoritative spendable balance
    pub available_balance: Decimal,

    /// Balance held for pending operations
    pub blocked_balance: Decimal,

    /// Status
    pub status: WalletStatus,

    /// Number of transactions applied (last transaction sequence)
    pub version: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// New empty wallet for an owner
    pub fn new(owner: &WalletOwner) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_id: owner.owner_id().map(str::to_string),
            owner_type: owner.owner_type(),
            available_balance: money::normalize(Decimal::ZERO),
            blocked_balance: money::normalize(Decimal::ZERO),
            status: WalletStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Owner of this wallet
    pub fn owner(&self) -> WalletOwner {
        match (&self.owner_id, self.owner_type) {
            (Some(id), owner_type) => WalletOwner::from_parts(id, owner_type),
            (None, _) => WalletOwner::Platform,
        }
    }
}

/// Ledger transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Company charged for an allocation
    AllocationDebit,
    /// Driver paid for an allocation
    AllocationCredit,
    /// Platform commission for an allocation
    AllocationCommission,
    /// Funds added (top-up)
    Deposit,
    /// Funds withdrawn (payout)
    Withdrawal,
    /// Manual correction
    Adjustment,
}

impl TransactionType {
    /// Storage/wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::AllocationDebit => "allocation_debit",
            TransactionType::AllocationCredit => "allocation_credit",
            TransactionType::AllocationCommission => "allocation_commission",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Applied to the balance
    Completed,
    /// Recorded, not yet applied
    Pending,
    /// Rejected
    Failed,
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Wallet this entry belongs to
    pub wallet_id: Uuid,

    /// Position in the wallet's history (1-based)
    pub sequence: u64,

    /// Type
    pub tx_type: TransactionType,

    /// Status
    pub status: TransactionStatus,

    /// Signed amount (negative = debit)
    pub amount: Decimal,

    /// Balance before this entry
    pub previous_balance: Decimal,

    /// Balance after this entry
    pub new_balance: Decimal,

    /// Human-readable description
    pub description: String,

    /// Idempotency tag (e.g. allocation ID)
    pub reference: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// `new_balance == previous_balance + amount`
    pub fn is_balanced(&self) -> bool {
        self.previous_balance + self.amount == self.new_balance
    }
}

/// Caller-computed ledger entry for `create_wallet_transaction`
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Wallet ID
    pub wallet_id: Uuid,
    /// Type
    pub tx_type: TransactionType,
    /// Status
    pub status: TransactionStatus,
    /// Signed amount
    pub amount: Decimal,
    /// Balance before
    pub previous_balance: Decimal,
    /// Balance after
    pub new_balance: Decimal,
    /// Description
    pub description: String,
    /// Idempotency tag
    pub reference: Option<String>,
}

impl NewTransaction {
    /// Materialize into a stored transaction, checking the balance equation
    pub fn into_transaction(self, sequence: u64) -> crate::Result<WalletTransaction> {
        let tx = WalletTransaction {
            id: Uuid::now_v7(),
            wallet_id: self.wallet_id,
            sequence,
            tx_type: self.tx_type,
            status: self.status,
            amount: money::normalize(self.amount),
            previous_balance: money::normalize(self.previous_balance),
            new_balance: money::normalize(self.new_balance),
            description: self.description,
            reference: self.reference,
            created_at: Utc::now(),
        };

        if !tx.is_balanced() {
            return Err(crate::Error::InvariantViolation(format!(
                "{} + {} != {}",
                tx.previous_balance, tx.amount, tx.new_balance
            )));
        }

        Ok(tx)
    }
}

/// Balance movement applied atomically by the ledger
#[derive(Debug, Clone)]
pub struct Posting {
    /// Target wallet
    pub wallet_id: Uuid,
    /// Type
    pub tx_type: TransactionType,
    /// Signed amount (negative = debit)
    pub amount: Decimal,
    /// Description
    pub description: String,
    /// Idempotency tag; a second posting with the same (wallet, reference, type) is a no-op
    pub reference: Option<String>,
}

impl Posting {
    /// Credit `amount` to a wallet
    pub fn credit(wallet_id: Uuid, tx_type: TransactionType, amount: Decimal) -> Self {
        Self {
            wallet_id,
            tx_type,
            amount: amount.abs(),
            description: String::new(),
            reference: None,
        }
    }

    /// Debit `amount` from a wallet
    pub fn debit(wallet_id: Uuid, tx_type: TransactionType, amount: Decimal) -> Self {
        Self {
            wallet_id,
            tx_type,
            amount: -amount.abs(),
            description: String::new(),
            reference: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set idempotency reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Result of a posting
#[derive(Debug, Clone, PartialEq)]
pub enum PostingOutcome {
    /// Balance moved; new transaction appended
    Applied(WalletTransaction),
    /// Same reference/type already posted; nothing changed
    Duplicate(WalletTransaction),
}

impl PostingOutcome {
    /// Transaction that represents this posting
    pub fn transaction(&self) -> &WalletTransaction {
        match self {
            PostingOutcome::Applied(tx) | PostingOutcome::Duplicate(tx) => tx,
        }
    }

    /// Was this a replay of an existing posting
    pub fn is_duplicate(&self) -> bool {
        matches!(self, PostingOutcome::Duplicate(_))
    }
}
