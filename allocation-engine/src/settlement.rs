//! Wallet settlement of a closed allocation window
//!
//! Prepaid companies pay from their wallet when the window closes: the
//! company is debited the total, the driver credited their share and the
//! platform credited the commission, in that order. Each leg is posted with
//! the allocation id as its reference, so a leg that already exists is
//! reported as a duplicate and not applied again. Postpaid (BOLETO) companies
//! are invoiced weekly outside this engine.

use crate::{
    metrics::Metrics,
    store::Store,
    types::{Allocation, BillingMode},
    Error, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wallet_ledger::{
    Ledger, OwnerType, Posting, PostingOutcome, TransactionType, WalletOwner, WalletTransaction,
};

/// Ledger rows produced by a settlement
#[derive(Debug, Clone, Default)]
pub struct SettlementLegs {
    /// Company debit
    pub company_debit: Option<WalletTransaction>,
    /// Driver credit
    pub driver_credit: Option<WalletTransaction>,
    /// Platform commission credit
    pub platform_credit: Option<WalletTransaction>,
    /// Legs found already posted by an earlier attempt
    pub replayed: usize,
}

/// Result of settling one allocation
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    /// Wallets moved (or had already moved)
    Settled(SettlementLegs),
    /// Postpaid company, nothing to move
    Deferred,
}

struct Leg {
    wallet_id: Uuid,
    tx_type: TransactionType,
    amount: Decimal,
    description: String,
}

/// Moves money between company, driver and platform wallets
#[derive(Clone)]
pub struct Settler {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    metrics: Metrics,
}

impl Settler {
    /// Create a settler
    pub fn new(store: Arc<Store>, ledger: Arc<Ledger>, metrics: Metrics) -> Self {
        Self {
            store,
            ledger,
            metrics,
        }
    }

    /// Settle one allocation.
    ///
    /// A failing leg returns the error and stops the later legs; legs that
    /// were applied stay applied and are skipped on the next attempt.
    pub async fn settle(&self, allocation: &Allocation) -> Result<SettlementOutcome> {
        let company = self
            .store
            .get_company(&allocation.company_id)?
            .ok_or_else(|| Error::CompanyNotFound(allocation.company_id.clone()))?;

        if company.billing_mode == BillingMode::Boleto {
            debug!(
                allocation_id = %allocation.id,
                company_id = %company.id,
                "Postpaid company, settlement deferred to weekly billing"
            );
            self.metrics.record_settlement("deferred");
            return Ok(SettlementOutcome::Deferred);
        }

        let driver_id = allocation
            .driver_id
            .as_deref()
            .ok_or(Error::MissingDriver(allocation.id))?;

        let company_wallet = self
            .ledger
            .get_wallet_by_owner(&company.id, OwnerType::Company)?
            .ok_or_else(|| Error::WalletNotFound(company.id.clone()))?;

        if company_wallet.available_balance < allocation.total_amount {
            warn!(
                allocation_id = %allocation.id,
                company_id = %company.id,
                balance = %company_wallet.available_balance,
                total = %allocation.total_amount,
                "Company balance does not cover allocation, wallet goes negative"
            );
        }

        let driver_wallet = self
            .ledger
            .get_or_create_wallet(WalletOwner::Driver(driver_id.to_string()))
            .await?;
        let platform_wallet = self.ledger.get_platform_wallet().await?;

        let legs = [
            Leg {
                wallet_id: company_wallet.id,
                tx_type: TransactionType::AllocationDebit,
                amount: -allocation.total_amount,
                description: format!("Débito da alocação {}", allocation.id),
            },
            Leg {
                wallet_id: driver_wallet.id,
                tx_type: TransactionType::AllocationCredit,
                amount: allocation.driver_amount,
                description: format!("Pagamento da alocação {}", allocation.id),
            },
            Leg {
                wallet_id: platform_wallet.id,
                tx_type: TransactionType::AllocationCommission,
                amount: allocation.commission_amount,
                description: format!("Comissão da alocação {}", allocation.id),
            },
        ];

        let reference = allocation.id.to_string();
        let mut result = SettlementLegs::default();

        for leg in legs {
            if leg.amount.is_zero() {
                continue;
            }

            let tx_type = leg.tx_type;
            let posting = Posting {
                wallet_id: leg.wallet_id,
                tx_type,
                amount: leg.amount,
                description: leg.description,
                reference: Some(reference.clone()),
            };

            let tx = match self.ledger.post(posting).await? {
                PostingOutcome::Applied(tx) => tx,
                PostingOutcome::Duplicate(tx) => {
                    result.replayed += 1;
                    tx
                }
            };

            match tx_type {
                TransactionType::AllocationDebit => result.company_debit = Some(tx),
                TransactionType::AllocationCredit => result.driver_credit = Some(tx),
                _ => result.platform_credit = Some(tx),
            }
        }

        info!(
            allocation_id = %allocation.id,
            company_id = %company.id,
            driver_id = %driver_id,
            total = %allocation.total_amount,
            replayed = result.replayed,
            "Allocation settled"
        );
        self.metrics.record_settlement("settled");

        Ok(SettlementOutcome::Settled(result))
    }
}
