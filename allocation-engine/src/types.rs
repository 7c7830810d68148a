//! Core types for the allocation engine

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use wallet_ledger::money;

use crate::{Error, Result};

/// Allocation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Waiting for a driver to accept
    Pending,
    /// A driver accepted, window not started yet
    Accepted,
    /// Window running
    InProgress,
    /// Window closed (terminal)
    Completed,
    /// Nobody accepted in time (terminal)
    Expired,
}

impl AllocationStatus {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: AllocationStatus) -> bool {
        use AllocationStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Expired)
                | (Accepted, InProgress)
                | (Accepted, Completed)
                | (InProgress, Completed)
        )
    }

    /// Terminal states are never left
    pub fn is_terminal(&self) -> bool {
        matches!(self, AllocationStatus::Completed | AllocationStatus::Expired)
    }

    /// Storage/wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Pending => "pending",
            AllocationStatus::Accepted => "accepted",
            AllocationStatus::InProgress => "in_progress",
            AllocationStatus::Completed => "completed",
            AllocationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation of one driver for one company over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocation ID
    pub id: Uuid,

    /// Requesting company
    pub company_id: String,

    /// Assigned driver (set on acceptance)
    pub driver_id: Option<String>,

    /// Local calendar date of the window
    pub allocation_date: NaiveDate,

    /// Local start time (whole seconds)
    pub start_time: NaiveTime,

    /// Local end time (whole seconds)
    pub end_time: NaiveTime,

    /// Status
    pub status: AllocationStatus,

    /// Amount charged to the company
    pub total_amount: Decimal,

    /// Driver payout
    pub driver_amount: Decimal,

    /// Platform commission
    pub commission_amount: Decimal,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Set when the window starts
    pub started_at: Option<DateTime<Utc>>,

    /// Set when the window closes
    pub completed_at: Option<DateTime<Utc>>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl Allocation {
    /// driver + commission == total, to the cent
    pub fn amounts_balanced(&self) -> bool {
        money::normalize(self.driver_amount + self.commission_amount)
            == money::normalize(self.total_amount)
    }
}

/// Offer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Sent, awaiting an answer
    Notified,
    /// Timed out or superseded
    Expired,
    /// Driver took the allocation
    Accepted,
    /// Driver turned it down
    Declined,
}

impl AlertStatus {
    /// Storage/wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Notified => "notified",
            AlertStatus::Expired => "expired",
            AlertStatus::Accepted => "accepted",
            AlertStatus::Declined => "declined",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-boxed offer of a pending allocation to one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationAlert {
    /// Alert ID
    pub id: Uuid,

    /// Offered allocation
    pub allocation_id: Uuid,

    /// Candidate driver
    pub driver_id: String,

    /// Status
    pub status: AlertStatus,

    /// Offer deadline
    pub expires_at: DateTime<Utc>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl AllocationAlert {
    /// Unanswered and past its deadline
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == AlertStatus::Notified && now >= self.expires_at
    }
}

/// How a company pays for allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingMode {
    /// Prepaid: settled from the company wallet when the window closes
    #[serde(rename = "PRE_PAGO")]
    PrePago,
    /// Postpaid: invoiced weekly, no wallet movement
    #[serde(rename = "BOLETO")]
    Boleto,
}

/// Company requesting allocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Company ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Billing mode
    pub billing_mode: BillingMode,
}

/// Driver fulfilling allocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    /// Driver ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Device push token, cleared when the provider reports it unregistered
    pub push_token: Option<String>,
}

/// Runtime settings read once per tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds a driver has to answer an offer
    pub driver_acceptance_timeout_secs: u64,

    /// Platform share of the total, in percent
    pub platform_commission_percent: Decimal,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            driver_acceptance_timeout_secs: 30,
            platform_commission_percent: Decimal::from(20),
        }
    }
}

impl Settings {
    /// Longest offer deadline accepted (one day)
    pub const MAX_ACCEPTANCE_TIMEOUT_SECS: u64 = 86_400;

    /// Reject values the periodic checks cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.driver_acceptance_timeout_secs == 0
            || self.driver_acceptance_timeout_secs > Self::MAX_ACCEPTANCE_TIMEOUT_SECS
        {
            return Err(Error::Config(format!(
                "Driver acceptance timeout {}s outside 1..={}",
                self.driver_acceptance_timeout_secs,
                Self::MAX_ACCEPTANCE_TIMEOUT_SECS
            )));
        }
        if self.platform_commission_percent < Decimal::ZERO
            || self.platform_commission_percent > Decimal::ONE_HUNDRED
        {
            return Err(Error::Config(format!(
                "Platform commission {}% outside 0..=100",
                self.platform_commission_percent
            )));
        }
        Ok(())
    }

    /// Offer deadline length
    pub fn acceptance_timeout(&self) -> Result<chrono::Duration> {
        i64::try_from(self.driver_acceptance_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .filter(|timeout| *timeout > chrono::Duration::zero())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Driver acceptance timeout out of range: {}s",
                    self.driver_acceptance_timeout_secs
                ))
            })
    }

    /// Age after which a pending allocation expires (2x the offer timeout)
    pub fn pending_expiry(&self) -> Result<chrono::Duration> {
        let timeout = self.acceptance_timeout()?;
        timeout.checked_add(&timeout).ok_or_else(|| {
            Error::Config(format!(
                "Pending expiry out of range: 2 x {}s",
                self.driver_acceptance_timeout_secs
            ))
        })
    }

    /// Deadline of an offer made at `now`
    pub fn offer_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_add_signed(self.acceptance_timeout()?)
            .ok_or_else(|| Error::Config(format!("Offer deadline after {} overflows", now)))
    }

    /// Pending allocations created at or before this instant have expired
    pub fn pending_cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_sub_signed(self.pending_expiry()?)
            .ok_or_else(|| Error::Config(format!("Pending cutoff before {} overflows", now)))
    }
}

/// Company request for exclusive driver capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAllocation {
    /// Requesting company
    pub company_id: String,

    /// Local calendar date
    pub allocation_date: NaiveDate,

    /// Local start time
    pub start_time: NaiveTime,

    /// Local end time
    pub end_time: NaiveTime,

    /// Amount charged to the company
    pub total_amount: Decimal,
}

/// Driver/commission split of a total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountSplit {
    /// Total
    pub total: Decimal,
    /// Driver share
    pub driver: Decimal,
    /// Platform share
    pub commission: Decimal,
}

impl AmountSplit {
    /// Split `total` giving the platform `commission_percent`.
    ///
    /// The driver share is rounded half away from zero to cents and the
    /// commission takes the remainder, so the two always sum to the total.
    pub fn compute(total: Decimal, commission_percent: Decimal) -> Result<Self> {
        if total <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "Total amount must be positive, got {}",
                total
            )));
        }
        if !money::is_cent_exact(total) {
            return Err(Error::InvalidRequest(format!(
                "Total amount {} has more than 2 decimal places",
                total
            )));
        }
        if commission_percent < Decimal::ZERO || commission_percent > Decimal::ONE_HUNDRED {
            return Err(Error::InvalidRequest(format!(
                "Commission percent {} outside 0..=100",
                commission_percent
            )));
        }

        let total = money::normalize(total);
        let driver = money::normalize(
            total * (Decimal::ONE_HUNDRED - commission_percent) / Decimal::ONE_HUNDRED,
        );
        let commission = money::normalize(total - driver);

        Ok(Self {
            total,
            driver,
            commission,
        })
    }
}

/// Outcome of one pass of a periodic check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Rows returned by the query
    pub examined: usize,
    /// Rows moved to their next status
    pub transitioned: usize,
    /// Rows another pass had already moved
    pub skipped: usize,
    /// Rows skipped because of a data error
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_transition_table() {
        use AllocationStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Expired));
        assert!(Accepted.can_transition_to(InProgress));
        assert!(Accepted.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Expired));
        assert!(!Accepted.can_transition_to(Expired));
        for terminal in [Completed, Expired] {
            for next in [Pending, Accepted, InProgress, Completed, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn test_split_default_commission() {
        let split = AmountSplit::compute(dec("100.00"), dec("20")).unwrap();
        assert_eq!(split.driver, dec("80.00"));
        assert_eq!(split.commission, dec("20.00"));
    }

    #[test]
    fn test_split_rounds_driver_half_away_from_zero() {
        // 0.05 * 0.85 = 0.0425 -> 0.04, commission takes 0.01
        let split = AmountSplit::compute(dec("0.05"), dec("15")).unwrap();
        assert_eq!(split.driver, dec("0.04"));
        assert_eq!(split.commission, dec("0.01"));

        // 10.01 * 0.5 = 5.005 -> 5.01
        let split = AmountSplit::compute(dec("10.01"), dec("50")).unwrap();
        assert_eq!(split.driver, dec("5.01"));
        assert_eq!(split.commission, dec("5.00"));
    }

    #[test]
    fn test_split_rejects_bad_totals() {
        assert!(AmountSplit::compute(Decimal::ZERO, dec("20")).is_err());
        assert!(AmountSplit::compute(dec("-1.00"), dec("20")).is_err());
        assert!(AmountSplit::compute(dec("1.001"), dec("20")).is_err());
        assert!(AmountSplit::compute(dec("1.00"), dec("101")).is_err());
    }

    #[test]
    fn test_billing_mode_names() {
        assert_eq!(serde_json::to_string(&BillingMode::PrePago).unwrap(), "\"PRE_PAGO\"");
        assert_eq!(serde_json::to_string(&BillingMode::Boleto).unwrap(), "\"BOLETO\"");
    }

    #[test]
    fn test_settings_pending_expiry() {
        let settings = Settings::default();
        assert_eq!(settings.pending_expiry().unwrap(), chrono::Duration::seconds(60));
        assert!(settings.validate().is_ok());

        let now = Utc::now();
        assert_eq!(
            settings.pending_cutoff(now).unwrap(),
            now - chrono::Duration::seconds(60)
        );
        assert_eq!(
            settings.offer_deadline(now).unwrap(),
            now + chrono::Duration::seconds(30)
        );
    }

    #[test]
    fn test_settings_timeout_above_i64_is_rejected() {
        let settings = Settings {
            driver_acceptance_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(settings.acceptance_timeout(), Err(Error::Config(_))));
        assert!(matches!(settings.pending_cutoff(Utc::now()), Err(Error::Config(_))));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_cutoff_overflow_is_an_error() {
        let settings = Settings {
            driver_acceptance_timeout_secs: 10_000_000_000_000,
            ..Default::default()
        };
        let now = Utc::now();
        assert!(matches!(settings.pending_cutoff(now), Err(Error::Config(_))));
        assert!(matches!(settings.offer_deadline(now), Err(Error::Config(_))));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_validate_bounds() {
        let zero = Settings {
            driver_acceptance_timeout_secs: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        assert!(zero.acceptance_timeout().is_err());

        let max = Settings {
            driver_acceptance_timeout_secs: Settings::MAX_ACCEPTANCE_TIMEOUT_SECS,
            ..Default::default()
        };
        assert!(max.validate().is_ok());

        let commission = Settings {
            platform_commission_percent: Decimal::from(101),
            ..Default::default()
        };
        assert!(commission.validate().is_err());
    }

    #[test]
    fn test_alert_overdue_at_deadline() {
        let now = Utc::now();
        let alert = AllocationAlert {
            id: Uuid::now_v7(),
            allocation_id: Uuid::now_v7(),
            driver_id: "d1".into(),
            status: AlertStatus::Notified,
            expires_at: now,
            created_at: now,
            updated_at: now,
        };
        assert!(alert.is_overdue(now));
        assert!(!alert.is_overdue(now - chrono::Duration::seconds(1)));
    }
}
