//! Allocation record store using RocksDB
//!
//! # Column Families
//!
//! - `allocations` - Allocation rows (key: allocation_id)
//! - `alerts` - Driver offers (key: alert_id)
//! - `companies` - Company rows (key: company id)
//! - `drivers` - Driver rows (key: driver id)
//! - `settings` - Operator settings (single row)
//!
//! Status changes are compare-and-set: the current status is re-read under the
//! store's transition lock and the write only happens if it still matches.
//! Lookups are whole-table scans evaluated on every tick.

use crate::{
    error::{Error, Result},
    types::{
        AlertStatus, Allocation, AllocationAlert, AllocationStatus, Company, Driver, Settings,
    },
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Column family names
const CF_ALLOCATIONS: &str = "allocations";
const CF_ALERTS: &str = "alerts";
const CF_COMPANIES: &str = "companies";
const CF_DRIVERS: &str = "drivers";
const CF_SETTINGS: &str = "settings";

const SETTINGS_KEY: &[u8] = b"current";

/// Result of a successful offer acceptance
#[derive(Debug, Clone)]
pub struct Acceptance {
    /// The accepted alert
    pub alert: AllocationAlert,
    /// The allocation, now `accepted` with its driver set
    pub allocation: Allocation,
    /// Other offers of the same allocation that were closed
    pub superseded: Vec<AllocationAlert>,
}

/// Allocation record store
pub struct Store {
    db: Arc<DB>,
    transitions: Mutex<()>,
    defaults: Settings,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Store {
    /// Open or create the store
    ///
    /// `defaults` is returned by [`Store::get_settings`] until settings are saved.
    pub fn open(path: impl AsRef<Path>, defaults: Settings) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = [CF_ALLOCATIONS, CF_ALERTS, CF_COMPANIES, CF_DRIVERS, CF_SETTINGS]
            .into_iter()
            .map(|name| {
                let mut opts = Options::default();
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(name, opts)
            })
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened allocation store");

        Ok(Self {
            db: Arc::new(db),
            transitions: Mutex::new(()),
            defaults,
        })
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(&cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        self.db.put_cf(&cf, key, bincode::serialize(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(bincode::deserialize(&value)?);
        }
        Ok(rows)
    }

    /// Write allocation and alert rows in one batch
    fn commit(&self, allocation: Option<&Allocation>, alerts: &[AllocationAlert]) -> Result<()> {
        let mut batch = WriteBatch::default();

        if let Some(allocation) = allocation {
            let cf = self.cf_handle(CF_ALLOCATIONS)?;
            batch.put_cf(&cf, allocation.id.as_bytes(), bincode::serialize(allocation)?);
        }

        if !alerts.is_empty() {
            let cf = self.cf_handle(CF_ALERTS)?;
            for alert in alerts {
                batch.put_cf(&cf, alert.id.as_bytes(), bincode::serialize(alert)?);
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    // Companies, drivers, settings

    /// Insert or replace a company
    pub fn put_company(&self, company: &Company) -> Result<()> {
        self.put(CF_COMPANIES, company.id.as_bytes(), company)
    }

    /// Company by ID
    pub fn get_company(&self, company_id: &str) -> Result<Option<Company>> {
        self.get(CF_COMPANIES, company_id.as_bytes())
    }

    /// Insert or replace a driver
    pub fn put_driver(&self, driver: &Driver) -> Result<()> {
        self.put(CF_DRIVERS, driver.id.as_bytes(), driver)
    }

    /// Driver by ID
    pub fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>> {
        self.get(CF_DRIVERS, driver_id.as_bytes())
    }

    /// Remove a push token the provider reported as unregistered.
    ///
    /// Only clears the token if it is still the one that failed.
    pub fn clear_driver_push_token(&self, driver_id: &str, token: &str) -> Result<bool> {
        let _guard = self.transitions.lock();

        let Some(mut driver) = self.get_driver(driver_id)? else {
            return Ok(false);
        };
        if driver.push_token.as_deref() != Some(token) {
            return Ok(false);
        }

        driver.push_token = None;
        self.put_driver(&driver)?;
        Ok(true)
    }

    /// Current settings, or the configured defaults
    pub fn get_settings(&self) -> Result<Settings> {
        Ok(self
            .get(CF_SETTINGS, SETTINGS_KEY)?
            .unwrap_or_else(|| self.defaults.clone()))
    }

    /// Save settings after validating them
    pub fn put_settings(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        self.put(CF_SETTINGS, SETTINGS_KEY, settings)
    }

    /// Save settings as-is, the way an older build may have left them
    #[cfg(test)]
    pub(crate) fn put_settings_unchecked(&self, settings: &Settings) -> Result<()> {
        self.put(CF_SETTINGS, SETTINGS_KEY, settings)
    }

    // Allocations

    /// Insert a new allocation
    pub fn insert_allocation(&self, allocation: &Allocation) -> Result<()> {
        self.put(CF_ALLOCATIONS, allocation.id.as_bytes(), allocation)
    }

    /// Allocation by ID
    pub fn get_allocation(&self, allocation_id: Uuid) -> Result<Option<Allocation>> {
        self.get(CF_ALLOCATIONS, allocation_id.as_bytes())
    }

    /// All allocations, oldest first
    pub fn list_allocations(&self) -> Result<Vec<Allocation>> {
        let mut rows: Vec<Allocation> = self.scan(CF_ALLOCATIONS)?;
        rows.sort_by_key(|a| a.created_at);
        Ok(rows)
    }

    /// Compare-and-set an allocation's status.
    ///
    /// Returns `Ok(None)` without writing when the current status is not one
    /// of `expected` (another pass already moved it). When a pending
    /// allocation expires, its unanswered offers are expired in the same
    /// write batch.
    pub fn transition_allocation<F>(
        &self,
        allocation_id: Uuid,
        expected: &[AllocationStatus],
        next: AllocationStatus,
        now: DateTime<Utc>,
        update: F,
    ) -> Result<Option<Allocation>>
    where
        F: FnOnce(&mut Allocation),
    {
        let _guard = self.transitions.lock();

        let mut allocation = self
            .get_allocation(allocation_id)?
            .ok_or(Error::AllocationNotFound(allocation_id))?;

        if !expected.contains(&allocation.status) {
            debug!(
                allocation_id = %allocation_id,
                status = %allocation.status,
                next = %next,
                "Allocation already moved, skipping transition"
            );
            return Ok(None);
        }

        if !allocation.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: allocation_id,
                from: allocation.status,
                to: next,
            });
        }

        let mut closed_alerts = Vec::new();
        if next == AllocationStatus::Expired {
            for mut alert in self.alerts_for_allocation(allocation_id)? {
                if alert.status == AlertStatus::Notified {
                    alert.status = AlertStatus::Expired;
                    alert.updated_at = now;
                    closed_alerts.push(alert);
                }
            }
        }

        allocation.status = next;
        allocation.updated_at = now;
        update(&mut allocation);

        self.commit(Some(&allocation), &closed_alerts)?;

        Ok(Some(allocation))
    }

    // Alerts

    /// Insert offers in one batch
    pub fn insert_alerts(&self, alerts: &[AllocationAlert]) -> Result<()> {
        self.commit(None, alerts)
    }

    /// Alert by ID
    pub fn get_alert(&self, alert_id: Uuid) -> Result<Option<AllocationAlert>> {
        self.get(CF_ALERTS, alert_id.as_bytes())
    }

    /// Offers of one allocation, oldest first
    pub fn alerts_for_allocation(&self, allocation_id: Uuid) -> Result<Vec<AllocationAlert>> {
        let mut alerts: Vec<AllocationAlert> = self
            .scan::<AllocationAlert>(CF_ALERTS)?
            .into_iter()
            .filter(|a| a.allocation_id == allocation_id)
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    /// Compare-and-set an unanswered offer to `expired`
    pub fn expire_alert(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AllocationAlert>> {
        let _guard = self.transitions.lock();

        let mut alert = self
            .get_alert(alert_id)?
            .ok_or(Error::AlertNotFound(alert_id))?;
        if alert.status != AlertStatus::Notified {
            return Ok(None);
        }

        alert.status = AlertStatus::Expired;
        alert.updated_at = now;
        self.commit(None, std::slice::from_ref(&alert))?;
        Ok(Some(alert))
    }

    /// Accept an offer: alert and allocation become `accepted` and the other
    /// open offers of the allocation are expired, all in one batch
    pub fn accept_alert(
        &self,
        alert_id: Uuid,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Acceptance> {
        let _guard = self.transitions.lock();

        let mut alert = self.open_alert_for(alert_id, driver_id, now)?;

        let mut allocation = self
            .get_allocation(alert.allocation_id)?
            .ok_or(Error::AllocationNotFound(alert.allocation_id))?;
        if allocation.status != AllocationStatus::Pending {
            return Err(Error::OfferUnavailable(format!(
                "allocation {} is {}",
                allocation.id, allocation.status
            )));
        }

        alert.status = AlertStatus::Accepted;
        alert.updated_at = now;

        allocation.status = AllocationStatus::Accepted;
        allocation.driver_id = Some(driver_id.to_string());
        allocation.updated_at = now;

        let mut superseded = Vec::new();
        for mut sibling in self.alerts_for_allocation(allocation.id)? {
            if sibling.id != alert.id && sibling.status == AlertStatus::Notified {
                sibling.status = AlertStatus::Expired;
                sibling.updated_at = now;
                superseded.push(sibling);
            }
        }

        let mut alerts = superseded.clone();
        alerts.push(alert.clone());
        self.commit(Some(&allocation), &alerts)?;

        Ok(Acceptance {
            alert,
            allocation,
            superseded,
        })
    }

    /// Decline an open offer
    pub fn decline_alert(
        &self,
        alert_id: Uuid,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AllocationAlert> {
        let _guard = self.transitions.lock();

        let mut alert = self.open_alert_for(alert_id, driver_id, now)?;
        alert.status = AlertStatus::Declined;
        alert.updated_at = now;
        self.commit(None, std::slice::from_ref(&alert))?;
        Ok(alert)
    }

    /// Alert that `driver_id` may still answer. Caller holds the transition lock.
    fn open_alert_for(
        &self,
        alert_id: Uuid,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AllocationAlert> {
        let alert = self
            .get_alert(alert_id)?
            .ok_or(Error::AlertNotFound(alert_id))?;

        if alert.driver_id != driver_id {
            return Err(Error::OfferUnavailable(format!(
                "alert {} was not offered to driver {}",
                alert_id, driver_id
            )));
        }
        if alert.status != AlertStatus::Notified {
            return Err(Error::OfferUnavailable(format!(
                "alert {} is {}",
                alert_id, alert.status
            )));
        }
        if now >= alert.expires_at {
            return Err(Error::OfferUnavailable(format!("alert {} has expired", alert_id)));
        }

        Ok(alert)
    }

    // Periodic queries

    /// Unanswered alerts whose deadline has passed
    pub fn find_expired_pending_alerts(&self, now: DateTime<Utc>) -> Result<Vec<AllocationAlert>> {
        let mut alerts: Vec<AllocationAlert> = self
            .scan::<AllocationAlert>(CF_ALERTS)?
            .into_iter()
            .filter(|a| a.status == AlertStatus::Notified && a.expires_at <= now)
            .collect();
        alerts.sort_by_key(|a| a.expires_at);
        Ok(alerts)
    }

    /// Pending allocations created at or before `cutoff`
    pub fn find_stale_pending_allocations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Allocation>> {
        self.filter_allocations(|a| {
            a.status == AllocationStatus::Pending && a.created_at <= cutoff
        })
    }

    /// Accepted allocations of `date` whose start time has arrived
    pub fn find_due_to_start(&self, date: NaiveDate, time: NaiveTime) -> Result<Vec<Allocation>> {
        self.filter_allocations(|a| {
            a.status == AllocationStatus::Accepted
                && a.allocation_date == date
                && a.start_time <= time
        })
    }

    /// Accepted or running allocations of `date` whose end time has arrived
    pub fn find_due_to_complete(
        &self,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<Allocation>> {
        self.filter_allocations(|a| {
            matches!(
                a.status,
                AllocationStatus::Accepted | AllocationStatus::InProgress
            ) && a.allocation_date == date
                && a.end_time <= time
        })
    }

    fn filter_allocations<P>(&self, predicate: P) -> Result<Vec<Allocation>>
    where
        P: Fn(&Allocation) -> bool,
    {
        let mut rows: Vec<Allocation> = self
            .scan::<Allocation>(CF_ALLOCATIONS)?
            .into_iter()
            .filter(|a| predicate(a))
            .collect();
        rows.sort_by_key(|a| a.created_at);
        Ok(rows)
    }
}
