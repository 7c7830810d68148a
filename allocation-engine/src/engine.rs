//! Main allocation engine
//!
//! Wires the record store, wallet ledger, notifier and clock into the
//! dispatcher, the lifecycle checks and settlement.

use crate::{
    clock::{BusinessCalendar, Clock, SystemClock},
    config::Config,
    dispatcher::Dispatcher,
    lifecycle::Lifecycle,
    metrics::Metrics,
    settlement::Settler,
    store::Store,
    types::{Allocation, AllocationAlert, AllocationStatus, AmountSplit, CheckReport, NewAllocation},
    Error, Result,
};
use notification_bridge::Notifier;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use wallet_ledger::Ledger;

/// Allocation engine
pub struct AllocationEngine {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    lifecycle: Lifecycle,
    metrics: Metrics,
    config: Config,
}

impl AllocationEngine {
    /// Assemble an engine from already opened parts.
    ///
    /// The real-time channel and push sender arrive inside `notifier`.
    pub fn new(
        config: Config,
        store: Arc<Store>,
        ledger: Arc<Ledger>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let calendar = BusinessCalendar::new(&config.calendar.timezone)?;
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;

        let settler = Settler::new(store.clone(), ledger.clone(), metrics.clone());
        let dispatcher = Dispatcher::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            metrics.clone(),
        );
        let lifecycle = Lifecycle::new(
            store.clone(),
            settler,
            notifier,
            clock.clone(),
            calendar,
            metrics.clone(),
        );

        Ok(Self {
            store,
            ledger,
            clock,
            dispatcher,
            lifecycle,
            metrics,
            config,
        })
    }

    /// Open the store and ledger named by `config` on the system clock
    pub async fn open(config: Config, notifier: Notifier) -> Result<Self> {
        let store = Arc::new(Store::open(&config.data_dir, config.defaults.clone())?);
        let ledger = Arc::new(Ledger::open(config.ledger.clone()).await?);

        info!(
            service = %config.service_name,
            version = %config.service_version,
            "Allocation engine opened"
        );

        Self::new(config, store, ledger, notifier, Arc::new(SystemClock))
    }

    /// Record a company's request for exclusive driver capacity.
    ///
    /// Splits the total with the current commission percentage and stores a
    /// `pending` allocation.
    pub async fn request_allocation(&self, request: NewAllocation) -> Result<Allocation> {
        if request.end_time <= request.start_time {
            return Err(Error::InvalidRequest(format!(
                "End time {} must be after start time {}",
                request.end_time, request.start_time
            )));
        }

        self.store
            .get_company(&request.company_id)?
            .ok_or_else(|| Error::CompanyNotFound(request.company_id.clone()))?;

        let settings = self.store.get_settings()?;
        let split =
            AmountSplit::compute(request.total_amount, settings.platform_commission_percent)?;
        let now = self.clock.now();

        let allocation = Allocation {
            id: Uuid::now_v7(),
            company_id: request.company_id,
            driver_id: None,
            allocation_date: request.allocation_date,
            start_time: crate::clock::truncate_to_seconds(request.start_time),
            end_time: crate::clock::truncate_to_seconds(request.end_time),
            status: AllocationStatus::Pending,
            total_amount: split.total,
            driver_amount: split.driver,
            commission_amount: split.commission,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.store.insert_allocation(&allocation)?;

        info!(
            allocation_id = %allocation.id,
            company_id = %allocation.company_id,
            total = %allocation.total_amount,
            "Allocation requested"
        );

        Ok(allocation)
    }

    /// Offer a pending allocation to candidate drivers
    pub async fn offer_allocation(
        &self,
        allocation_id: Uuid,
        driver_ids: &[String],
    ) -> Result<Vec<AllocationAlert>> {
        self.dispatcher.offer_allocation(allocation_id, driver_ids).await
    }

    /// Driver accepts an offer
    pub async fn accept_offer(&self, alert_id: Uuid, driver_id: &str) -> Result<Allocation> {
        self.dispatcher.accept_offer(alert_id, driver_id).await
    }

    /// Driver declines an offer
    pub async fn decline_offer(&self, alert_id: Uuid, driver_id: &str) -> Result<AllocationAlert> {
        self.dispatcher.decline_offer(alert_id, driver_id).await
    }

    /// Expire unanswered offers past their deadline
    pub async fn expire_old_alerts(&self) -> Result<CheckReport> {
        self.dispatcher.expire_old_alerts().await
    }

    /// Expire pending allocations nobody accepted
    pub async fn expire_pending_allocations(&self) -> Result<CheckReport> {
        self.lifecycle.expire_pending_allocations().await
    }

    /// Start accepted allocations whose start time arrived
    pub async fn start_accepted_allocations(&self) -> Result<CheckReport> {
        self.lifecycle.start_accepted_allocations().await
    }

    /// Settle and complete allocations whose end time arrived
    pub async fn complete_due_allocations(&self) -> Result<CheckReport> {
        self.lifecycle.complete_due_allocations().await
    }

    /// Allocation by ID
    pub fn get_allocation(&self, allocation_id: Uuid) -> Result<Allocation> {
        self.store
            .get_allocation(allocation_id)?
            .ok_or(Error::AllocationNotFound(allocation_id))
    }

    /// Record store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Wallet ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown engine
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down allocation engine");
        let Self {
            ledger,
            dispatcher,
            lifecycle,
            ..
        } = self;
        drop(dispatcher);
        drop(lifecycle);

        // Only the last owner stops the ledger actor
        if let Ok(ledger) = Arc::try_unwrap(ledger) {
            ledger.shutdown().await?;
        }
        Ok(())
    }
}
