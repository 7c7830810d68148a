//! Allocation state machine checks
//!
//! ```text
//! pending     --(accepted before timeout)--------> accepted
//! pending     --(2x acceptance timeout elapsed)--> expired
//! accepted    --(start time reached)-------------> in_progress
//! accepted    --(end time reached)---------------> completed
//! in_progress --(end time reached)---------------> completed
//! ```
//!
//! Each check re-reads the store, evaluates every matching row and moves it
//! with a compare-and-set. Row-level data errors are logged and the row is
//! left for the next tick; storage failures abort the pass.

use crate::{
    clock::{BusinessCalendar, Clock},
    jobs::Job,
    metrics::Metrics,
    settlement::{SettlementOutcome, Settler},
    store::Store,
    types::{Allocation, AllocationStatus, CheckReport},
    Error, Result,
};
use notification_bridge::{EventName, Notifier, PushMessage, PushReport, Room};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use wallet_ledger::money;

/// Message sent to the company when nobody accepted
pub const NO_DRIVER_MESSAGE: &str = "Nenhum motorista aceitou a alocação";

/// Push title when a window starts
pub const STARTED_TITLE: &str = "Alocação Iniciada!";

/// Push title when a window closes
pub const COMPLETED_TITLE: &str = "Alocação Concluída!";

/// Runs the time-driven allocation checks
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<Store>,
    settler: Settler,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    metrics: Metrics,
}

impl Lifecycle {
    /// Create the lifecycle checks
    pub fn new(
        store: Arc<Store>,
        settler: Settler,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            settler,
            notifier,
            clock,
            calendar,
            metrics,
        }
    }

    /// Expire pending allocations nobody accepted within 2x the acceptance timeout
    pub async fn expire_pending_allocations(&self) -> Result<CheckReport> {
        let job = Job::ExpirePending;
        let settings = self.store.get_settings()?;
        let now = self.clock.now();
        let cutoff = settings.pending_cutoff(now)?;

        let rows = self.store.find_stale_pending_allocations(cutoff)?;
        let mut report = CheckReport {
            examined: rows.len(),
            ..Default::default()
        };

        for row in rows {
            let result = self.store.transition_allocation(
                row.id,
                &[AllocationStatus::Pending],
                AllocationStatus::Expired,
                now,
                |_| {},
            );

            match result {
                Ok(Some(expired)) => {
                    report.transitioned += 1;
                    self.metrics
                        .record_transition(AllocationStatus::Pending, AllocationStatus::Expired);
                    info!(
                        allocation_id = %expired.id,
                        company_id = %expired.company_id,
                        "Pending allocation expired, no driver accepted"
                    );

                    self.notifier
                        .emit(
                            Room::Company(expired.company_id.clone()),
                            EventName::AllocationExpired,
                            json!({
                                "allocationId": expired.id,
                                "message": NO_DRIVER_MESSAGE,
                                "expiredAt": now,
                            }),
                        )
                        .await;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => self.row_failed(job, row.id, e, &mut report)?,
            }
        }

        Ok(report)
    }

    /// Move accepted allocations whose start time has arrived to `in_progress`
    pub async fn start_accepted_allocations(&self) -> Result<CheckReport> {
        let job = Job::StartAccepted;
        let now = self.clock.now();
        let (date, time) = self.calendar.local(now);

        let rows = self.store.find_due_to_start(date, time)?;
        let mut report = CheckReport {
            examined: rows.len(),
            ..Default::default()
        };

        for row in rows {
            match self.start_allocation(&row, now).await {
                Ok(true) => report.transitioned += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => self.row_failed(job, row.id, e, &mut report)?,
            }
        }

        Ok(report)
    }

    async fn start_allocation(
        &self,
        row: &Allocation,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let driver_id = row.driver_id.clone().ok_or(Error::MissingDriver(row.id))?;

        let Some(started) = self.store.transition_allocation(
            row.id,
            &[AllocationStatus::Accepted],
            AllocationStatus::InProgress,
            now,
            |a| a.started_at = Some(now),
        )?
        else {
            return Ok(false);
        };

        self.metrics
            .record_transition(AllocationStatus::Accepted, AllocationStatus::InProgress);
        info!(
            allocation_id = %started.id,
            driver_id = %driver_id,
            "Allocation started"
        );

        let message = PushMessage::new("", STARTED_TITLE, "Sua alocação começou. Bom trabalho!")
            .with_data("type", "allocation_started")
            .with_data("allocationId", started.id.to_string());
        push_to_driver(&self.store, &self.notifier, &driver_id, message).await;

        self.notifier
            .emit(
                Room::Company(started.company_id.clone()),
                EventName::AllocationStarted,
                json!({
                    "allocationId": started.id,
                    "driverId": driver_id,
                    "startedAt": now,
                }),
            )
            .await;

        Ok(true)
    }

    /// Settle and complete allocations whose end time has arrived
    pub async fn complete_due_allocations(&self) -> Result<CheckReport> {
        let job = Job::CompleteDue;
        let now = self.clock.now();
        let (date, time) = self.calendar.local(now);

        let rows = self.store.find_due_to_complete(date, time)?;
        let mut report = CheckReport {
            examined: rows.len(),
            ..Default::default()
        };

        for row in rows {
            match self.complete_allocation(row.id, now).await {
                Ok(true) => report.transitioned += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => self.row_failed(job, row.id, e, &mut report)?,
            }
        }

        Ok(report)
    }

    /// Settle one allocation, then mark it completed.
    ///
    /// Settlement comes first: if it fails the allocation keeps its status and
    /// the next tick retries. Returns `false` when another pass completed it.
    async fn complete_allocation(
        &self,
        allocation_id: Uuid,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let allocation = self
            .store
            .get_allocation(allocation_id)?
            .ok_or(Error::AllocationNotFound(allocation_id))?;

        let prior = allocation.status;
        if !matches!(prior, AllocationStatus::Accepted | AllocationStatus::InProgress) {
            return Ok(false);
        }
        let driver_id = allocation
            .driver_id
            .clone()
            .ok_or(Error::MissingDriver(allocation.id))?;

        let outcome = self.settler.settle(&allocation).await?;

        let Some(completed) = self.store.transition_allocation(
            allocation.id,
            &[AllocationStatus::Accepted, AllocationStatus::InProgress],
            AllocationStatus::Completed,
            now,
            |a| a.completed_at = Some(now),
        )?
        else {
            return Ok(false);
        };

        self.metrics
            .record_transition(prior, AllocationStatus::Completed);
        info!(
            allocation_id = %completed.id,
            driver_id = %driver_id,
            from = %prior,
            "Allocation completed"
        );

        let body = match outcome {
            SettlementOutcome::Settled(_) => format!(
                "Você recebeu R$ {} pela alocação.",
                money::format(completed.driver_amount)
            ),
            SettlementOutcome::Deferred => "Sua alocação foi concluída.".to_string(),
        };
        let message = PushMessage::new("", COMPLETED_TITLE, body)
            .with_data("type", "allocation_completed")
            .with_data("allocationId", completed.id.to_string())
            .with_data("amount", money::format(completed.driver_amount));
        push_to_driver(&self.store, &self.notifier, &driver_id, message).await;

        let payload = json!({
            "allocationId": completed.id,
            "driverId": driver_id,
            "totalAmount": money::format(completed.total_amount),
            "driverAmount": money::format(completed.driver_amount),
            "completedAt": now,
        });
        self.notifier
            .emit(
                Room::Driver(driver_id.clone()),
                EventName::AllocationCompleted,
                payload.clone(),
            )
            .await;
        self.notifier
            .emit(
                Room::Company(completed.company_id.clone()),
                EventName::AllocationCompleted,
                payload,
            )
            .await;

        Ok(true)
    }

    fn row_failed(
        &self,
        job: Job,
        allocation_id: Uuid,
        err: Error,
        report: &mut CheckReport,
    ) -> Result<()> {
        if err.is_row_level() {
            warn!(
                job = job.as_str(),
                allocation_id = %allocation_id,
                error = %err,
                "Skipping allocation"
            );
            self.metrics.record_row_failure(job.as_str());
            report.failed += 1;
            Ok(())
        } else {
            error!(
                job = job.as_str(),
                allocation_id = %allocation_id,
                error = %err,
                "Aborting pass"
            );
            Err(err)
        }
    }
}

/// Push to a driver's registered device, purging the token if the provider
/// reports it unregistered
pub(crate) async fn push_to_driver(
    store: &Store,
    notifier: &Notifier,
    driver_id: &str,
    message: PushMessage,
) -> PushReport {
    let token = match store.get_driver(driver_id) {
        Ok(Some(driver)) => driver.push_token,
        Ok(None) => {
            warn!(driver_id = %driver_id, "Driver not found, push skipped");
            None
        }
        Err(e) => {
            warn!(driver_id = %driver_id, error = %e, "Could not load driver, push skipped");
            None
        }
    };

    let report = notifier.push(token.as_deref(), message).await;

    if report == PushReport::InvalidToken {
        if let Some(token) = token.as_deref() {
            match store.clear_driver_push_token(driver_id, token) {
                Ok(true) => info!(driver_id = %driver_id, "Cleared unregistered push token"),
                Ok(false) => {}
                Err(e) => warn!(driver_id = %driver_id, error = %e, "Could not clear push token"),
            }
        }
    }

    report
}
