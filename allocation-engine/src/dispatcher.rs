//! Offers of pending allocations to candidate drivers

use crate::{
    clock::Clock,
    jobs::Job,
    lifecycle::push_to_driver,
    metrics::Metrics,
    store::Store,
    types::{AlertStatus, Allocation, AllocationAlert, AllocationStatus, CheckReport},
    Error, Result,
};
use notification_bridge::{EventName, Notifier, PushMessage, Room};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Push title of a new offer
pub const OFFER_TITLE: &str = "Nova Alocação Disponível";

/// Creates, answers and expires driver offers
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        store: Arc<Store>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            metrics,
        }
    }

    /// Offer a pending allocation to each driver in `driver_ids`.
    ///
    /// Drivers that already hold an open offer for the allocation are not
    /// offered it again. Every new offer expires after the configured
    /// acceptance timeout.
    pub async fn offer_allocation(
        &self,
        allocation_id: Uuid,
        driver_ids: &[String],
    ) -> Result<Vec<AllocationAlert>> {
        if driver_ids.is_empty() {
            return Err(Error::InvalidRequest("No candidate drivers".to_string()));
        }

        let allocation = self
            .store
            .get_allocation(allocation_id)?
            .ok_or(Error::AllocationNotFound(allocation_id))?;
        if allocation.status != AllocationStatus::Pending {
            return Err(Error::OfferUnavailable(format!(
                "allocation {} is {}",
                allocation.id, allocation.status
            )));
        }

        let mut drivers = Vec::new();
        let mut seen = HashSet::new();
        for driver_id in driver_ids {
            if !seen.insert(driver_id.as_str()) {
                continue;
            }
            let driver = self
                .store
                .get_driver(driver_id)?
                .ok_or_else(|| Error::DriverNotFound(driver_id.clone()))?;
            drivers.push(driver);
        }

        let already_offered: HashSet<String> = self
            .store
            .alerts_for_allocation(allocation.id)?
            .into_iter()
            .filter(|a| a.status == AlertStatus::Notified)
            .map(|a| a.driver_id)
            .collect();

        let settings = self.store.get_settings()?;
        let now = self.clock.now();
        let expires_at = settings.offer_deadline(now)?;

        let alerts: Vec<AllocationAlert> = drivers
            .iter()
            .filter(|d| !already_offered.contains(&d.id))
            .map(|d| AllocationAlert {
                id: Uuid::now_v7(),
                allocation_id: allocation.id,
                driver_id: d.id.clone(),
                status: AlertStatus::Notified,
                expires_at,
                created_at: now,
                updated_at: now,
            })
            .collect();

        if alerts.is_empty() {
            debug!(allocation_id = %allocation.id, "Every candidate already holds an offer");
            return Ok(alerts);
        }

        self.store.insert_alerts(&alerts)?;
        info!(
            allocation_id = %allocation.id,
            offers = alerts.len(),
            expires_at = %expires_at,
            "Allocation offered to drivers"
        );

        for alert in &alerts {
            self.notify_offer(&allocation, alert, settings.driver_acceptance_timeout_secs)
                .await;
        }

        Ok(alerts)
    }

    async fn notify_offer(
        &self,
        allocation: &Allocation,
        alert: &AllocationAlert,
        timeout_secs: u64,
    ) {
        let body = format!(
            "Alocação em {} das {} às {}. Responda em até {} segundos.",
            allocation.allocation_date.format("%d/%m/%Y"),
            allocation.start_time.format("%H:%M"),
            allocation.end_time.format("%H:%M"),
            timeout_secs
        );
        let message = PushMessage::new("", OFFER_TITLE, body)
            .with_data("type", "allocation_offer")
            .with_data("allocationId", allocation.id.to_string())
            .with_data("alertId", alert.id.to_string())
            .with_data("expiresAt", alert.expires_at.to_rfc3339());
        push_to_driver(&self.store, &self.notifier, &alert.driver_id, message).await;

        self.notifier
            .emit(
                Room::Driver(alert.driver_id.clone()),
                EventName::AllocationOffered,
                json!({
                    "allocationId": allocation.id,
                    "alertId": alert.id,
                    "allocationDate": allocation.allocation_date,
                    "startTime": allocation.start_time,
                    "endTime": allocation.end_time,
                    "driverAmount": wallet_ledger::money::format(allocation.driver_amount),
                    "expiresAt": alert.expires_at,
                }),
            )
            .await;
    }

    /// Driver accepts an open offer; the allocation becomes `accepted`
    pub async fn accept_offer(&self, alert_id: Uuid, driver_id: &str) -> Result<Allocation> {
        let now = self.clock.now();
        let acceptance = self.store.accept_alert(alert_id, driver_id, now)?;
        let allocation = acceptance.allocation;

        self.metrics
            .record_transition(AllocationStatus::Pending, AllocationStatus::Accepted);
        info!(
            allocation_id = %allocation.id,
            driver_id = %driver_id,
            superseded = acceptance.superseded.len(),
            "Allocation accepted"
        );

        self.notifier
            .emit(
                Room::Company(allocation.company_id.clone()),
                EventName::AllocationAccepted,
                json!({
                    "allocationId": allocation.id,
                    "driverId": driver_id,
                    "acceptedAt": now,
                }),
            )
            .await;

        Ok(allocation)
    }

    /// Driver turns down an open offer
    pub async fn decline_offer(&self, alert_id: Uuid, driver_id: &str) -> Result<AllocationAlert> {
        let alert = self.store.decline_alert(alert_id, driver_id, self.clock.now())?;
        info!(
            alert_id = %alert.id,
            allocation_id = %alert.allocation_id,
            driver_id = %driver_id,
            "Offer declined"
        );
        Ok(alert)
    }

    /// Expire every unanswered offer whose deadline has passed.
    ///
    /// No wallet side effects. A failure on one alert is logged and the
    /// remaining alerts are still processed.
    pub async fn expire_old_alerts(&self) -> Result<CheckReport> {
        let now = self.clock.now();
        let alerts = self.store.find_expired_pending_alerts(now)?;
        let mut report = CheckReport {
            examined: alerts.len(),
            ..Default::default()
        };

        for alert in alerts {
            match self.store.expire_alert(alert.id, now) {
                Ok(Some(_)) => {
                    report.transitioned += 1;
                    debug!(
                        alert_id = %alert.id,
                        allocation_id = %alert.allocation_id,
                        "Offer expired"
                    );
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(alert_id = %alert.id, error = %e, "Failed to expire offer");
                    self.metrics.record_row_failure(Job::ExpireAlerts.as_str());
                    report.failed += 1;
                }
            }
        }

        if report.transitioned > 0 {
            info!(expired = report.transitioned, "Expired unanswered offers");
        }

        Ok(report)
    }
}
