//! End-to-end lifecycle tests
//!
//! Drive the engine with a manual clock through offer, acceptance, start,
//! completion and expiry, checking wallets, statuses and notifications.

use allocation_engine::{
    AlertStatus, Allocation, AllocationEngine, AllocationStatus, BillingMode, BusinessCalendar,
    CheckReport, Company, Config, Driver, Error, ManualClock, NewAllocation, Store,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use notification_bridge::{
    EventName, InMemoryRealtime, Notifier, PushDelivery, PushMessage, PushSender, RealtimeEvent,
    Room,
};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wallet_ledger::{Ledger, OwnerType, Posting, TransactionType, WalletOwner};

struct RecordingPush {
    sent: Mutex<Vec<PushMessage>>,
    unregistered: Mutex<HashSet<String>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(
        &self,
        message: &PushMessage,
    ) -> notification_bridge::Result<Option<PushDelivery>> {
        if self.unregistered.lock().unwrap().contains(&message.token) {
            return Ok(Some(PushDelivery::InvalidToken));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(Some(PushDelivery::Delivered {
            message_id: format!("m-{}", sent.len()),
        }))
    }
}

struct Harness {
    engine: AllocationEngine,
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    clock: Arc<ManualClock>,
    calendar: BusinessCalendar,
    realtime: Arc<InMemoryRealtime>,
    push: Arc<RecordingPush>,
    _temp: TempDir,
}

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
}

fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
}

impl Harness {
    async fn new(billing_mode: BillingMode) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().join("allocations");
        config.ledger.data_dir = temp.path().join("ledger");

        let calendar = BusinessCalendar::sao_paulo();
        let clock = Arc::new(ManualClock::new(
            calendar.to_utc(date(), hms(8, 0, 0)).unwrap(),
        ));

        let store = Arc::new(Store::open(&config.data_dir, config.defaults.clone()).unwrap());
        let ledger = Arc::new(Ledger::open(config.ledger.clone()).await.unwrap());
        let realtime = Arc::new(InMemoryRealtime::default());
        let push = Arc::new(RecordingPush {
            sent: Mutex::new(Vec::new()),
            unregistered: Mutex::new(HashSet::new()),
        });
        let notifier = Notifier::new(push.clone(), realtime.clone());

        let engine = AllocationEngine::new(
            config,
            store.clone(),
            ledger.clone(),
            notifier,
            clock.clone(),
        )
        .unwrap();

        store
            .put_company(&Company {
                id: "c1".into(),
                name: "Acme Logística".into(),
                billing_mode,
            })
            .unwrap();
        for id in ["d1", "d2"] {
            store
                .put_driver(&Driver {
                    id: id.into(),
                    name: format!("Driver {}", id),
                    push_token: Some(format!("tok-{}", id)),
                })
                .unwrap();
        }

        Self {
            engine,
            store,
            ledger,
            clock,
            calendar,
            realtime,
            push,
            _temp: temp,
        }
    }

    fn at(&self, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        self.calendar.to_utc(date(), hms(h, m, s)).unwrap()
    }

    fn set_local(&self, h: u32, m: u32, s: u32) {
        self.clock.set(self.at(h, m, s));
    }

    async fn fund_company(&self, company_id: &str, amount: &str) {
        let wallet = self
            .ledger
            .get_or_create_wallet(WalletOwner::Company(company_id.to_string()))
            .await
            .unwrap();
        self.ledger
            .post(Posting::credit(wallet.id, TransactionType::Deposit, dec(amount)))
            .await
            .unwrap();
    }

    async fn request(&self, company_id: &str, total: &str) -> Allocation {
        self.engine
            .request_allocation(NewAllocation {
                company_id: company_id.into(),
                allocation_date: date(),
                start_time: hms(9, 0, 0),
                end_time: hms(17, 0, 0),
                total_amount: dec(total),
            })
            .await
            .unwrap()
    }

    /// Request at 08:00 local, offer to d1 and d2, d1 accepts
    async fn accepted(&self, company_id: &str, total: &str) -> Allocation {
        self.set_local(8, 0, 0);
        let allocation = self.request(company_id, total).await;
        let alerts = self
            .engine
            .offer_allocation(allocation.id, &["d1".to_string(), "d2".to_string()])
            .await
            .unwrap();
        let alert = alerts.iter().find(|a| a.driver_id == "d1").unwrap();

        self.clock.advance(Duration::seconds(5));
        self.engine.accept_offer(alert.id, "d1").await.unwrap()
    }

    fn status(&self, allocation: &Allocation) -> AllocationStatus {
        self.engine.get_allocation(allocation.id).unwrap().status
    }

    fn balance(&self, owner_id: &str, owner_type: OwnerType) -> Option<Decimal> {
        self.ledger
            .get_wallet_by_owner(owner_id, owner_type)
            .unwrap()
            .map(|w| w.available_balance)
    }

    async fn platform_balance(&self) -> Decimal {
        self.ledger.get_platform_wallet().await.unwrap().available_balance
    }

    async fn events(&self, room: Room, name: EventName) -> Vec<RealtimeEvent> {
        self.realtime
            .events_for(&room)
            .await
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    fn pushes_titled(&self, title: &str) -> Vec<PushMessage> {
        self.push
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.title == title)
            .cloned()
            .collect()
    }
}

#[tokio::test]
async fn test_unaccepted_allocation_expires_after_twice_the_timeout() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;

    h.clock.advance(Duration::seconds(61));
    let report = h.engine.expire_pending_allocations().await.unwrap();

    assert_eq!(report.transitioned, 1);
    assert_eq!(h.status(&allocation), AllocationStatus::Expired);

    let events = h
        .events(Room::Company("c1".into()), EventName::AllocationExpired)
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].allocation_id(), Some(allocation.id.to_string().as_str()));
}

#[tokio::test]
async fn test_pending_expiry_boundary() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;
    let created = allocation.created_at;

    // Created 2x timeout - 1s ago: still pending
    h.clock.set(created + Duration::seconds(59));
    let report = h.engine.expire_pending_allocations().await.unwrap();
    assert_eq!(report, CheckReport::default());
    assert_eq!(h.status(&allocation), AllocationStatus::Pending);

    // Created 2x timeout + 1s ago: expired
    h.clock.set(created + Duration::seconds(61));
    h.engine.expire_pending_allocations().await.unwrap();
    assert_eq!(h.status(&allocation), AllocationStatus::Expired);
}

#[tokio::test]
async fn test_expiring_allocation_closes_offers() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;
    let alerts = h
        .engine
        .offer_allocation(allocation.id, &["d1".to_string()])
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(61));
    h.engine.expire_pending_allocations().await.unwrap();

    let alert = h.store.get_alert(alerts[0].id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Expired);
}

#[tokio::test]
async fn test_accepted_allocation_starts_at_start_time() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.accepted("c1", "100.00").await;
    assert_eq!(allocation.driver_id.as_deref(), Some("d1"));

    h.set_local(8, 59, 59);
    let report = h.engine.start_accepted_allocations().await.unwrap();
    assert_eq!(report.examined, 0);

    h.set_local(9, 0, 5);
    let report = h.engine.start_accepted_allocations().await.unwrap();
    assert_eq!(report.transitioned, 1);

    let started = h.engine.get_allocation(allocation.id).unwrap();
    assert_eq!(started.status, AllocationStatus::InProgress);
    assert_eq!(started.started_at, Some(h.at(9, 0, 5)));

    let pushes = h.pushes_titled("Alocação Iniciada!");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].token, "tok-d1");
    assert_eq!(
        h.events(Room::Company("c1".into()), EventName::AllocationStarted)
            .await
            .len(),
        1
    );

    // Already running: nothing left to start
    let report = h.engine.start_accepted_allocations().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_prepaid_completion_settles_wallets() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.fund_company("c1", "500.00").await;
    let allocation = h.accepted("c1", "100.00").await;

    h.set_local(9, 0, 5);
    h.engine.start_accepted_allocations().await.unwrap();

    h.set_local(17, 0, 10);
    let report = h.engine.complete_due_allocations().await.unwrap();
    assert_eq!(report.transitioned, 1);

    let completed = h.engine.get_allocation(allocation.id).unwrap();
    assert_eq!(completed.status, AllocationStatus::Completed);
    assert_eq!(completed.completed_at, Some(h.at(17, 0, 10)));
    assert!(completed.amounts_balanced());

    assert_eq!(h.balance("c1", OwnerType::Company), Some(dec("400.00")));
    assert_eq!(h.balance("d1", OwnerType::Driver), Some(dec("80.00")));
    assert_eq!(h.platform_balance().await, dec("20.00"));

    let reference = allocation.id.to_string();
    let company = h.ledger.get_wallet_by_owner("c1", OwnerType::Company).unwrap().unwrap();
    let driver = h.ledger.get_wallet_by_owner("d1", OwnerType::Driver).unwrap().unwrap();
    let platform = h.ledger.get_platform_wallet().await.unwrap();

    let debit = h
        .ledger
        .find_transaction(company.id, &reference, TransactionType::AllocationDebit)
        .unwrap()
        .unwrap();
    assert_eq!(debit.amount, dec("-100.00"));
    assert_eq!(debit.previous_balance, dec("500.00"));
    assert_eq!(debit.new_balance, dec("400.00"));
    assert!(h
        .ledger
        .find_transaction(driver.id, &reference, TransactionType::AllocationCredit)
        .unwrap()
        .is_some());
    assert!(h
        .ledger
        .find_transaction(platform.id, &reference, TransactionType::AllocationCommission)
        .unwrap()
        .is_some());

    let pushes = h.pushes_titled("Alocação Concluída!");
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].body.contains("80.00"));
    assert_eq!(
        h.events(Room::Driver("d1".into()), EventName::AllocationCompleted)
            .await
            .len(),
        1
    );
    assert_eq!(
        h.events(Room::Company("c1".into()), EventName::AllocationCompleted)
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_postpaid_completion_moves_no_money() {
    let h = Harness::new(BillingMode::Boleto).await;
    h.fund_company("c1", "500.00").await;
    let allocation = h.accepted("c1", "100.00").await;

    h.set_local(9, 0, 5);
    h.engine.start_accepted_allocations().await.unwrap();
    h.set_local(17, 0, 10);
    h.engine.complete_due_allocations().await.unwrap();

    assert_eq!(h.status(&allocation), AllocationStatus::Completed);
    assert_eq!(h.balance("c1", OwnerType::Company), Some(dec("500.00")));
    assert_eq!(h.balance("d1", OwnerType::Driver), None);

    let company = h.ledger.get_wallet_by_owner("c1", OwnerType::Company).unwrap().unwrap();
    assert_eq!(h.ledger.transactions_for_wallet(company.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_accepted_allocation_completes_without_starting() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.fund_company("c1", "500.00").await;
    let allocation = h.accepted("c1", "100.00").await;

    h.set_local(17, 0, 0);
    let report = h.engine.complete_due_allocations().await.unwrap();

    assert_eq!(report.transitioned, 1);
    let completed = h.engine.get_allocation(allocation.id).unwrap();
    assert_eq!(completed.status, AllocationStatus::Completed);
    assert!(completed.started_at.is_none());
    assert_eq!(h.balance("c1", OwnerType::Company), Some(dec("400.00")));
}

#[tokio::test]
async fn test_concurrent_completion_settles_once() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.fund_company("c1", "500.00").await;
    let allocation = h.accepted("c1", "100.00").await;

    h.set_local(17, 0, 10);
    let (a, b) = tokio::join!(
        h.engine.complete_due_allocations(),
        h.engine.complete_due_allocations()
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.transitioned + b.transitioned, 1);
    assert_eq!(h.status(&allocation), AllocationStatus::Completed);
    assert_eq!(h.balance("c1", OwnerType::Company), Some(dec("400.00")));
    assert_eq!(h.balance("d1", OwnerType::Driver), Some(dec("80.00")));
    assert_eq!(h.platform_balance().await, dec("20.00"));
    assert_eq!(h.pushes_titled("Alocação Concluída!").len(), 1);

    let report = h.engine.complete_due_allocations().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_partial_settlement_is_resumed_without_double_charge() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.fund_company("c1", "500.00").await;
    let allocation = h.accepted("c1", "100.00").await;
    let reference = allocation.id.to_string();

    // An earlier pass posted the debit and stopped before completing
    let company = h.ledger.get_wallet_by_owner("c1", OwnerType::Company).unwrap().unwrap();
    h.ledger
        .post(
            Posting::debit(company.id, TransactionType::AllocationDebit, dec("100.00"))
                .with_reference(reference.clone()),
        )
        .await
        .unwrap();
    assert_eq!(h.status(&allocation), AllocationStatus::Accepted);

    h.set_local(17, 0, 10);
    let report = h.engine.complete_due_allocations().await.unwrap();
    assert_eq!(report.transitioned, 1);

    assert_eq!(h.status(&allocation), AllocationStatus::Completed);
    assert_eq!(h.balance("c1", OwnerType::Company), Some(dec("400.00")));
    assert_eq!(h.balance("d1", OwnerType::Driver), Some(dec("80.00")));
    assert_eq!(h.platform_balance().await, dec("20.00"));

    let debits: Vec<_> = h
        .ledger
        .transactions_for_wallet(company.id)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.tx_type == TransactionType::AllocationDebit)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].reference.as_deref(), Some(reference.as_str()));
}

#[tokio::test]
async fn test_missing_company_wallet_skips_row_and_retries() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.store
        .put_company(&Company {
            id: "c2".into(),
            name: "Sem Carteira".into(),
            billing_mode: BillingMode::PrePago,
        })
        .unwrap();
    h.fund_company("c1", "500.00").await;

    let funded = h.accepted("c1", "100.00").await;
    let unfunded = h.accepted("c2", "50.00").await;

    h.set_local(17, 0, 10);
    let report = h.engine.complete_due_allocations().await.unwrap();
    assert_eq!(report.transitioned, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.status(&funded), AllocationStatus::Completed);
    assert_eq!(h.status(&unfunded), AllocationStatus::Accepted);

    // Next tick picks it up once the wallet exists
    h.fund_company("c2", "50.00").await;
    let report = h.engine.complete_due_allocations().await.unwrap();
    assert_eq!(report.transitioned, 1);
    assert_eq!(h.status(&unfunded), AllocationStatus::Completed);
    assert_eq!(h.balance("c2", OwnerType::Company), Some(dec("0.00")));
    assert_eq!(h.balance("d1", OwnerType::Driver), Some(dec("120.00")));
}

#[tokio::test]
async fn test_company_balance_may_go_negative() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.fund_company("c1", "30.00").await;
    h.accepted("c1", "100.00").await;

    h.set_local(17, 0, 10);
    h.engine.complete_due_allocations().await.unwrap();

    assert_eq!(h.balance("c1", OwnerType::Company), Some(dec("-70.00")));
}

#[tokio::test]
async fn test_expire_old_alerts_is_idempotent() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;
    let alerts = h
        .engine
        .offer_allocation(allocation.id, &["d1".to_string(), "d2".to_string()])
        .await
        .unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(h.pushes_titled("Nova Alocação Disponível").len(), 2);

    h.clock.advance(Duration::seconds(29));
    assert_eq!(h.engine.expire_old_alerts().await.unwrap().transitioned, 0);

    h.clock.advance(Duration::seconds(1));
    let first = h.engine.expire_old_alerts().await.unwrap();
    assert_eq!(first.transitioned, 2);

    let second = h.engine.expire_old_alerts().await.unwrap();
    assert_eq!(second, CheckReport::default());

    for alert in alerts {
        assert_eq!(
            h.store.get_alert(alert.id).unwrap().unwrap().status,
            AlertStatus::Expired
        );
    }
    assert_eq!(h.status(&allocation), AllocationStatus::Pending);
}

#[tokio::test]
async fn test_accepting_closes_other_offers() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;
    let alerts = h
        .engine
        .offer_allocation(allocation.id, &["d1".to_string(), "d2".to_string()])
        .await
        .unwrap();
    let d1 = alerts.iter().find(|a| a.driver_id == "d1").unwrap();
    let d2 = alerts.iter().find(|a| a.driver_id == "d2").unwrap();

    h.engine.accept_offer(d1.id, "d1").await.unwrap();

    assert_eq!(
        h.store.get_alert(d2.id).unwrap().unwrap().status,
        AlertStatus::Expired
    );
    assert!(matches!(
        h.engine.accept_offer(d2.id, "d2").await,
        Err(Error::OfferUnavailable(_))
    ));
    assert_eq!(
        h.events(Room::Company("c1".into()), EventName::AllocationAccepted)
            .await
            .len(),
        1
    );
    assert_eq!(
        h.events(Room::Driver("d2".into()), EventName::AllocationOffered)
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_late_acceptance_is_rejected() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;
    let alerts = h
        .engine
        .offer_allocation(allocation.id, &["d1".to_string()])
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(30));
    assert!(matches!(
        h.engine.accept_offer(alerts[0].id, "d1").await,
        Err(Error::OfferUnavailable(_))
    ));
    assert_eq!(h.status(&allocation), AllocationStatus::Pending);
}

#[tokio::test]
async fn test_decline_offer() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;
    let alerts = h
        .engine
        .offer_allocation(allocation.id, &["d1".to_string()])
        .await
        .unwrap();

    let declined = h.engine.decline_offer(alerts[0].id, "d1").await.unwrap();
    assert_eq!(declined.status, AlertStatus::Declined);

    // A declined offer does not expire later
    h.clock.advance(Duration::seconds(31));
    assert_eq!(h.engine.expire_old_alerts().await.unwrap().examined, 0);
}

#[tokio::test]
async fn test_offer_requires_known_drivers() {
    let h = Harness::new(BillingMode::PrePago).await;
    let allocation = h.request("c1", "100.00").await;

    assert!(matches!(
        h.engine
            .offer_allocation(allocation.id, &["ghost".to_string()])
            .await,
        Err(Error::DriverNotFound(_))
    ));
    assert!(matches!(
        h.engine.offer_allocation(allocation.id, &[]).await,
        Err(Error::InvalidRequest(_))
    ));

    // Repeating an open offer does not duplicate it
    let first = h
        .engine
        .offer_allocation(allocation.id, &["d1".to_string()])
        .await
        .unwrap();
    let second = h
        .engine
        .offer_allocation(allocation.id, &["d1".to_string(), "d1".to_string()])
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_unregistered_push_token_is_cleared() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.push
        .unregistered
        .lock()
        .unwrap()
        .insert("tok-d1".to_string());
    h.accepted("c1", "100.00").await;

    h.set_local(9, 0, 5);
    h.engine.start_accepted_allocations().await.unwrap();

    assert!(h.store.get_driver("d1").unwrap().unwrap().push_token.is_none());
    assert_eq!(
        h.store.get_driver("d2").unwrap().unwrap().push_token.as_deref(),
        Some("tok-d2")
    );
}

#[tokio::test]
async fn test_wallet_histories_replay_to_balances() {
    let h = Harness::new(BillingMode::PrePago).await;
    h.fund_company("c1", "1000.00").await;
    for total in ["100.00", "37.33", "250.10"] {
        h.accepted("c1", total).await;
    }

    h.set_local(17, 0, 10);
    let report = h.engine.complete_due_allocations().await.unwrap();
    assert_eq!(report.transitioned, 3);

    let company = h.ledger.get_wallet_by_owner("c1", OwnerType::Company).unwrap().unwrap();
    let driver = h.ledger.get_wallet_by_owner("d1", OwnerType::Driver).unwrap().unwrap();
    let platform = h.ledger.get_platform_wallet().await.unwrap();

    for wallet in [&company, &driver, &platform] {
        let history = h.ledger.transactions_for_wallet(wallet.id).unwrap();
        let total: Decimal = history.iter().map(|tx| tx.amount).sum();
        assert_eq!(total, h.ledger.get_wallet(wallet.id).unwrap().available_balance);
        assert!(h.ledger.verify_wallet(wallet.id).unwrap());
    }

    // Money is conserved across the three wallets
    let company_spent = dec("1000.00") - h.ledger.get_wallet(company.id).unwrap().available_balance;
    let received = h.ledger.get_wallet(driver.id).unwrap().available_balance
        + h.ledger.get_wallet(platform.id).unwrap().available_balance;
    assert_eq!(company_spent, received);
    assert_eq!(company_spent, dec("387.43"));

    for allocation in h.store.list_allocations().unwrap() {
        assert!(allocation.amounts_balanced());
    }
}
