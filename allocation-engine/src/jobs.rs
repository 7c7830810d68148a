//! Periodic job runner
//!
//! Two fixed cadences drive the lifecycle:
//! - fast (30s): expire offers, start accepted allocations
//! - slow (60s): expire pending allocations, auto-complete
//!
//! Jobs of one cadence run sequentially. A job still running from an earlier
//! tick is skipped rather than run twice.

use crate::{config::JobsConfig, engine::AllocationEngine, types::CheckReport, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Periodic checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Expire unanswered offers
    ExpireAlerts,
    /// Start accepted allocations
    StartAccepted,
    /// Expire pending allocations
    ExpirePending,
    /// Settle and complete due allocations
    CompleteDue,
}

impl Job {
    /// Jobs on the fast cadence
    pub const FAST: [Job; 2] = [Job::ExpireAlerts, Job::StartAccepted];

    /// Jobs on the slow cadence
    pub const SLOW: [Job; 2] = [Job::ExpirePending, Job::CompleteDue];

    /// Every job, in startup order
    pub const ALL: [Job; 4] = [
        Job::ExpireAlerts,
        Job::StartAccepted,
        Job::ExpirePending,
        Job::CompleteDue,
    ];

    /// Metric/log name
    pub fn as_str(&self) -> &'static str {
        match self {
            Job::ExpireAlerts => "expire_alerts",
            Job::StartAccepted => "start_accepted",
            Job::ExpirePending => "expire_pending",
            Job::CompleteDue => "complete_due",
        }
    }

    fn index(&self) -> usize {
        match self {
            Job::ExpireAlerts => 0,
            Job::StartAccepted => 1,
            Job::ExpirePending => 2,
            Job::CompleteDue => 3,
        }
    }
}

/// Clears the running flag when dropped
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the allocation checks on their cadences
pub struct AllocationJobs {
    engine: Arc<AllocationEngine>,
    config: JobsConfig,
    running: [AtomicBool; 4],
}

impl AllocationJobs {
    /// Jobs over `engine`, using its configured cadences
    pub fn new(engine: Arc<AllocationEngine>) -> Self {
        let config = engine.config().jobs.clone();
        Self::with_config(engine, config)
    }

    /// Jobs with explicit cadences
    pub fn with_config(engine: Arc<AllocationEngine>, config: JobsConfig) -> Self {
        Self {
            engine,
            config,
            running: Default::default(),
        }
    }

    /// Run one job now.
    ///
    /// Returns `None` when the same job is still running. Errors are logged
    /// and returned; the next tick retries.
    pub async fn run_job(&self, job: Job) -> Option<Result<CheckReport>> {
        let Some(_guard) = RunningGuard::acquire(&self.running[job.index()]) else {
            warn!(job = job.as_str(), "Previous run still in progress, skipping");
            self.engine.metrics().record_check(job.as_str(), "skipped", 0.0);
            return None;
        };

        let start = Instant::now();
        let result = match job {
            Job::ExpireAlerts => self.engine.expire_old_alerts().await,
            Job::StartAccepted => self.engine.start_accepted_allocations().await,
            Job::ExpirePending => self.engine.expire_pending_allocations().await,
            Job::CompleteDue => self.engine.complete_due_allocations().await,
        };
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(report) => {
                self.engine.metrics().record_check(job.as_str(), "ok", elapsed);
                debug!(
                    job = job.as_str(),
                    examined = report.examined,
                    transitioned = report.transitioned,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Check finished"
                );
            }
            Err(e) => {
                self.engine.metrics().record_check(job.as_str(), "failed", elapsed);
                error!(job = job.as_str(), error = %e, "Check failed, retrying next tick");
            }
        }

        Some(result)
    }

    /// Run `jobs` one after another
    pub async fn run_jobs(&self, jobs: &[Job]) {
        for job in jobs {
            let _ = self.run_job(*job).await;
        }
    }

    /// Start both cadences, running every check once first if configured
    pub fn start(self) -> JobsHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fast = Duration::from_secs(self.config.fast_interval_secs.max(1));
        let slow = Duration::from_secs(self.config.slow_interval_secs.max(1));
        let run_on_startup = self.config.run_on_startup;
        let jobs = Arc::new(self);

        info!(
            fast_secs = fast.as_secs(),
            slow_secs = slow.as_secs(),
            run_on_startup,
            "Starting allocation jobs"
        );

        let startup: &'static [Job] = if run_on_startup { &Job::ALL } else { &[] };
        let tasks = vec![
            spawn_cadence(jobs.clone(), "fast", fast, &Job::FAST, startup, shutdown_rx.clone()),
            spawn_cadence(jobs, "slow", slow, &Job::SLOW, &[], shutdown_rx),
        ];

        JobsHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

fn spawn_cadence(
    jobs: Arc<AllocationJobs>,
    name: &'static str,
    period: Duration,
    cadence: &'static [Job],
    startup: &'static [Job],
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !startup.is_empty() {
            debug!(cadence = name, "Running startup pass");
            run_isolated(&jobs, name, startup).await;
        }

        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => run_isolated(&jobs, name, cadence).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(cadence = name, "Cadence stopped");
    })
}

/// Run `list` on its own task; a panicking check ends that task only
async fn run_isolated(jobs: &Arc<AllocationJobs>, cadence: &'static str, list: &'static [Job]) {
    let runner = jobs.clone();
    if let Err(e) = tokio::spawn(async move { runner.run_jobs(list).await }).await {
        error!(cadence = cadence, error = %e, "Check task panicked, cadence continues");
    }
}

/// Handle to running jobs
#[derive(Debug)]
pub struct JobsHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl JobsHandle {
    /// Stop both cadences and wait for in-flight checks to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Job task panicked");
            }
        }
        info!("Allocation jobs stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::Config,
        store::Store,
        types::{Allocation, AllocationStatus, BillingMode, Company, Settings},
    };
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use notification_bridge::Notifier;
    use rust_decimal::Decimal;
    use tempfile::TempDir;
    use uuid::Uuid;
    use wallet_ledger::Ledger;

    #[test]
    fn test_running_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = RunningGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(RunningGuard::acquire(&flag).is_none());
        drop(first);
        assert!(RunningGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_cadence_membership() {
        assert_eq!(Job::FAST.len() + Job::SLOW.len(), Job::ALL.len());
        for job in Job::ALL {
            assert_eq!(Job::ALL[job.index()], job);
        }
    }

    #[tokio::test]
    async fn test_startup_pass_expires_stale_allocation() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().join("allocations");
        config.ledger.data_dir = temp_dir.path().join("ledger");
        config.jobs.fast_interval_secs = 3600;
        config.jobs.slow_interval_secs = 3600;

        let now = Utc.with_ymd_and_hms(2026, 5, 4, 15, 0, 0).unwrap();
        let store = Arc::new(Store::open(&config.data_dir, config.defaults.clone()).unwrap());
        let ledger = Arc::new(Ledger::open(config.ledger.clone()).await.unwrap());
        let (notifier, realtime) = Notifier::in_memory();

        store
            .put_company(&Company {
                id: "c1".into(),
                name: "Acme".into(),
                billing_mode: BillingMode::PrePago,
            })
            .unwrap();
        let created_at = now - chrono::Duration::seconds(61);
        let stale = Allocation {
            id: Uuid::now_v7(),
            company_id: "c1".into(),
            driver_id: None,
            allocation_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            status: AllocationStatus::Pending,
            total_amount: Decimal::new(10000, 2),
            driver_amount: Decimal::new(8000, 2),
            commission_amount: Decimal::new(2000, 2),
            created_at,
            started_at: None,
            completed_at: None,
            updated_at: created_at,
        };
        store.insert_allocation(&stale).unwrap();

        let engine = Arc::new(
            AllocationEngine::new(
                config,
                store.clone(),
                ledger,
                notifier,
                Arc::new(ManualClock::new(now)),
            )
            .unwrap(),
        );
        let handle = AllocationJobs::new(engine.clone()).start();

        let mut expired = false;
        for _ in 0..200 {
            let status = store.get_allocation(stale.id).unwrap().unwrap().status;
            if status == AllocationStatus::Expired {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(expired);
        let company_events = realtime
            .events_for(&notification_bridge::Room::Company("c1".into()))
            .await;
        assert_eq!(company_events.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_settings_fail_the_check_not_the_runner() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().join("allocations");
        config.ledger.data_dir = temp_dir.path().join("ledger");

        let (notifier, _) = Notifier::in_memory();
        let engine = Arc::new(AllocationEngine::open(config, notifier).await.unwrap());
        for secs in [u64::MAX, 10_000_000_000_000] {
            engine
                .store()
                .put_settings_unchecked(&Settings {
                    driver_acceptance_timeout_secs: secs,
                    ..Default::default()
                })
                .unwrap();

            let jobs = AllocationJobs::new(engine.clone());
            for _ in 0..2 {
                let result = jobs.run_job(Job::ExpirePending).await;
                assert!(matches!(result, Some(Err(crate::Error::Config(_)))));
            }
            assert!(jobs.run_job(Job::ExpireAlerts).await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_run_job_reports() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().join("allocations");
        config.ledger.data_dir = temp_dir.path().join("ledger");

        let (notifier, _) = Notifier::in_memory();
        let engine = Arc::new(AllocationEngine::open(config, notifier).await.unwrap());
        let jobs = AllocationJobs::new(engine);

        for job in Job::ALL {
            let report = jobs.run_job(job).await.unwrap().unwrap();
            assert_eq!(report, CheckReport::default());
        }
    }
}
