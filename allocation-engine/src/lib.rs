//! Allocation Engine
//!
//! Reserves a driver exclusively for a company over a scheduled window and
//! drives the reservation through its lifecycle, settling wallets when the
//! window closes.
//!
//! # Architecture
//!
//! 1. **Request**: a company asks for capacity; the total is split into
//!    driver share and platform commission
//! 2. **Offer**: candidate drivers receive time-boxed offers
//! 3. **Accept / expire**: the first driver to accept wins; unanswered
//!    allocations expire after twice the acceptance timeout
//! 4. **Start / complete**: periodic checks move allocations as the local
//!    wall clock reaches their start and end times
//! 5. **Settlement**: prepaid companies are debited, the driver and the
//!    platform credited, each leg at most once per allocation
//!
//! # Example
//!
//! ```no_run
//! use allocation_engine::{AllocationEngine, AllocationJobs, Config};
//! use notification_bridge::Notifier;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> allocation_engine::Result<()> {
//!     let (notifier, _events) = Notifier::in_memory();
//!     let engine = Arc::new(AllocationEngine::open(Config::default(), notifier).await?);
//!
//!     let jobs = AllocationJobs::new(engine.clone()).start();
//!     tokio::signal::ctrl_c().await?;
//!     jobs.shutdown().await;
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod settlement;
pub mod store;
pub mod types;

// Re-exports
pub use clock::{BusinessCalendar, Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::AllocationEngine;
pub use error::{Error, Result};
pub use jobs::{AllocationJobs, Job, JobsHandle};
pub use settlement::{SettlementLegs, SettlementOutcome};
pub use store::Store;
pub use types::*;
