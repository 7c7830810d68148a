//! Notification Bridge
//!
//! Fans allocation lifecycle transitions out to the two side channels:
//! - Push notifications to a driver's device token
//! - Real-time events addressed to `company-{id}` / `driver-{id}` rooms
//!
//! Both channels are best-effort: [`Notifier`] logs and counts failures but
//! never hands them back to the caller as errors.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod metrics;
pub mod nats;
pub mod notifier;
pub mod push;
pub mod realtime;
pub mod types;

pub use error::{Error, Result};
pub use nats::{NatsConfig, NatsRealtime};
pub use notifier::{Notifier, PushReport};
pub use push::{DisabledPush, HttpPushSender, PushConfig, PushSender};
pub use realtime::{Emitted, InMemoryRealtime, RealtimeChannel};
pub use types::{EventName, PushDelivery, PushMessage, RealtimeEvent, Room};
