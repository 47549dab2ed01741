//! Watch-mode runtime for strata.
//!
//! A [`DevServer`] wraps a watch-lifecycle [`strata_extract::BuildPlugin`].
//! Rule store mutations arm a debounced flush on the [`UpdateScheduler`];
//! each flush recomputes the stylesheet once and broadcasts a payload-free
//! [`StylesheetChanged`] through the [`NotificationHub`]. Clients then refetch
//! the full text from the [`LiveEndpoint`].

#![allow(
    clippy::module_name_repetitions,
    reason = "UpdateScheduler and SchedulerState read better than their short forms"
)]

mod clock;
mod endpoint;
mod notify;
mod scheduler;
mod server;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use endpoint::{CACHE_CONTROL, CONTENT_TYPE, LiveEndpoint, LiveResponse};
pub use notify::NotificationHub;
pub use scheduler::{
    FlushSubscriber, SchedulerState, StylesheetChanged, SubscriberId, UpdateScheduler,
};
pub use server::DevServer;
