//! Reconciliation of stock intents.
//!
//! Intents are stock batches whose outcome against the counter store was
//! never confirmed. The job checks whether any attempt landed and otherwise
//! replays the batch under a fresh request key. The scheduler runs the job
//! on a fixed interval and optionally purges old executed intents.

pub mod error;
pub mod job;
pub mod scheduler;

pub use error::{ReconcileError, Result};
pub use job::{IntentOutcome, ReconciliationJob, TickReport, UnexpectedFailurePolicy};
pub use scheduler::{DEFAULT_INTERVAL, ReconciliationScheduler, SchedulerHandle};
