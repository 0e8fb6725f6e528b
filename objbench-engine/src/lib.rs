//! The load generation engine of `objbench`.
//!
//! A benchmark run repeatedly uploads, downloads and deletes synthetic objects against a storage
//! [`Backend`](backend::Backend). Every upload and download phase is bounded by a wall-clock
//! budget, during which a fixed pool of workers pulls identifiers from a bounded queue. Failed
//! attempts are retried with the same identifier until the budget runs out.
//!
//! The [`Orchestrator`] sequences the phases and reports progress through a [`RunObserver`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
mod collector;
mod config;
pub mod dispatcher;
mod error;
mod id;
pub mod multipart;
mod observer;
mod orchestrator;
pub mod payload;
mod phase;
mod stats;
mod transfer;
mod worker;

pub use config::{PayloadMode, RunConfig, RunConfigBuilder};
pub use error::{ConfigError, RunError};
pub use id::{WorkItem, object_key};
pub use observer::{NoopObserver, Pause, RunObserver};
pub use orchestrator::{MIN_SUCCESSFUL_UPLOADS, Orchestrator};
pub use stats::{DeleteStats, LoopSummary, PhaseStats, RunSummary, successful_ids};
pub use transfer::{Phase, TransferResult};
