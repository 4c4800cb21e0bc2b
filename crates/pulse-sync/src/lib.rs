//! # pulse-sync
//!
//! Reconciles the local queue with the remote stream service.
//!
//! - [`SyncEngine`] runs one pass: for every registered stream it makes sure
//!   the remote stream exists, drains the queue in timestamp order, drops
//!   points at or below the stream's checkpoint, uploads the rest as one
//!   batch, and only then deletes the uploaded rows and advances the
//!   checkpoint.
//! - [`SyncCoordinator`] keeps passes from overlapping.
//! - [`Scheduler`] requests passes on a timer.
//! - [`Cache`] ties the store and the sync side together for callers.

#![deny(unsafe_code)]

pub mod cache;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use cache::Cache;
pub use coordinator::{SyncCoordinator, SyncOutcome};
pub use engine::{select_new, PassReport, StreamFailure, SyncConfig, SyncEngine};
pub use error::SyncError;
pub use scheduler::Scheduler;
