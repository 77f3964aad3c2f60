//! # Jobs Module
//!
//! Lifecycle of a transcription job, from the `queued` record written at
//! submission to its terminal `done`/`error` record.
//!
//! ## Key Components:
//! - **Model**: `JobId`, `JobStatus` and the polled `JobState` record
//! - **Store**: keyed job records (in-memory map or one JSON file per job)
//! - **Tracker**: the single writer for one job's record
//! - **Progress**: the heartbeat task that keeps the percent moving
//! - **Dispatcher**: accepts uploads and runs each job on its own task
//!
//! ## State Machine:
//! `queued → processing → {done, error}`; terminal records are final.

pub mod dispatcher;
pub mod model;
pub mod progress;
pub mod store;
pub mod tracker;

pub use dispatcher::JobDispatcher;
pub use model::JobId;
pub use store::build_store;
