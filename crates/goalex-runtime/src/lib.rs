//! # goalex-runtime: the executive core
//!
//! Owns the live goal maps and the current goal behind one lock, runs the
//! tick state machine, folds remote goal events, ingests world objects, and
//! queues outbound store writes. Also provides the archival sweep.

pub mod archive;
pub mod clock;
pub mod config;
pub mod executive;
pub mod outbox;

pub use archive::{ArchiveReport, sweep_archive};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ExecutiveConfig;
pub use executive::{Executive, ExecutiveSnapshot, SkipReason, TickReport, TickStatus};
pub use outbox::{Outbox, StoreCommand, run_writer};
