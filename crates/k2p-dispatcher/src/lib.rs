//! Dispatcher/Reconciler (C5): claims queued jobs, hands them to a backend,
//! and reconciles running jobs into terminal states (spec §4.5).

pub mod backend;
pub mod supervisor;

pub use backend::{Backend, Outcome, PollResult, StartResult};
pub use supervisor::Supervisor;
