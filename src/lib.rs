//! AgentFlow - a distributed task-dispatch engine.
//!
//! A master process stores tasks durably in SQLite and hands them out to
//! group-scoped workers, which claim, execute, and report one task at a
//! time. Claims are leases: a worker that vanishes mid-task loses its claim
//! after five minutes and another worker takes over.

pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod git;
pub mod master;
pub mod query;
pub mod sync;
pub mod worker;

pub use error::{AgentFlowError, Result};
