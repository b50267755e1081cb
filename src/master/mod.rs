//! The master: HTTP API over the store, plus optional supervised workers.

pub mod client;
pub mod routes;
pub mod server;
pub mod supervisor;

pub use client::MasterClient;
pub use server::{AppState, ApiError};
pub use supervisor::Supervisor;
