//! portal-api: HTTP API layer for Thunder Portal
//!
//! Exposes swap execution, lifecycle actions, reporting and the relayer
//! to demo and dashboard clients.

pub mod dto;
pub mod routes;
pub mod server;
pub mod state;

pub use server::*;
pub use state::{AppState, Chains};
