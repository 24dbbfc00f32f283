//! portal-core: Shared types, errors, configuration and chain interfaces
//!
//! This crate provides the foundational types used across the Thunder Portal workspace.

pub mod chain;
pub mod config;
pub mod errors;
pub mod types;
pub mod units;

pub use chain::*;
pub use config::*;
pub use errors::*;
pub use types::*;
pub use units::*;
