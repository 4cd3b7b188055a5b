//! Operator authentication gateway for a Triton datacenter admin UI.
//!
//! Verifies operator credentials against the datacenter directory (or an
//! HTTP identity gateway), issues signed session tokens, and guards the
//! resource API behind them.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{AppState, create_router};
pub use config::AppConfig;
