//! Service Configuration
//!
//! Loaded once at startup from TOML and handed to [`crate::context::AppContext`],
//! which passes the relevant pieces to each component.
//!
//! ## Loading Order
//!
//! 1. `SAFESCAN_CONFIG` environment variable (path to TOML file)
//! 2. `safescan.toml` in the current working directory
//! 3. Built-in defaults from [`defaults`]
//!
//! Command-line flags override individual fields after loading.

mod app_config;
pub mod defaults;

pub use app_config::*;
