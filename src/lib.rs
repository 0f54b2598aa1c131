//! # Spotheat - spot-price driven hot water heater control
//!
//! Switches the heating element of a hot water tank through a network relay
//! so that it runs during cheap electricity hours, while respecting anyone
//! who flips the relay by hand.
//!
//! ## Features
//!
//! - **Two policies**: price limit, or the N cheapest hours of the day
//! - **Override detection**: external relay changes suspend automatic
//!   control for a configurable number of cycles
//! - **Fail safe**: missing prices or unknown settings turn the heater OFF
//!   and surface the error
//! - **Dashboard**: JSON API, WebSocket status push and static web UI
//!
//! ## Architecture
//!
//! - `prices`: hour-keyed price table and the Tibber price source
//! - `policy`: pure decision function
//! - `override_tracker`: external-change state machine
//! - `controller`: decision cycle, manual commands and snapshots
//! - `scheduler`: hourly ticks and daily price fetches
//! - `relay`: Shelly relay client
//! - `settings`, `config`: runtime settings and static configuration
//! - `state_log`, `persistence`: hour-keyed history and override persistence
//! - `web`: HTTP server, WebSocket and log endpoints

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod net;
pub mod override_tracker;
pub mod persistence;
pub mod policy;
pub mod prices;
pub mod relay;
pub mod scheduler;
pub mod settings;
pub mod state_log;
#[cfg(feature = "web")]
pub mod web;

/// Build version, including the git revision for nightly builds
pub const VERSION: &str = env!("APP_VERSION");

// Re-export commonly used types
pub use config::Config;
pub use controller::RelayController;
pub use error::{Result, SpotheatError};
