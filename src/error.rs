//! Error types and handling for Spotheat
//!
//! This module defines the error types used throughout the application.
//! Every failure in the decision path maps onto one of these variants and is
//! surfaced through the controller's `last_error` rather than aborting.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Result type alias for Spotheat operations
pub type Result<T> = std::result::Result<T, SpotheatError>;

/// Main error type for Spotheat
#[derive(Debug, Error)]
pub enum SpotheatError {
    /// Configuration-related errors (static config or heater settings)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Retrieving prices failed (network, HTTP status or payload shape)
    #[error("Price fetch error: {message}")]
    Fetch { message: String },

    /// No price stored for the requested hour
    #[error("No price data for {hour}")]
    NoData { hour: NaiveDateTime },

    /// Not enough prices for the requested day to rank the cheapest hours
    #[error("Insufficient price data for {date}: {available} hours available, {required} required")]
    InsufficientData {
        date: NaiveDate,
        available: usize,
        required: usize,
    },

    /// The relay rejected or failed to execute a switch command
    #[error("Actuation error: {message}")]
    Actuation { message: String },

    /// The relay could not be reached to read its state
    #[error("Device unreachable: {message}")]
    DeviceUnreachable { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl SpotheatError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new price fetch error
    pub fn fetch<S: Into<String>>(message: S) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Create a missing-price error for the given hour
    pub fn no_data(hour: NaiveDateTime) -> Self {
        Self::NoData { hour }
    }

    /// Create an insufficient-data error for the given day
    pub fn insufficient_data(date: NaiveDate, available: usize, required: usize) -> Self {
        Self::InsufficientData {
            date,
            available,
            required,
        }
    }

    /// Create a new actuation error
    pub fn actuation<S: Into<String>>(message: S) -> Self {
        Self::Actuation {
            message: message.into(),
        }
    }

    /// Create a new device-unreachable error
    pub fn device_unreachable<S: Into<String>>(message: S) -> Self {
        Self::DeviceUnreachable {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        Self::Web {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Whether the error means prices for "now" are missing and a re-fetch may help
    pub fn is_price_unavailable(&self) -> bool {
        matches!(self, Self::NoData { .. } | Self::InsufficientData { .. })
    }
}

impl From<std::io::Error> for SpotheatError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for SpotheatError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SpotheatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SpotheatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::network(format!("request timed out: {err}"));
        }
        Self::network(err.to_string())
    }
}

impl From<chrono::ParseError> for SpotheatError {
    fn from(err: chrono::ParseError) -> Self {
        Self::validation("datetime", err.to_string())
    }
}
