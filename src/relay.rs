//! Network relay driving the heating element
//!
//! The controller only needs two operations from the device: read the actual
//! switch output, and command it on or off. [`ShellyRelay`] talks to a Shelly
//! Plus/Pro style device over its local HTTP API.

use crate::config::RelayConfig;
use crate::error::{Result, SpotheatError};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use serde_json::Value;
use std::time::Duration;

/// Relay device abstraction
#[async_trait::async_trait]
pub trait RelayDevice: Send + Sync {
    /// Current switch output, read from the device. An error means the state
    /// is unknown.
    async fn observe(&self) -> Result<bool>;

    /// Command the switch output
    async fn actuate(&self, on: bool) -> Result<()>;
}

/// Shelly relay reached over HTTP
pub struct ShellyRelay {
    client: reqwest::Client,
    base_url: String,
    switch_id: u8,
    logger: StructuredLogger,
}

impl ShellyRelay {
    pub fn new(cfg: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let host = cfg.host.trim();
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host)
        };
        let logger = get_logger_with_context(
            LogContext::new("relay").with_field("host", host),
        );
        Ok(Self {
            client,
            base_url,
            switch_id: cfg.switch_id,
            logger,
        })
    }
}

#[async_trait::async_trait]
impl RelayDevice for ShellyRelay {
    async fn observe(&self) -> Result<bool> {
        let url = format!(
            "{}/rpc/Shelly.GetStatus?id={}",
            self.base_url, self.switch_id
        );
        let resp = self.client.get(&url).send().await.map_err(|e| {
            self.logger
                .warn(&format!("Error fetching relay status: {}", e));
            SpotheatError::device_unreachable(e.to_string())
        })?;
        if !resp.status().is_success() {
            return Err(SpotheatError::device_unreachable(format!(
                "status request returned {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SpotheatError::device_unreachable(format!("bad status body: {}", e)))?;
        parse_switch_output(&body, self.switch_id)
    }

    async fn actuate(&self, on: bool) -> Result<()> {
        let turn = if on { "on" } else { "off" };
        let url = format!("{}/relay/{}?turn={}", self.base_url, self.switch_id, turn);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            self.logger.error(&format!("Error actuating relay: {}", e));
            SpotheatError::device_unreachable(e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            self.logger
                .error(&format!("Relay rejected turn={}: {}", turn, status));
            return Err(SpotheatError::actuation(format!(
                "turn={} returned {}",
                turn, status
            )));
        }
        self.logger.info(&format!("Relay {}", turn));
        Ok(())
    }
}

/// Read `switch:<id>.output` from a `Shelly.GetStatus` response
pub fn parse_switch_output(body: &Value, switch_id: u8) -> Result<bool> {
    let key = format!("switch:{}", switch_id);
    body.get(&key)
        .and_then(|s| s.get("output"))
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            SpotheatError::device_unreachable(format!("status has no {}.output", key))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_switch_output() {
        let body = json!({
            "switch:0": { "id": 0, "output": true, "apower": 2000.0 },
            "switch:1": { "id": 1, "output": false }
        });
        assert!(parse_switch_output(&body, 0).unwrap());
        assert!(!parse_switch_output(&body, 1).unwrap());
        assert!(parse_switch_output(&body, 2).is_err());
        assert!(parse_switch_output(&json!({ "switch:0": { "output": "yes" } }), 0).is_err());
    }

    #[test]
    fn base_url_accepts_scheme_or_bare_host() {
        let relay = ShellyRelay::new(&RelayConfig::default()).unwrap();
        assert_eq!(relay.base_url, "http://192.168.1.106");
        let cfg = RelayConfig {
            host: "http://shelly.local/".to_string(),
            ..Default::default()
        };
        assert_eq!(ShellyRelay::new(&cfg).unwrap().base_url, "http://shelly.local");
    }
}
