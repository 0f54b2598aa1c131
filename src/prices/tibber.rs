//! Tibber GraphQL price source

use super::{PricePoint, PriceSource};
use crate::clock::LocalClock;
use crate::config::TibberConfig;
use crate::error::{Result, SpotheatError};
use crate::logging::{StructuredLogger, get_logger};
use chrono::DateTime;
use serde_json::{Value, json};
use std::time::Duration;

const PRICE_QUERY: &str = r#"
query PriceInfoQuery {
    viewer {
        homes {
            id
            currentSubscription {
                priceInfo {
                    today { total startsAt }
                    tomorrow { total startsAt }
                }
            }
        }
    }
}
"#;

/// Price source backed by the Tibber API
pub struct TibberPriceSource {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
    home_id: Option<String>,
    clock: LocalClock,
    logger: StructuredLogger,
}

impl TibberPriceSource {
    pub fn new(cfg: &TibberConfig, clock: LocalClock) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let home_id = Some(cfg.home_id.trim())
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        Ok(Self {
            client,
            api_url: cfg.api_url.clone(),
            access_token: cfg.access_token.trim().to_string(),
            home_id,
            clock,
            logger: get_logger("tibber"),
        })
    }
}

#[async_trait::async_trait]
impl PriceSource for TibberPriceSource {
    async fn fetch_prices(&self) -> Result<Vec<PricePoint>> {
        use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};

        if self.access_token.is_empty() {
            return Err(SpotheatError::config("No Tibber access token configured"));
        }

        let resp = self
            .client
            .post(&self.api_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(
                USER_AGENT,
                concat!("spotheat/", env!("CARGO_PKG_VERSION")),
            )
            .json(&json!({ "query": PRICE_QUERY, "variables": {} }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            self.logger
                .error(&format!("Tibber API error: {}", status));
            return Err(SpotheatError::fetch(format!("Tibber API returned {}", status)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| SpotheatError::fetch(format!("Invalid Tibber response: {}", e)))?;
        let points = parse_price_info(&body, self.home_id.as_deref(), &self.clock)?;
        self.logger
            .info(&format!("Fetched {} hourly prices from Tibber", points.len()));
        Ok(points)
    }
}

/// Extract today's and tomorrow's hourly prices from a Tibber response
///
/// Picks the home matching `home_id`, or the first home. GraphQL errors and
/// any malformed entry fail the whole parse. A missing or null `tomorrow` is
/// normal before the next day's prices are published.
pub fn parse_price_info(
    body: &Value,
    home_id: Option<&str>,
    clock: &LocalClock,
) -> Result<Vec<PricePoint>> {
    if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
        let msg = errors
            .get(0)
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("GraphQL error");
        return Err(SpotheatError::fetch(format!("Tibber GraphQL error: {}", msg)));
    }

    let homes = body
        .pointer("/data/viewer/homes")
        .and_then(Value::as_array)
        .ok_or_else(|| SpotheatError::fetch("Tibber response has no homes list"))?;

    let home = home_id
        .and_then(|id| {
            homes
                .iter()
                .find(|h| h.get("id").and_then(Value::as_str) == Some(id))
        })
        .or_else(|| homes.first())
        .ok_or_else(|| SpotheatError::fetch("No homes in Tibber account"))?;

    let price_info = home
        .pointer("/currentSubscription/priceInfo")
        .ok_or_else(|| SpotheatError::fetch("Home has no active subscription price info"))?;

    let today = price_info
        .get("today")
        .and_then(Value::as_array)
        .ok_or_else(|| SpotheatError::fetch("Price info has no 'today' list"))?;
    let tomorrow = match price_info.get("tomorrow") {
        None | Some(Value::Null) => &[][..],
        Some(v) => v
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| SpotheatError::fetch("Price info 'tomorrow' is not a list"))?,
    };

    today
        .iter()
        .chain(tomorrow.iter())
        .map(|entry| parse_entry(entry, clock))
        .collect()
}

fn parse_entry(entry: &Value, clock: &LocalClock) -> Result<PricePoint> {
    let price = entry
        .get("total")
        .and_then(Value::as_f64)
        .ok_or_else(|| SpotheatError::fetch(format!("Price entry without total: {}", entry)))?;
    let starts_at = entry
        .get("startsAt")
        .and_then(Value::as_str)
        .ok_or_else(|| SpotheatError::fetch(format!("Price entry without startsAt: {}", entry)))?;
    let ts = DateTime::parse_from_rfc3339(starts_at)
        .map_err(|e| SpotheatError::fetch(format!("Bad startsAt '{}': {}", starts_at, e)))?;
    Ok(PricePoint::new(clock.localize(ts), price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn response(today: Value, tomorrow: Value) -> Value {
        json!({
            "data": { "viewer": { "homes": [
                { "id": "home-a", "currentSubscription": { "priceInfo": {
                    "today": [{ "total": 9.9, "startsAt": "2024-03-01T00:00:00.000+01:00" }],
                    "tomorrow": []
                }}},
                { "id": "home-b", "currentSubscription": { "priceInfo": {
                    "today": today,
                    "tomorrow": tomorrow
                }}}
            ]}}
        })
    }

    fn clock() -> LocalClock {
        LocalClock::new(None)
    }

    #[test]
    fn parses_selected_home() {
        let body = response(
            json!([
                { "total": 0.12, "startsAt": "2024-03-01T00:00:00.000+01:00" },
                { "total": 0.08, "startsAt": "2024-03-01T01:00:00.000+01:00" }
            ]),
            json!([{ "total": 0.2, "startsAt": "2024-03-02T00:00:00.000+01:00" }]),
        );
        let points = parse_price_info(&body, Some("home-b"), &clock()).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[1].price, 0.08);
        assert_eq!(points[1].starts_at.hour(), 1);
    }

    #[test]
    fn falls_back_to_first_home() {
        let body = response(json!([]), Value::Null);
        let points = parse_price_info(&body, None, &clock()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].price, 9.9);
        let points = parse_price_info(&body, Some("unknown"), &clock()).unwrap();
        assert_eq!(points[0].price, 9.9);
    }

    #[test]
    fn null_tomorrow_is_accepted() {
        let body = response(
            json!([{ "total": 0.1, "startsAt": "2024-03-01T05:00:00+01:00" }]),
            Value::Null,
        );
        assert_eq!(parse_price_info(&body, Some("home-b"), &clock()).unwrap().len(), 1);
    }

    #[test]
    fn malformed_entry_fails_whole_parse() {
        let body = response(
            json!([
                { "total": 0.1, "startsAt": "2024-03-01T05:00:00+01:00" },
                { "total": null, "startsAt": "2024-03-01T06:00:00+01:00" }
            ]),
            Value::Null,
        );
        assert!(matches!(
            parse_price_info(&body, Some("home-b"), &clock()),
            Err(SpotheatError::Fetch { .. })
        ));
    }

    #[test]
    fn graphql_errors_are_reported() {
        let body = json!({ "errors": [{ "message": "invalid token" }] });
        let err = parse_price_info(&body, None, &clock()).unwrap_err();
        assert!(err.to_string().contains("invalid token"));
        assert!(parse_price_info(&json!({ "data": {} }), None, &clock()).is_err());
    }
}
