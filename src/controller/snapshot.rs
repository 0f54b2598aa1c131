use super::types::{HourPrice, PriceOverview, Snapshot};
use crate::settings::{ControlMode, HeaterSettings};
use chrono::NaiveDateTime;
use tokio::sync::{broadcast, watch};

/// Latest snapshot and price table, readable without the controller lock
#[derive(Clone)]
pub struct StatusFeed {
    snapshot: watch::Receiver<Snapshot>,
    prices: watch::Receiver<PriceOverview>,
    updates: broadcast::Sender<String>,
}

impl StatusFeed {
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn prices(&self) -> PriceOverview {
        self.prices.borrow().clone()
    }

    /// JSON snapshots published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }
}

impl super::RelayController {
    /// Settings for display; a broken store falls back to defaults
    fn settings_for_snapshot(&self) -> HeaterSettings {
        self.settings.load().unwrap_or_else(|e| {
            self.logger
                .warn(&format!("Failed to load settings for snapshot: {}", e));
            HeaterSettings::default()
        })
    }

    fn today_prices_for_snapshot(
        &self,
        now: NaiveDateTime,
        settings: &HeaterSettings,
    ) -> Vec<HourPrice> {
        let mark_cheap = settings.enabled
            && matches!(settings.control_mode(), Ok(ControlMode::NCheapestToday));
        let cheap_hours = if mark_cheap {
            self.prices.cheapest_hours_today(now, settings.n_cheapest)
        } else {
            Vec::new()
        };
        self.prices
            .today_prices(now)
            .into_iter()
            .map(|p| HourPrice {
                time: p.starts_at,
                price: p.price,
                cheap: cheap_hours.contains(&p.starts_at),
            })
            .collect()
    }

    /// Current state without touching the relay or the price source
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(self.clock.now())
    }

    pub fn snapshot_at(&self, now: NaiveDateTime) -> Snapshot {
        let settings = self.settings_for_snapshot();
        Snapshot {
            timestamp: now,
            version: crate::VERSION.to_string(),
            relay_on: self.last_observed,
            current_price: self.prices.price_at(now).ok(),
            mode: settings.mode.clone(),
            enabled: settings.enabled,
            overridden: self.overrides.is_overridden(),
            override_hours_left: self.overrides.hours_left(),
            override_state: self.overrides.override_state(),
            last_desired: self.last_desired,
            last_error: self.last_error.clone(),
            last_update: self.last_update,
            prices_fetched_at: self.prices_fetched_at,
            today_prices: self.today_prices_for_snapshot(now, &settings),
            settings,
        }
    }

    /// Whole price table with the current hour's price
    pub fn price_overview(&self) -> PriceOverview {
        self.price_overview_at(self.clock.now())
    }

    fn price_overview_at(&self, now: NaiveDateTime) -> PriceOverview {
        PriceOverview {
            fetched_at: self.prices_fetched_at,
            current_price: self.prices.price_at(now).ok(),
            prices: self.prices.points(),
        }
    }

    /// Replace the values served through [`StatusFeed`]; returns the snapshot
    pub(super) fn refresh_feed(&self, now: NaiveDateTime) -> Snapshot {
        let snapshot = self.snapshot_at(now);
        self.snapshot_tx.send_replace(snapshot.clone());
        self.prices_tx.send_replace(self.price_overview_at(now));
        snapshot
    }

    /// Refresh the feed and send the snapshot to subscribers; nobody
    /// listening is fine
    pub(super) fn publish(&self, now: NaiveDateTime) {
        match serde_json::to_string(&self.refresh_feed(now)) {
            Ok(json) => {
                let _ = self.status_tx.send(json);
            }
            Err(e) => self
                .logger
                .warn(&format!("Failed to serialize status snapshot: {}", e)),
        }
    }

    /// Subscribe to JSON status snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Lock-free view for readers that share the controller behind a mutex
    pub fn status_feed(&self) -> StatusFeed {
        StatusFeed {
            snapshot: self.snapshot_tx.subscribe(),
            prices: self.prices_tx.subscribe(),
            updates: self.status_tx.clone(),
        }
    }
}
