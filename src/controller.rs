//! Relay controller
//!
//! Owns the price table and the override state and runs one decision cycle
//! per scheduled tick. Every entry point expects exclusive access; hosts share
//! the controller behind a single `tokio::sync::Mutex`.

mod snapshot;
pub mod types;

pub use snapshot::StatusFeed;
pub use types::{HourPrice, LastError, PriceOverview, Snapshot, TurnOutcome, UpdateOutcome};

use crate::clock::LocalClock;
use crate::config::Config;
use crate::error::{Result, SpotheatError};
use crate::logging::get_logger;
use crate::override_tracker::{OverrideTracker, OverrideVerdict};
use crate::persistence::PersistenceManager;
use crate::policy;
use crate::prices::{PriceSource, PriceTable, TibberPriceSource};
use crate::relay::{RelayDevice, ShellyRelay};
use crate::settings::{HeaterSettings, JsonSettingsStore, SettingsStore};
use crate::state_log::{StateLog, StateLogEntry};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Price re-fetches allowed within one decision cycle
pub const MAX_DECISION_RETRIES: u32 = 1;

/// Decision-and-override state machine around one relay
pub struct RelayController {
    clock: LocalClock,
    prices: PriceTable,
    prices_fetched_at: Option<NaiveDateTime>,
    price_source: Arc<dyn PriceSource>,
    relay: Arc<dyn RelayDevice>,
    settings: Arc<dyn SettingsStore>,
    state_log: StateLog,
    overrides: OverrideTracker,
    persistence: Option<PersistenceManager>,
    last_observed: Option<bool>,
    last_desired: Option<bool>,
    last_error: Option<LastError>,
    last_update: Option<NaiveDateTime>,
    status_tx: broadcast::Sender<String>,
    snapshot_tx: watch::Sender<Snapshot>,
    prices_tx: watch::Sender<PriceOverview>,
    logger: crate::logging::StructuredLogger,
}

impl RelayController {
    /// Controller with an in-memory state log and no persistence
    pub fn new(
        relay: Arc<dyn RelayDevice>,
        price_source: Arc<dyn PriceSource>,
        settings: Arc<dyn SettingsStore>,
        manual_override_nb_runs: u32,
        clock: LocalClock,
    ) -> Self {
        let (status_tx, _status_rx) = broadcast::channel::<String>(100);
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        let (prices_tx, _) = watch::channel(PriceOverview::default());
        let controller = Self {
            clock,
            prices: PriceTable::new(),
            prices_fetched_at: None,
            price_source,
            relay,
            settings,
            state_log: StateLog::in_memory(),
            overrides: OverrideTracker::new(manual_override_nb_runs),
            persistence: None,
            last_observed: None,
            last_desired: None,
            last_error: None,
            last_update: None,
            status_tx,
            snapshot_tx,
            prices_tx,
            logger: get_logger("controller"),
        };
        controller.refresh_feed(clock.now());
        controller
    }

    /// Wire up the Shelly relay, the Tibber source and the file stores
    pub fn from_config(config: &Config) -> Result<Self> {
        let clock = LocalClock::from_config(config)?;
        let relay = Arc::new(ShellyRelay::new(&config.relay)?);
        let source = Arc::new(TibberPriceSource::new(&config.tibber, clock)?);
        let settings = Arc::new(JsonSettingsStore::new(&config.controller.settings_file));
        let mut controller = Self::new(
            relay,
            source,
            settings,
            config.controller.manual_override_nb_runs,
            clock,
        )
        .with_state_log(StateLog::open(&config.controller.state_log_file));
        if config.controller.persist_override {
            let mut pm = PersistenceManager::new(&config.controller.state_file);
            if let Err(e) = pm.load() {
                controller
                    .logger
                    .warn(&format!("Ignoring unreadable controller state: {}", e));
            }
            controller = controller.with_persistence(pm);
        }
        Ok(controller)
    }

    pub fn with_state_log(mut self, state_log: StateLog) -> Self {
        self.state_log = state_log;
        self
    }

    /// Persist the override countdown, restoring what the manager loaded
    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        let restored = persistence.overrides();
        if restored.override_hours_left > 0 {
            self.logger.info(&format!(
                "Restored override: {} cycles left, state {:?}",
                restored.override_hours_left, restored.override_state
            ));
        }
        self.overrides.restore(restored);
        self.persistence = Some(persistence);
        self.refresh_feed(self.clock.now());
        self
    }

    /// Start from a known price table
    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self.refresh_feed(self.clock.now());
        self
    }

    pub fn clock(&self) -> LocalClock {
        self.clock
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn override_hours_left(&self) -> u32 {
        self.overrides.hours_left()
    }

    pub fn override_state(&self) -> Option<bool> {
        self.overrides.override_state()
    }

    pub fn last_commanded(&self) -> Option<bool> {
        self.overrides.last_commanded()
    }

    /// Newest `limit` state log entries, oldest first
    pub fn history(&self, limit: usize) -> Vec<StateLogEntry> {
        self.state_log.recent(limit)
    }

    /// Re-fetch the price table; the previous table survives any failure
    pub async fn refresh_prices(&mut self) -> Result<usize> {
        let now = self.clock.now();
        let result = self.refresh_prices_at(now).await;
        if result.is_ok() {
            self.publish(now);
        }
        result
    }

    async fn refresh_prices_at(&mut self, now: NaiveDateTime) -> Result<usize> {
        match self.prices.fetch(self.price_source.as_ref()).await {
            Ok(count) => {
                self.prices_fetched_at = Some(now);
                self.logger
                    .info(&format!("Price table replaced with {} hours", count));
                Ok(count)
            }
            Err(e) => {
                self.logger.warn(&format!(
                    "Price fetch failed, keeping {} stored hours: {}",
                    self.prices.len(),
                    e
                ));
                Err(e)
            }
        }
    }

    /// Run one decision cycle at the current local time
    pub async fn update(&mut self) -> UpdateOutcome {
        let now = self.clock.now();
        self.update_at(now).await
    }

    /// Run one decision cycle as of `now`
    ///
    /// Never fails: every problem degrades to OFF and lands in `last_error`.
    pub async fn update_at(&mut self, now: NaiveDateTime) -> UpdateOutcome {
        let mut refetched = false;
        let (settings, decision) = match self.settings.load() {
            Ok(settings) if !settings.enabled => {
                self.logger.info("Heater disabled in settings");
                (settings, Ok(false))
            }
            Ok(settings) => {
                let decision = self.decide_with_retry(now, &settings, &mut refetched).await;
                (settings, decision)
            }
            Err(e) => (HeaterSettings::default(), Err(e)),
        };

        let (desired, fail_safe) = match decision {
            Ok(desired) => (desired, false),
            Err(e) => {
                self.logger
                    .error(&format!("Decision failed, forcing relay OFF: {}", e));
                self.record_error(now, &e);
                (false, true)
            }
        };
        self.last_desired = Some(desired);

        let turn = self.turn_at(desired, now).await;
        let outcome = UpdateOutcome {
            desired,
            fail_safe,
            refetched,
            turn,
        };
        if outcome.is_clean() {
            self.last_error = None;
        }
        self.last_update = Some(now);
        self.finish_cycle(now, &settings.mode, outcome.turn.relay_on);
        outcome
    }

    async fn decide_with_retry(
        &mut self,
        now: NaiveDateTime,
        settings: &HeaterSettings,
        refetched: &mut bool,
    ) -> Result<bool> {
        let mut retries = 0;
        loop {
            match policy::decide(&self.prices, now, settings) {
                Ok(desired) => return Ok(desired),
                Err(e) if e.is_price_unavailable() && retries < MAX_DECISION_RETRIES => {
                    retries += 1;
                    *refetched = true;
                    self.logger
                        .warn(&format!("{}; re-fetching prices before deciding", e));
                    // A failed fetch leaves the table as is and the next
                    // decide reports the original problem
                    let _ = self.refresh_prices_at(now).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive the relay toward `desired`, honouring an active override
    pub async fn turn(&mut self, desired: bool) -> TurnOutcome {
        let now = self.clock.now();
        self.turn_at(desired, now).await
    }

    async fn turn_at(&mut self, desired: bool, now: NaiveDateTime) -> TurnOutcome {
        let (observed, observe_error) = self.observe(now).await;

        match self.overrides.evaluate(observed) {
            OverrideVerdict::Auto => {
                let mut outcome = self.apply(desired, observed, false, now).await;
                if outcome.error.is_none() {
                    outcome.error = observe_error;
                }
                outcome
            }
            verdict => {
                match verdict {
                    OverrideVerdict::Detected { observed } => self.logger.warn(&format!(
                        "External change detected (relay {}), automatic control suspended for {} cycles",
                        on_off(observed),
                        self.overrides.hours_left()
                    )),
                    _ => self.logger.info(&format!(
                        "Override active, skipping relay update. {} cycles left",
                        self.overrides.hours_left()
                    )),
                }
                TurnOutcome {
                    observed,
                    relay_on: observed,
                    actuated: false,
                    suppressed: true,
                    error: observe_error,
                }
            }
        }
    }

    /// Command the relay regardless of any override, then hold the commanded
    /// state for the configured number of cycles
    pub async fn manual_turn(&mut self, on: bool) -> Result<TurnOutcome> {
        let now = self.clock.now();
        self.logger
            .info(&format!("Manual command: relay {}", on_off(on)));
        let (observed, _) = self.observe(now).await;
        let outcome = self.apply(on, observed, true, now).await;
        if let Some(message) = &outcome.error {
            let mode = self.current_mode_label();
            self.finish_cycle(now, &mode, outcome.relay_on);
            return Err(SpotheatError::actuation(message.clone()));
        }
        self.overrides.arm(on);
        if let Some(confirmed) = outcome.relay_on {
            self.overrides.record_commanded(Some(confirmed));
        }
        self.last_desired = Some(on);
        let mode = self.current_mode_label();
        self.finish_cycle(now, &mode, outcome.relay_on);
        Ok(outcome)
    }

    /// Drop any override and run a decision cycle right away
    pub async fn resume(&mut self) -> UpdateOutcome {
        if self.overrides.is_overridden() {
            self.logger.info("Resuming automatic control");
        }
        self.overrides.clear();
        self.update().await
    }

    /// Validate and store new heater settings, then re-decide
    pub async fn update_settings(&mut self, settings: HeaterSettings) -> Result<UpdateOutcome> {
        settings.validate()?;
        self.settings.save(&settings)?;
        self.logger.info(&format!(
            "Settings updated: mode={} max_price={} n_cheapest={} enabled={}",
            settings.mode, settings.max_price, settings.n_cheapest, settings.enabled
        ));
        Ok(self.update().await)
    }

    /// Current heater settings
    pub fn settings(&self) -> Result<HeaterSettings> {
        self.settings.load()
    }

    async fn observe(&mut self, now: NaiveDateTime) -> (Option<bool>, Option<String>) {
        match self.relay.observe().await {
            Ok(state) => {
                self.last_observed = Some(state);
                (Some(state), None)
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Relay state unknown: {}", e));
                self.last_observed = None;
                self.record_error(now, &e);
                (None, Some(e.to_string()))
            }
        }
    }

    /// Actuate unless the relay already shows `desired` (or `force`), then
    /// re-read the relay to set the new baseline
    async fn apply(
        &mut self,
        desired: bool,
        observed: Option<bool>,
        force: bool,
        now: NaiveDateTime,
    ) -> TurnOutcome {
        if !force && observed == Some(desired) {
            self.overrides.record_commanded(Some(desired));
            self.logger
                .debug(&format!("Relay already {}", on_off(desired)));
            return TurnOutcome {
                observed,
                relay_on: observed,
                ..Default::default()
            };
        }

        if let Err(e) = self.relay.actuate(desired).await {
            self.logger.error(&format!(
                "Failed to turn relay {}: {}",
                on_off(desired),
                e
            ));
            self.overrides.record_commanded(None);
            self.record_error(now, &e);
            return TurnOutcome {
                observed,
                relay_on: observed,
                actuated: false,
                suppressed: false,
                error: Some(e.to_string()),
            };
        }

        self.logger.info(&format!("Relay turned {}", on_off(desired)));
        let (confirmed, error) = self.observe(now).await;
        self.overrides.record_commanded(confirmed);
        TurnOutcome {
            observed,
            relay_on: confirmed,
            actuated: true,
            suppressed: false,
            error,
        }
    }

    fn record_error(&mut self, now: NaiveDateTime, err: &SpotheatError) {
        self.last_error = Some(LastError {
            message: err.to_string(),
            timestamp: now,
        });
    }

    fn current_mode_label(&self) -> String {
        self.settings
            .load()
            .map(|s| s.mode)
            .unwrap_or_else(|_| HeaterSettings::default().mode)
    }

    /// Log the hour, persist override state and notify subscribers
    fn finish_cycle(&mut self, now: NaiveDateTime, mode: &str, relay_on: Option<bool>) {
        let entry = StateLogEntry {
            time: now,
            relay_on,
            mode: mode.to_string(),
            override_state: self.overrides.override_state(),
            price: self.prices.price_at(now).ok(),
        };
        if let Err(e) = self.state_log.upsert_hour(entry) {
            self.logger
                .warn(&format!("Failed to write state log: {}", e));
        }
        if let Some(pm) = self.persistence.as_mut() {
            if let Err(e) = pm.store_overrides(self.overrides.state(), now) {
                self.logger
                    .warn(&format!("Failed to persist override state: {}", e));
            }
        }
        self.publish(now);
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}
