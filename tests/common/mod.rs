#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use spotheat::clock::LocalClock;
use spotheat::controller::RelayController;
use spotheat::error::{Result, SpotheatError};
use spotheat::prices::{PricePoint, PriceSource};
use spotheat::relay::RelayDevice;
use spotheat::settings::{HeaterSettings, MemorySettingsStore};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory relay whose state tests can flip behind the controller's back
#[derive(Default)]
pub struct FakeRelay {
    state: Mutex<bool>,
    unreachable: AtomicBool,
    fail_actuate: AtomicBool,
    actuations: AtomicUsize,
}

impl FakeRelay {
    pub fn new(on: bool) -> Arc<Self> {
        let relay = Self::default();
        *relay.state.lock().unwrap() = on;
        Arc::new(relay)
    }

    /// Someone toggles the relay by hand
    pub fn flip_externally(&self, on: bool) {
        *self.state.lock().unwrap() = on;
    }

    pub fn is_on(&self) -> bool {
        *self.state.lock().unwrap()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_fail_actuate(&self, fail: bool) {
        self.fail_actuate.store(fail, Ordering::SeqCst);
    }

    pub fn actuations(&self) -> usize {
        self.actuations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayDevice for FakeRelay {
    async fn observe(&self) -> Result<bool> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SpotheatError::device_unreachable("fake relay offline"));
        }
        Ok(*self.state.lock().unwrap())
    }

    async fn actuate(&self, on: bool) -> Result<()> {
        if self.fail_actuate.load(Ordering::SeqCst) {
            return Err(SpotheatError::actuation("fake relay refused command"));
        }
        self.actuations.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = on;
        Ok(())
    }
}

/// Price source returning a fixed set of points, or failing
#[derive(Default)]
pub struct FakePriceSource {
    points: Mutex<Option<Vec<PricePoint>>>,
    calls: AtomicUsize,
}

impl FakePriceSource {
    pub fn with_points(points: Vec<PricePoint>) -> Arc<Self> {
        let source = Self::default();
        *source.points.lock().unwrap() = Some(points);
        Arc::new(source)
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for FakePriceSource {
    async fn fetch_prices(&self) -> Result<Vec<PricePoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.points
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SpotheatError::fetch("fake source unavailable"))
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    day().and_hms_opt(hour, minute, 0).unwrap()
}

/// 08:00 0.30, 09:00 0.10, 10:00 0.25, 11:00 0.05
pub fn sample_points() -> Vec<PricePoint> {
    [(8, 0.30), (9, 0.10), (10, 0.25), (11, 0.05)]
        .into_iter()
        .map(|(h, p)| PricePoint::new(at(h, 0), p))
        .collect()
}

pub fn n_cheapest(n: usize) -> HeaterSettings {
    HeaterSettings {
        mode: "N_CHEAPEST_TODAY".to_string(),
        n_cheapest: n,
        ..HeaterSettings::default()
    }
}

pub fn price_limit(max_price: f64) -> HeaterSettings {
    HeaterSettings {
        mode: "PRICE_LIMIT".to_string(),
        max_price,
        ..HeaterSettings::default()
    }
}

pub struct Harness {
    pub relay: Arc<FakeRelay>,
    pub source: Arc<FakePriceSource>,
    pub store: MemorySettingsStore,
}

impl Harness {
    pub fn new(relay_on: bool, source: Arc<FakePriceSource>, settings: HeaterSettings) -> Self {
        Self {
            relay: FakeRelay::new(relay_on),
            source,
            store: MemorySettingsStore::new(settings),
        }
    }

    pub fn controller(&self, nb_runs: u32) -> RelayController {
        RelayController::new(
            self.relay.clone(),
            self.source.clone(),
            Arc::new(self.store.clone()),
            nb_runs,
            LocalClock::new(None),
        )
    }
}
