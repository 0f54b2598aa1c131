mod common;

use common::{FakePriceSource, Harness, n_cheapest, sample_points};
use spotheat::clock::LocalClock;
use spotheat::config::ScheduleConfig;
use spotheat::scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::test]
async fn startup_fetches_prices_and_decides_once() {
    let h = Harness::new(false, FakePriceSource::with_points(sample_points()), n_cheapest(2));
    let controller = Arc::new(Mutex::new(h.controller(5)));
    let scheduler =
        Scheduler::new(controller.clone(), ScheduleConfig::default(), LocalClock::new(None)).unwrap();

    scheduler.run(std::future::ready(())).await;

    // The fake prices are for a past day, so the startup cycle fails safe
    // after the single in-cycle re-fetch
    assert_eq!(h.source.calls(), 2);
    let ctrl = controller.lock().await;
    assert_eq!(ctrl.prices().len(), 4);
    assert_eq!(ctrl.history(10).len(), 1);
    assert!(ctrl.last_error().is_some());
    assert!(!h.relay.is_on());
}

#[tokio::test]
async fn startup_fetch_can_be_disabled() {
    let h = Harness::new(false, FakePriceSource::failing(), n_cheapest(2));
    let controller = Arc::new(Mutex::new(h.controller(5)));
    let config = ScheduleConfig {
        fetch_on_startup: false,
        ..ScheduleConfig::default()
    };
    let scheduler = Scheduler::new(controller.clone(), config, LocalClock::new(None)).unwrap();

    scheduler.run(std::future::ready(())).await;

    // Only the decision cycle's own re-fetch reaches the source
    assert_eq!(h.source.calls(), 1);
    assert_eq!(controller.lock().await.history(10).len(), 1);
}

#[test]
fn invalid_fetch_times_are_rejected() {
    let h = Harness::new(false, FakePriceSource::failing(), n_cheapest(2));
    let controller = Arc::new(Mutex::new(h.controller(5)));
    let config = ScheduleConfig {
        price_fetch_times: vec!["7pm".to_string()],
        ..ScheduleConfig::default()
    };
    assert!(Scheduler::new(controller, config, LocalClock::new(None)).is_err());
}
