#![no_main]
use libfuzzer_sys::fuzz_target;
use spotheat::clock::LocalClock;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Every accepted point must be hour-aligned, whichever home is picked
    for clock in [LocalClock::new(None), LocalClock::new(Some(chrono_tz::Europe::Stockholm))] {
        for home in [None, Some("home-a")] {
            if let Ok(points) = spotheat::prices::parse_price_info(&body, home, &clock) {
                let table = spotheat::prices::PriceTable::from_points(points.iter().copied());
                assert!(table.len() <= points.len());
                for p in &points {
                    assert_eq!(p.starts_at, spotheat::clock::truncate_to_hour(p.starts_at));
                }
            }
        }
    }
});

