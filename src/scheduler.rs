//! Decision and price-fetch scheduling
//!
//! One decision cycle at every full hour, price refreshes at fixed local
//! times of day with a bounded number of retries, and one extra decision
//! cycle shortly after a cycle that had to fail safe.

use crate::clock::{LocalClock, truncate_to_hour};
use crate::config::ScheduleConfig;
use crate::controller::RelayController;
use crate::error::{Result, SpotheatError};
use crate::logging::get_logger;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Start of the hour following `now`
pub fn next_hour_boundary(now: NaiveDateTime) -> NaiveDateTime {
    truncate_to_hour(now) + Duration::hours(1)
}

/// Earliest of `times` strictly after `now`, today or tomorrow
pub fn next_daily_at(now: NaiveDateTime, times: &[NaiveTime]) -> Option<NaiveDateTime> {
    let today = now.date();
    let tomorrow = today.succ_opt()?;
    times
        .iter()
        .map(|t| today.and_time(*t))
        .filter(|at| *at > now)
        .chain(times.iter().map(|t| tomorrow.and_time(*t)))
        .min()
}

/// Parse `HH:MM` fetch times
pub fn parse_fetch_times(times: &[String]) -> Result<Vec<NaiveTime>> {
    times
        .iter()
        .map(|t| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M").map_err(|_| {
                SpotheatError::validation("schedule.price_fetch_times", format!("'{}' is not HH:MM", t))
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Tick,
    FailureFollowUp,
    Fetch,
    FetchRetry,
}

/// Pending timers of the scheduler loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timers {
    pub next_tick: NaiveDateTime,
    pub next_fetch: Option<NaiveDateTime>,
    pub follow_up: Option<NaiveDateTime>,
    pub fetch_retry: Option<(NaiveDateTime, u32)>,
}

impl Timers {
    pub fn new(now: NaiveDateTime, fetch_times: &[NaiveTime]) -> Self {
        Self {
            next_tick: next_hour_boundary(now),
            next_fetch: next_daily_at(now, fetch_times),
            follow_up: None,
            fetch_retry: None,
        }
    }

    /// Earliest pending event; ties go to the decision tick
    pub fn next_event(&self) -> (NaiveDateTime, Event) {
        [
            Some((self.next_tick, Event::Tick)),
            self.follow_up.map(|at| (at, Event::FailureFollowUp)),
            self.next_fetch.map(|at| (at, Event::Fetch)),
            self.fetch_retry.map(|(at, _)| (at, Event::FetchRetry)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(at, _)| *at)
        .unwrap_or((self.next_tick, Event::Tick))
    }

    /// Move the decision tick past `now`
    pub fn tick_fired(&mut self, now: NaiveDateTime) {
        self.next_tick = next_hour_boundary(now);
    }

    /// Record a tick's outcome; a fail-safe cycle queues one follow-up when
    /// it lands before the next tick
    pub fn tick_done(&mut self, decided_at: NaiveDateTime, fail_safe: bool, config: &ScheduleConfig) {
        self.follow_up = None;
        if !fail_safe || config.failure_retry_minutes == 0 {
            return;
        }
        let at = decided_at + Duration::minutes(i64::from(config.failure_retry_minutes));
        self.follow_up = (at < self.next_tick).then_some(at);
    }

    /// A follow-up never queues another one
    pub fn follow_up_done(&mut self) {
        self.follow_up = None;
    }

    /// Record a scheduled fetch and move to the next fetch time
    pub fn fetch_done(
        &mut self,
        now: NaiveDateTime,
        fetch_times: &[NaiveTime],
        ok: bool,
        config: &ScheduleConfig,
    ) {
        self.next_fetch = next_daily_at(now, fetch_times);
        self.fetch_retry = retry_after(now, 0, ok, config);
    }

    /// Record a retried fetch
    pub fn retry_done(&mut self, now: NaiveDateTime, ok: bool, config: &ScheduleConfig) {
        let attempt = self.fetch_retry.map_or(0, |(_, n)| n);
        self.fetch_retry = retry_after(now, attempt, ok, config);
    }

    pub fn retry_attempt(&self) -> u32 {
        self.fetch_retry.map_or(0, |(_, n)| n)
    }
}

/// Retry to queue after fetch number `attempt` (0 is the scheduled one)
fn retry_after(
    now: NaiveDateTime,
    attempt: u32,
    ok: bool,
    config: &ScheduleConfig,
) -> Option<(NaiveDateTime, u32)> {
    if ok || attempt >= config.price_fetch_max_retries {
        return None;
    }
    let delay = Duration::minutes(i64::from(config.price_fetch_retry_minutes.max(1)));
    Some((now + delay, attempt + 1))
}

/// Drives a shared [`RelayController`]
pub struct Scheduler {
    controller: Arc<Mutex<RelayController>>,
    config: ScheduleConfig,
    fetch_times: Vec<NaiveTime>,
    clock: LocalClock,
    logger: crate::logging::StructuredLogger,
}

impl Scheduler {
    pub fn new(
        controller: Arc<Mutex<RelayController>>,
        config: ScheduleConfig,
        clock: LocalClock,
    ) -> Result<Self> {
        let fetch_times = parse_fetch_times(&config.price_fetch_times)?;
        Ok(Self {
            controller,
            config,
            fetch_times,
            clock,
            logger: get_logger("scheduler"),
        })
    }

    /// Initial fetch and decision, then the schedule until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        self.startup().await;

        tokio::pin!(shutdown);
        let mut timers = Timers::new(self.clock.now(), &self.fetch_times);

        loop {
            let (at, event) = timers.next_event();
            let wait = (at - self.clock.now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = &mut shutdown => {
                    self.logger.info("Scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            // Never act for an earlier slot when the wall clock lags the timer
            let now = self.clock.now().max(at);
            match event {
                Event::Tick => {
                    timers.tick_fired(now);
                    let fail_safe = self.decide(now).await;
                    timers.tick_done(now, fail_safe, &self.config);
                }
                Event::FailureFollowUp => {
                    self.logger.info("Re-running decision after failed cycle");
                    timers.follow_up_done();
                    self.decide(now).await;
                }
                Event::Fetch => {
                    let ok = self.fetch(0).await;
                    timers.fetch_done(now, &self.fetch_times, ok, &self.config);
                }
                Event::FetchRetry => {
                    let ok = self.fetch(timers.retry_attempt()).await;
                    timers.retry_done(now, ok, &self.config);
                }
            }
        }
    }

    async fn startup(&self) {
        let mut controller = self.controller.lock().await;
        if self.config.fetch_on_startup {
            if let Err(e) = controller.refresh_prices().await {
                self.logger
                    .warn(&format!("Initial price fetch failed: {}", e));
            }
        }
        controller.update().await;
    }

    /// Run one decision cycle; true when it failed safe
    async fn decide(&self, now: NaiveDateTime) -> bool {
        self.controller.lock().await.update_at(now).await.fail_safe
    }

    /// Fetch prices, logging the failure; `attempt` 0 is the scheduled fetch
    async fn fetch(&self, attempt: u32) -> bool {
        let result = self.controller.lock().await.refresh_prices().await;
        match result {
            Ok(_) => true,
            Err(e) if attempt < self.config.price_fetch_max_retries => {
                self.logger.warn(&format!(
                    "Price fetch failed ({}), retry {}/{} in {} min",
                    e,
                    attempt + 1,
                    self.config.price_fetch_max_retries,
                    self.config.price_fetch_retry_minutes.max(1)
                ));
                false
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Price fetch failed after {} retries, keeping stored prices: {}",
                    attempt, e
                ));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn hour_boundary() {
        assert_eq!(next_hour_boundary(at(1, 10, 0)), at(1, 11, 0));
        assert_eq!(next_hour_boundary(at(1, 10, 59)), at(1, 11, 0));
        assert_eq!(next_hour_boundary(at(1, 23, 30)), at(2, 0, 0));
    }

    #[test]
    fn daily_times() {
        let times = parse_fetch_times(&["21:42".to_string(), "13:15".to_string()]).unwrap();
        assert_eq!(next_daily_at(at(1, 9, 0), &times), Some(at(1, 13, 15)));
        assert_eq!(next_daily_at(at(1, 14, 0), &times), Some(at(1, 21, 42)));
        assert_eq!(next_daily_at(at(1, 21, 42), &times), Some(at(2, 13, 15)));
        assert_eq!(next_daily_at(at(1, 9, 0), &[]), None);
    }

    #[test]
    fn rejects_bad_fetch_times() {
        assert!(parse_fetch_times(&["9".to_string()]).is_err());
        assert!(parse_fetch_times(&["24:00".to_string()]).is_err());
    }

    fn schedule(retry_minutes: u32, max_retries: u32, failure_retry_minutes: u32) -> ScheduleConfig {
        ScheduleConfig {
            price_fetch_retry_minutes: retry_minutes,
            price_fetch_max_retries: max_retries,
            failure_retry_minutes,
            ..ScheduleConfig::default()
        }
    }

    #[test]
    fn next_event_picks_earliest() {
        let times = parse_fetch_times(&["09:20".to_string()]).unwrap();
        let mut timers = Timers::new(at(1, 9, 5), &times);
        assert_eq!(timers.next_event(), (at(1, 9, 20), Event::Fetch));

        timers.follow_up = Some(at(1, 9, 15));
        assert_eq!(timers.next_event(), (at(1, 9, 15), Event::FailureFollowUp));

        timers.fetch_retry = Some((at(1, 9, 10), 1));
        assert_eq!(timers.next_event(), (at(1, 9, 10), Event::FetchRetry));

        timers.next_fetch = Some(at(1, 10, 0));
        timers.follow_up = None;
        timers.fetch_retry = None;
        assert_eq!(timers.next_event(), (at(1, 10, 0), Event::Tick));
    }

    #[test]
    fn failed_fetch_queues_retries_until_limit() {
        let times = parse_fetch_times(&["21:42".to_string()]).unwrap();
        let config = schedule(15, 2, 5);
        let mut timers = Timers::new(at(1, 21, 0), &times);

        timers.fetch_done(at(1, 21, 42), &times, false, &config);
        assert_eq!(timers.next_fetch, Some(at(2, 21, 42)));
        assert_eq!(timers.fetch_retry, Some((at(1, 21, 57), 1)));

        timers.retry_done(at(1, 21, 57), false, &config);
        assert_eq!(timers.fetch_retry, Some((at(1, 22, 12), 2)));

        timers.retry_done(at(1, 22, 12), false, &config);
        assert_eq!(timers.fetch_retry, None);
    }

    #[test]
    fn successful_fetch_clears_retry() {
        let times = parse_fetch_times(&["21:42".to_string()]).unwrap();
        let config = schedule(15, 3, 5);
        let mut timers = Timers::new(at(1, 21, 0), &times);

        timers.fetch_done(at(1, 21, 42), &times, true, &config);
        assert_eq!(timers.fetch_retry, None);

        timers.fetch_done(at(1, 21, 42), &times, false, &config);
        timers.retry_done(at(1, 21, 57), true, &config);
        assert_eq!(timers.fetch_retry, None);
    }

    #[test]
    fn no_retry_when_retries_disabled() {
        let times = parse_fetch_times(&["21:42".to_string()]).unwrap();
        let config = schedule(0, 0, 5);
        let mut timers = Timers::new(at(1, 21, 0), &times);
        timers.fetch_done(at(1, 21, 42), &times, false, &config);
        assert_eq!(timers.fetch_retry, None);

        // zero retry delay still waits a minute
        let config = schedule(0, 1, 5);
        timers.fetch_done(at(1, 21, 42), &times, false, &config);
        assert_eq!(timers.fetch_retry, Some((at(1, 21, 43), 1)));
    }

    #[test]
    fn follow_up_only_before_next_tick() {
        let config = schedule(15, 3, 5);
        let mut timers = Timers::new(at(1, 9, 0), &[]);
        timers.tick_fired(at(1, 10, 0));
        assert_eq!(timers.next_tick, at(1, 11, 0));

        timers.tick_done(at(1, 10, 0), true, &config);
        assert_eq!(timers.follow_up, Some(at(1, 10, 5)));

        timers.tick_done(at(1, 10, 0), false, &config);
        assert_eq!(timers.follow_up, None);

        // lands on the next tick
        timers.tick_done(at(1, 10, 55), true, &config);
        assert_eq!(timers.follow_up, None);

        timers.tick_done(at(1, 10, 0), true, &schedule(15, 3, 0));
        assert_eq!(timers.follow_up, None);
    }

    #[test]
    fn follow_up_does_not_requeue() {
        let config = schedule(15, 3, 5);
        let mut timers = Timers::new(at(1, 9, 0), &[]);
        timers.tick_fired(at(1, 10, 0));
        timers.tick_done(at(1, 10, 0), true, &config);
        assert_eq!(timers.next_event(), (at(1, 10, 5), Event::FailureFollowUp));

        timers.follow_up_done();
        assert_eq!(timers.follow_up, None);
        assert_eq!(timers.next_event(), (at(1, 11, 0), Event::Tick));
    }
}
