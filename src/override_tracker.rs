//! External-change detection
//!
//! The tracker remembers the relay state this controller last confirmed. When
//! a fresh observation disagrees, someone else moved the relay (a person, the
//! vendor app, or a device reboot) and automatic control backs off for a
//! fixed number of decision cycles.

use serde::{Deserialize, Serialize};

/// Outcome of checking a fresh observation against the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideVerdict {
    /// Automatic control may actuate
    Auto,
    /// An external change was detected this cycle; countdown armed
    Detected { observed: bool },
    /// An earlier override is still active; `hours_left` after this cycle
    Suppressed { hours_left: u32 },
}

impl OverrideVerdict {
    pub fn suppresses_actuation(&self) -> bool {
        !matches!(self, Self::Auto)
    }
}

/// Persistable tracker state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideState {
    pub override_hours_left: u32,
    pub override_state: Option<bool>,
    pub last_commanded: Option<bool>,
}

/// AUTO / OVERRIDDEN state machine
#[derive(Debug, Clone)]
pub struct OverrideTracker {
    nb_runs: u32,
    state: OverrideState,
}

impl OverrideTracker {
    /// Tracker that suspends automatic control for `nb_runs` cycles per
    /// detected external change
    pub fn new(nb_runs: u32) -> Self {
        Self {
            nb_runs,
            state: OverrideState::default(),
        }
    }

    /// Evaluate one decision cycle against the freshly observed relay state
    ///
    /// Detection needs both a known observation and an established baseline.
    /// The detecting cycle arms the countdown without consuming it; every
    /// later cycle while armed consumes one run.
    pub fn evaluate(&mut self, observed: Option<bool>) -> OverrideVerdict {
        if let (Some(observed), Some(commanded)) = (observed, self.state.last_commanded) {
            if observed != commanded {
                self.arm(observed);
                return OverrideVerdict::Detected { observed };
            }
        }
        if self.state.override_hours_left > 0 {
            self.state.override_hours_left -= 1;
            if self.state.override_hours_left == 0 {
                self.state.override_state = None;
            }
            return OverrideVerdict::Suppressed {
                hours_left: self.state.override_hours_left,
            };
        }
        OverrideVerdict::Auto
    }

    /// Arm the countdown with `state` as both override and new baseline
    pub fn arm(&mut self, state: bool) {
        self.state.override_hours_left = self.nb_runs;
        self.state.override_state = Some(state);
        self.state.last_commanded = Some(state);
    }

    /// Return to automatic control immediately
    pub fn clear(&mut self) {
        self.state.override_hours_left = 0;
        self.state.override_state = None;
    }

    /// Record the state confirmed after an actuation; `None` when unknown
    pub fn record_commanded(&mut self, state: Option<bool>) {
        self.state.last_commanded = state;
    }

    pub fn is_overridden(&self) -> bool {
        self.state.override_hours_left > 0
    }

    pub fn hours_left(&self) -> u32 {
        self.state.override_hours_left
    }

    pub fn override_state(&self) -> Option<bool> {
        self.state.override_state
    }

    pub fn last_commanded(&self) -> Option<bool> {
        self.state.last_commanded
    }

    pub fn nb_runs(&self) -> u32 {
        self.nb_runs
    }

    pub fn state(&self) -> OverrideState {
        self.state
    }

    /// Restore a persisted countdown after a restart
    ///
    /// The baseline is never restored: the relay may have changed while the
    /// process was down, and the first observation must not count as an
    /// external change.
    pub fn restore(&mut self, state: OverrideState) {
        let active = state.override_hours_left > 0;
        self.state = OverrideState {
            override_hours_left: state.override_hours_left,
            override_state: state.override_state.filter(|_| active),
            last_commanded: None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_never_triggers() {
        let mut t = OverrideTracker::new(5);
        assert_eq!(t.evaluate(Some(true)), OverrideVerdict::Auto);
        assert!(!t.is_overridden());
    }

    #[test]
    fn unknown_observation_skips_detection() {
        let mut t = OverrideTracker::new(5);
        t.record_commanded(Some(false));
        assert_eq!(t.evaluate(None), OverrideVerdict::Auto);
    }

    #[test]
    fn countdown_lifecycle() {
        let mut t = OverrideTracker::new(5);
        t.record_commanded(Some(false));
        assert_eq!(
            t.evaluate(Some(true)),
            OverrideVerdict::Detected { observed: true }
        );
        assert_eq!(t.hours_left(), 5);
        assert_eq!(t.override_state(), Some(true));
        assert_eq!(t.last_commanded(), Some(true));

        for expected in (0..5).rev() {
            assert_eq!(
                t.evaluate(Some(true)),
                OverrideVerdict::Suppressed {
                    hours_left: expected
                }
            );
        }
        assert!(!t.is_overridden());
        assert_eq!(t.override_state(), None);
        assert_eq!(t.evaluate(Some(true)), OverrideVerdict::Auto);
    }

    #[test]
    fn another_change_rearms() {
        let mut t = OverrideTracker::new(3);
        t.record_commanded(Some(false));
        t.evaluate(Some(true));
        t.evaluate(Some(true));
        assert_eq!(t.hours_left(), 2);
        assert_eq!(
            t.evaluate(Some(false)),
            OverrideVerdict::Detected { observed: false }
        );
        assert_eq!(t.hours_left(), 3);
    }

    #[test]
    fn clear_and_restore() {
        let mut t = OverrideTracker::new(5);
        t.arm(true);
        t.clear();
        assert!(!t.is_overridden());
        assert_eq!(t.last_commanded(), Some(true));

        t.restore(OverrideState {
            override_hours_left: 2,
            override_state: Some(false),
            last_commanded: Some(false),
        });
        assert_eq!(t.hours_left(), 2);
        assert_eq!(t.override_state(), Some(false));
        assert_eq!(t.last_commanded(), None);
    }

    #[test]
    fn restored_countdown_ignores_first_observation() {
        let mut t = OverrideTracker::new(5);
        t.restore(OverrideState {
            override_hours_left: 2,
            override_state: Some(true),
            last_commanded: Some(true),
        });
        assert_eq!(
            t.evaluate(Some(false)),
            OverrideVerdict::Suppressed { hours_left: 1 }
        );

        let mut idle = OverrideTracker::new(5);
        idle.restore(OverrideState {
            override_hours_left: 0,
            override_state: Some(true),
            last_commanded: Some(true),
        });
        assert_eq!(idle.evaluate(Some(false)), OverrideVerdict::Auto);
        assert_eq!(idle.override_state(), None);
    }
}
