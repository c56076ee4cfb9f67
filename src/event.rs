//! Debounced occlusion events.
//!
//! Turns one noisy visibility sample per poll tick into at most one upload
//! per covered/uncovered cycle:
//!
//! ```text
//! WaitingVisible --visible--> WaitingHidden --hidden--> Cooldown{since}
//!       ^                          ^                       |
//!       |                          +-------visible---------+
//!       +------------- hidden for >= dwell (fire) ---------+
//! ```
//!
//! A reappearance during `Cooldown` resets the dwell timer; time spent hidden
//! never carries over across a reappearance.

use std::time::{Duration, Instant};

pub const DEFAULT_DWELL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventState {
    /// Waiting for the markers to be seen (initial state, and after an upload).
    WaitingVisible,
    /// Markers seen; waiting for them to be covered.
    WaitingHidden,
    /// Markers covered since `since`; waiting for the dwell time to elapse.
    Cooldown { since: Instant },
}

impl EventState {
    pub fn name(&self) -> &'static str {
        match self {
            EventState::WaitingVisible => "waiting_visible",
            EventState::WaitingHidden => "waiting_hidden",
            EventState::Cooldown { .. } => "cooldown",
        }
    }

    pub fn hidden_since(&self) -> Option<Instant> {
        match self {
            EventState::Cooldown { since } => Some(*since),
            _ => None,
        }
    }
}

/// Outcome of feeding one sample to the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: EventState,
    pub to: EventState,
    /// The dwell condition was met on this sample: deliver the upload.
    pub fire: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

pub struct EventStateMachine {
    state: EventState,
    dwell: Duration,
}

impl EventStateMachine {
    pub fn new(dwell: Duration) -> Self {
        Self {
            state: EventState::WaitingVisible,
            dwell,
        }
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Feed the visibility sample taken at `now`.
    pub fn observe(&mut self, visible: bool, now: Instant) -> Transition {
        let from = self.state;
        let (to, fire) = step(from, visible, now, self.dwell);
        self.state = to;
        Transition { from, to, fire }
    }
}

impl Default for EventStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_DWELL)
    }
}

fn step(state: EventState, visible: bool, now: Instant, dwell: Duration) -> (EventState, bool) {
    match state {
        EventState::WaitingVisible => {
            if visible {
                (EventState::WaitingHidden, false)
            } else {
                (EventState::WaitingVisible, false)
            }
        }
        EventState::WaitingHidden => {
            if visible {
                (EventState::WaitingHidden, false)
            } else {
                (EventState::Cooldown { since: now }, false)
            }
        }
        EventState::Cooldown { since } => {
            if visible {
                (EventState::WaitingHidden, false)
            } else if now.saturating_duration_since(since) >= dwell {
                (EventState::WaitingVisible, true)
            } else {
                (EventState::Cooldown { since }, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    /// Feed `signals` at one-second ticks starting at t=1 and return the states and fire flags.
    fn run(
        machine: &mut EventStateMachine,
        base: Instant,
        signals: &[bool],
    ) -> Vec<(EventState, bool)> {
        signals
            .iter()
            .enumerate()
            .map(|(i, &visible)| {
                let t = machine.observe(visible, at(base, (i + 1) as f64));
                (t.to, t.fire)
            })
            .collect()
    }

    #[test]
    fn starts_waiting_for_visible() {
        let machine = EventStateMachine::default();
        assert_eq!(machine.state(), EventState::WaitingVisible);
        assert_eq!(machine.dwell(), Duration::from_secs(2));
    }

    #[test]
    fn hidden_before_first_sighting_is_ignored() {
        let base = Instant::now();
        let mut machine = EventStateMachine::default();
        let out = run(&mut machine, base, &[false, false, false, false, false]);
        assert!(out.iter().all(|(s, fire)| *s == EventState::WaitingVisible && !fire));
    }

    #[test]
    fn five_tick_window_holds_cooldown_until_dwell() {
        let base = Instant::now();
        let mut machine = EventStateMachine::default();
        let out = run(&mut machine, base, &[true, true, false, false]);
        let t3 = at(base, 3.0);
        assert_eq!(
            out,
            vec![
                (EventState::WaitingHidden, false),
                (EventState::WaitingHidden, false),
                (EventState::Cooldown { since: t3 }, false),
                (EventState::Cooldown { since: t3 }, false),
            ]
        );

        // Fifth sample just short of the dwell: still cooling down.
        let t = machine.observe(false, t3 + Duration::from_millis(1_999));
        assert_eq!(t.to, EventState::Cooldown { since: t3 });
        assert!(!t.fire);

        // Exactly at the dwell: fires (>= boundary).
        let t = machine.observe(false, t3 + Duration::from_secs(2));
        assert_eq!(t.to, EventState::WaitingVisible);
        assert!(t.fire);
    }

    #[test]
    fn fires_when_elapsed_reaches_dwell_exactly() {
        let base = Instant::now();
        let mut machine = EventStateMachine::default();
        machine.observe(true, at(base, 0.0));
        machine.observe(false, at(base, 1.0));
        let t = machine.observe(false, at(base, 2.0));
        assert!(!t.fire);
        let t = machine.observe(false, at(base, 3.0));
        assert!(t.fire);
        assert_eq!(t.to, EventState::WaitingVisible);
    }

    #[test]
    fn fires_once_per_occlusion() {
        let base = Instant::now();
        let mut machine = EventStateMachine::default();
        let out = run(
            &mut machine,
            base,
            &[true, false, false, false, false, false, false],
        );
        let fires = out.iter().filter(|(_, fire)| *fire).count();
        assert_eq!(fires, 1);
        // After firing, still-hidden samples keep it in WaitingVisible.
        assert_eq!(out.last().unwrap().0, EventState::WaitingVisible);
    }

    #[test]
    fn reappearance_resets_dwell() {
        let base = Instant::now();
        let mut machine = EventStateMachine::default();
        machine.observe(true, at(base, 0.0));
        machine.observe(false, at(base, 1.0));
        machine.observe(false, at(base, 2.5));
        let t = machine.observe(true, at(base, 2.9));
        assert_eq!(t.to, EventState::WaitingHidden);
        assert_eq!(t.to.hidden_since(), None);

        let t = machine.observe(false, at(base, 3.0));
        assert_eq!(t.to.hidden_since(), Some(at(base, 3.0)));
        // 1.9s since the new occlusion: the earlier 1.5s does not count.
        let t = machine.observe(false, at(base, 4.9));
        assert!(!t.fire);
        let t = machine.observe(false, at(base, 5.0));
        assert!(t.fire);
    }

    #[test]
    fn short_occlusions_never_fire() {
        let base = Instant::now();
        let mut machine = EventStateMachine::default();
        let signals = [true, false, true, false, true, false, true, false, true];
        let out = run(&mut machine, base, &signals);
        assert!(out.iter().all(|(_, fire)| !fire));
    }

    #[test]
    fn new_cycle_requires_visible_again() {
        let base = Instant::now();
        let mut machine = EventStateMachine::new(Duration::from_secs(1));
        let out = run(&mut machine, base, &[true, false, false, true, false, false]);
        let fires: Vec<bool> = out.iter().map(|(_, fire)| *fire).collect();
        assert_eq!(fires, vec![false, false, true, false, false, true]);
    }
}
