//! Pure countdown state machine. No clocks, no I/O: the controller feeds it
//! one logical tick at a time and acts on the returned transition, which keeps
//! the cycle bookkeeping testable tick-by-tick.

use serde::Serialize;

use crate::models::{CycleCount, Session, SessionMode};
use crate::throttle::ThrottleFilter;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Off,
    Focus,
    Break,
}

/// What the controller must do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Off; nothing is running.
    Idle,
    /// Countdown decremented, no boundary crossed.
    Counting,
    /// Focus expired, break begins.
    BreakStarted { break_secs: u64 },
    /// Break expired, next focus cycle begins. `cycles_left` is `None` for an
    /// unbounded session.
    CycleStarted { cycle: u32, cycles_left: Option<u32> },
    /// The session is over and must be finalized.
    Completed,
}

/// Read-only view of the engine for callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub phase: Phase,
    pub session_id: Option<String>,
    pub remaining_secs: u64,
    pub current_cycle: u32,
    pub detection_available: bool,
}

pub(crate) struct EngineState {
    pub phase: Phase,
    pub session: Option<Session>,
    pub remaining_secs: u64,
    pub current_cycle: u32,
    pub detection_available: bool,
    pub throttle: ThrottleFilter,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Off,
            session: None,
            remaining_secs: 0,
            current_cycle: 0,
            detection_available: false,
            throttle: ThrottleFilter::new(),
        }
    }

    pub fn begin(&mut self, session: Session) {
        self.remaining_secs = session.focus_duration;
        self.phase = Phase::Focus;
        self.current_cycle = 1;
        self.session = Some(session);
        self.throttle.reset();
    }

    /// Clear every piece of per-session state. Re-enterable: `begin` after
    /// `reset` starts from scratch.
    pub fn reset(&mut self) {
        self.phase = Phase::Off;
        self.session = None;
        self.remaining_secs = 0;
        self.current_cycle = 0;
        self.detection_available = false;
        self.throttle.reset();
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            phase: self.phase,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            remaining_secs: self.remaining_secs,
            current_cycle: self.current_cycle,
            detection_available: self.detection_available,
        }
    }

    /// No more cycles after the current one?
    fn cycles_exhausted(&self) -> bool {
        let Some(session) = &self.session else {
            return true;
        };
        match session.pomodoro_cycles {
            Some(CycleCount::Finite(n)) => self.current_cycle >= n,
            Some(CycleCount::Infinite) => false,
            // Single sessions have no cycle budget at all.
            None => true,
        }
    }

    /// Apply exactly one logical tick (one second of countdown).
    pub fn on_tick(&mut self) -> Transition {
        match self.phase {
            Phase::Off => Transition::Idle,
            Phase::Focus => {
                if self.remaining_secs > 0 {
                    self.remaining_secs -= 1;
                    if self.remaining_secs > 0 {
                        return Transition::Counting;
                    }
                }
                self.on_focus_expired()
            }
            Phase::Break => {
                if self.remaining_secs > 0 {
                    self.remaining_secs -= 1;
                    if self.remaining_secs > 0 {
                        return Transition::Counting;
                    }
                }
                self.on_break_expired()
            }
        }
    }

    fn on_focus_expired(&mut self) -> Transition {
        let Some(session) = &self.session else {
            return Transition::Idle;
        };

        match session.mode {
            SessionMode::SingleSession => Transition::Completed,
            SessionMode::Pomodoro => {
                if self.cycles_exhausted() {
                    return Transition::Completed;
                }
                let break_secs = session.break_duration;
                self.phase = Phase::Break;
                self.remaining_secs = break_secs;
                Transition::BreakStarted { break_secs }
            }
        }
    }

    fn on_break_expired(&mut self) -> Transition {
        if self.cycles_exhausted() {
            return Transition::Completed;
        }
        let Some(session) = &self.session else {
            return Transition::Idle;
        };

        self.current_cycle += 1;
        self.phase = Phase::Focus;
        self.remaining_secs = session.focus_duration;

        let cycles_left = match session.pomodoro_cycles {
            Some(CycleCount::Finite(n)) => Some(n.saturating_sub(self.current_cycle)),
            _ => None,
        };
        Transition::CycleStarted {
            cycle: self.current_cycle,
            cycles_left,
        }
    }
}
