//! Local derivation of the student's attention state.
//!
//! Nothing here does I/O. Time is passed in explicitly so the detector can be
//! driven by a real ticker or by tests.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::models::AttentionState;

/// Raw signals from the student's environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    /// Pointer, keyboard or scroll activity.
    Input,
    Focus,
    Blur,
    Hidden,
    Visible,
}

impl ActivitySignal {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "input" | "key" | "mouse" | "scroll" => Some(ActivitySignal::Input),
            "focus" => Some(ActivitySignal::Focus),
            "blur" => Some(ActivitySignal::Blur),
            "hide" | "hidden" => Some(ActivitySignal::Hidden),
            "show" | "visible" => Some(ActivitySignal::Visible),
            _ => None,
        }
    }
}

/// Hidden or unfocused beats idle, which beats active.
pub fn derive_state(
    hidden: bool,
    focused: bool,
    since_input: Duration,
    idle_threshold: Duration,
) -> AttentionState {
    if hidden || !focused {
        AttentionState::Distracted
    } else if since_input > idle_threshold {
        AttentionState::Idle
    } else {
        AttentionState::Active
    }
}

pub struct ActivityDetector {
    idle_threshold: Duration,
    last_activity_at: Instant,
    hidden: bool,
    focused: bool,
    state: watch::Sender<AttentionState>,
}

impl ActivityDetector {
    /// Starts visible, focused and ACTIVE, as if input just happened.
    pub fn new(idle_threshold: Duration, now: Instant) -> Self {
        let (state, _) = watch::channel(AttentionState::Active);
        Self {
            idle_threshold,
            last_activity_at: now,
            hidden: false,
            focused: true,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AttentionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> AttentionState {
        *self.state.borrow()
    }

    pub fn apply(&mut self, signal: ActivitySignal, now: Instant) -> AttentionState {
        match signal {
            ActivitySignal::Input => {
                self.last_activity_at = now;
                // Recover from idle without waiting for the next tick.
                if self.current() == AttentionState::Idle {
                    return self.evaluate(now);
                }
                self.current()
            }
            ActivitySignal::Focus => {
                self.focused = true;
                self.evaluate(now)
            }
            ActivitySignal::Blur => {
                self.focused = false;
                self.evaluate(now)
            }
            ActivitySignal::Hidden => {
                self.hidden = true;
                self.evaluate(now)
            }
            ActivitySignal::Visible => {
                self.hidden = false;
                self.evaluate(now)
            }
        }
    }

    pub fn tick(&mut self, now: Instant) -> AttentionState {
        self.evaluate(now)
    }

    fn evaluate(&mut self, now: Instant) -> AttentionState {
        let next = derive_state(
            self.hidden,
            self.focused,
            now.saturating_duration_since(self.last_activity_at),
            self.idle_threshold,
        );
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        next
    }
}
