//! Display activation window.
//!
//! A button press ("callup") keeps the status screen lit for a fixed
//! timeout. The press arrives from interrupt context, so the only thing
//! shared with it is [`CallupSignal`]: one atomically written timestamp. All
//! interpretation happens in [`CallupTimer::poll`], on the main loop.

use embassy_time::{Duration, Instant};
use portable_atomic::{AtomicU64, Ordering};

/// Written by the button handler, read by the main loop.
pub struct CallupSignal {
    last_trigger: AtomicU64,
}

impl CallupSignal {
    const NEVER: u64 = u64::MAX;

    pub const fn new() -> Self {
        Self {
            last_trigger: AtomicU64::new(Self::NEVER),
        }
    }

    /// Records a callup. This is all the handler may do.
    pub fn trigger(&self, now: Instant) {
        self.last_trigger.store(now.as_ticks(), Ordering::Release);
    }

    /// Instant of the latest callup, if any happened yet.
    pub fn last_trigger(&self) -> Option<Instant> {
        match self.last_trigger.load(Ordering::Acquire) {
            Self::NEVER => None,
            ticks => Some(Instant::from_ticks(ticks)),
        }
    }
}

impl Default for CallupSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    On,
    Off,
}

/// What the display should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallupTransition {
    /// Window open: redraw the status view.
    Active,
    /// Window closed on this very tick: blank the screen once.
    Expired,
    /// Window closed earlier, leave the screen alone.
    Idle,
}

pub struct CallupTimer<'a> {
    signal: &'a CallupSignal,
    timeout: Duration,
    state: DisplayState,
    last_activation: Instant,
}

impl<'a> CallupTimer<'a> {
    /// Starts in the `On` state so the status is visible right after boot.
    pub fn new(signal: &'a CallupSignal, timeout: Duration, boot: Instant) -> Self {
        Self {
            signal,
            timeout,
            state: DisplayState::On,
            last_activation: boot,
        }
    }

    pub fn poll(&mut self, now: Instant) -> CallupTransition {
        if let Some(triggered) = self.signal.last_trigger() {
            if triggered > self.last_activation {
                self.last_activation = triggered;
                self.state = DisplayState::On;
            }
        }

        let elapsed = now.saturating_duration_since(self.last_activation);
        match self.state {
            DisplayState::On if elapsed >= self.timeout => {
                self.state = DisplayState::Off;
                CallupTransition::Expired
            }
            DisplayState::On => CallupTransition::Active,
            DisplayState::Off => CallupTransition::Idle,
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state == DisplayState::On
    }

    pub fn last_activation(&self) -> Instant {
        self.last_activation
    }
}
