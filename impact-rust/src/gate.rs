use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::state::{Phase, StreamState};

/// Flap detection and recovery knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlapPolicy {
    /// Changes allowed inside `window` before the channel is called noisy.
    pub tolerance: usize,
    pub window: Duration,
    /// Fixed time a noisy channel stays suppressed.
    pub cooldown: Duration,
    /// Optional early release. Measured from the last level change seen while
    /// noisy, not from the last estimate: a noisy sensor keeps producing
    /// estimates, so only a settled level counts as quiet.
    pub quiet: Option<Duration>,
}

impl Default for FlapPolicy {
    fn default() -> Self {
        Self {
            tolerance: 5,
            window: Duration::seconds(60),
            cooldown: Duration::seconds(600),
            quiet: None,
        }
    }
}

/// Rolling record of level changes for one channel.
#[derive(Debug, Clone, Default)]
pub struct FlapWindow {
    changes: VecDeque<DateTime<Utc>>,
    noisy_since: Option<DateTime<Utc>>,
    last_level: Option<i32>,
    last_change_at: Option<DateTime<Utc>>,
}

impl FlapWindow {
    fn record_change(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.changes.push_back(now);
        while let Some(&oldest) = self.changes.front() {
            if now - oldest > window {
                self.changes.pop_front();
            } else {
                break;
            }
        }
        self.changes.len()
    }

    fn enter_noisy(&mut self, level: i32, now: DateTime<Utc>) {
        self.noisy_since = Some(now);
        self.last_level = Some(level);
        self.last_change_at = Some(now);
    }

    fn observe(&mut self, level: i32, now: DateTime<Utc>) {
        if self.last_level != Some(level) {
            self.last_level = Some(level);
            self.last_change_at = Some(now);
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn recent_changes(&self) -> usize {
        self.changes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Probation,
    Unchanged,
    /// This change tipped the channel into the noisy state.
    Flapping,
    Noisy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Emit(i32),
    Suppress(SuppressReason),
}

impl Decision {
    pub fn is_emit(&self) -> bool {
        matches!(self, Decision::Emit(_))
    }
}

/// Debounce, probation and noise suppression for one estimate at a time.
#[derive(Debug, Clone, Default)]
pub struct FlushGate {
    policy: FlapPolicy,
}

impl FlushGate {
    pub fn new(policy: FlapPolicy) -> Self {
        Self { policy }
    }

    fn recovered(&self, flap: &FlapWindow, now: DateTime<Utc>) -> bool {
        let cooled = flap
            .noisy_since
            .is_none_or(|since| now - since >= self.policy.cooldown);
        let quiet = match (self.policy.quiet, flap.last_change_at) {
            (Some(quiet), Some(at)) => now - at >= quiet,
            _ => false,
        };
        cooled || quiet
    }

    /// Decide whether `level` should be emitted, updating the channel state.
    pub fn evaluate(&self, state: &mut StreamState, level: i32, now: DateTime<Utc>) -> Decision {
        if now < state.probation_deadline() {
            return Decision::Suppress(SuppressReason::Probation);
        }

        if state.phase == Phase::Initializing {
            info!("{}: probation over, armed", state.source_key());
            state.phase = Phase::Armed;
        }

        if state.phase == Phase::Noisy {
            if self.recovered(&state.flap, now) {
                info!("{}: noise cooldown over, re-armed", state.source_key());
                state.flap.clear();
                state.phase = Phase::Armed;
            } else {
                state.flap.observe(level, now);
                return Decision::Suppress(SuppressReason::Noisy);
            }
        }

        match state.last_emitted {
            None => {
                state.last_emitted = Some(level);
                Decision::Emit(level)
            }
            Some(previous) if previous == level => Decision::Suppress(SuppressReason::Unchanged),
            Some(previous) => {
                let changes = state.flap.record_change(now, self.policy.window);
                if changes > self.policy.tolerance {
                    warn!(
                        "{}: {} level changes within {}s, suppressing as noisy ({} -> {})",
                        state.source_key(),
                        changes,
                        self.policy.window.num_seconds(),
                        previous,
                        level
                    );
                    state.flap.enter_noisy(level, now);
                    state.phase = Phase::Noisy;
                    return Decision::Suppress(SuppressReason::Flapping);
                }
                state.last_emitted = Some(level);
                Decision::Emit(level)
            }
        }
    }
}
