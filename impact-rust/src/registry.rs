use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{ImpactError, Result};
use crate::gate::{Decision, FlushGate};
use crate::message::{Message, SampleBlock};
use crate::state::StreamState;
use crate::streams::StreamConfig;

/// Values used for channels that do not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDefaults {
    pub probation: Duration,
    pub level: i32,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            probation: Duration::minutes(10),
            level: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub processed: u64,
    pub emitted: u64,
    pub suppressed: u64,
    pub skipped: u64,
}

/// All channel states for one dispatcher, keyed by source key.
pub struct StreamRegistry {
    states: HashMap<String, StreamState>,
    missing: HashSet<String>,
    gate: FlushGate,
    clock: Arc<dyn Clock>,
    stats: RegistryStats,
}

impl StreamRegistry {
    /// Initialise every configured channel. Any invalid channel aborts the
    /// whole registry so no channel runs unvalidated.
    pub fn init(
        streams: HashMap<String, StreamConfig>,
        defaults: ChannelDefaults,
        gate: FlushGate,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut states = HashMap::with_capacity(streams.len());
        for (key, config) in streams {
            let probation = config.probation.unwrap_or(defaults.probation);
            let level = config.level.unwrap_or(defaults.level);
            let state = StreamState::init(config, probation, level, clock.as_ref())?;
            states.insert(key, state);
        }

        Ok(Self {
            states,
            missing: HashSet::new(),
            gate,
            clock,
            stats: RegistryStats::default(),
        })
    }

    /// Run one block through its channel.
    ///
    /// An unknown source key is reported as `UnknownStream` the first time
    /// only; later blocks for the same key are skipped silently.
    pub fn process(&mut self, block: &SampleBlock) -> Result<Option<Message>> {
        if self.missing.contains(&block.source_key) {
            self.stats.skipped += 1;
            return Ok(None);
        }

        let Some(state) = self.states.get_mut(&block.source_key) else {
            self.missing.insert(block.source_key.clone());
            self.stats.skipped += 1;
            return Err(ImpactError::UnknownStream(block.source_key.clone()));
        };

        let estimate = match state.estimate(block) {
            Ok(e) => e,
            Err(e) => {
                self.stats.skipped += 1;
                return Err(e);
            }
        };
        self.stats.processed += 1;

        let decision = self.gate.evaluate(state, estimate.level, self.clock.now());
        debug!(
            "{}: peak {:.4} -> level {} ({:?})",
            block.source_key, estimate.peak, estimate.level, decision
        );

        match decision {
            Decision::Emit(level) => {
                self.stats.emitted += 1;
                let source = state
                    .config()
                    .label
                    .clone()
                    .unwrap_or_else(|| block.channel_label.clone());
                Ok(Some(Message {
                    source,
                    src_name: block.source_key.clone(),
                    time: block.start_time,
                    level,
                }))
            }
            Decision::Suppress(_) => {
                self.stats.suppressed += 1;
                Ok(None)
            }
        }
    }

    pub fn get(&self, source_key: &str) -> Option<&StreamState> {
        self.states.get(source_key)
    }

    pub fn is_missing(&self, source_key: &str) -> bool {
        self.missing.contains(source_key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
