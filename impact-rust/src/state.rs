use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{ImpactError, Result};
use crate::gate::FlapWindow;
use crate::intensity::{Estimate, estimate, filter::ChannelFilter};
use crate::message::SampleBlock;
use crate::streams::StreamConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Still inside the probation window; nothing is emitted.
    Initializing,
    Armed,
    /// Flapping; changes are suppressed until the cooldown passes.
    Noisy,
}

/// Mutable per-channel state, owned by exactly one registry entry.
#[derive(Debug, Clone)]
pub struct StreamState {
    config: StreamConfig,
    sensitivity: usize,
    probation_deadline: DateTime<Utc>,
    pub(crate) last_emitted: Option<i32>,
    pub(crate) phase: Phase,
    pub(crate) flap: FlapWindow,
    filter: ChannelFilter,
}

impl StreamState {
    /// Build a fresh state for one channel. Calling this again for the same
    /// channel discards everything the previous state had accumulated.
    pub fn init(
        config: StreamConfig,
        probation: Duration,
        sensitivity: i32,
        clock: &dyn Clock,
    ) -> Result<Self> {
        let rows = config.thresholds.len();
        if sensitivity < 0 || sensitivity as usize >= rows {
            return Err(ImpactError::InvalidLevel {
                source_key: config.source_key.clone(),
                level: sensitivity,
                rows,
            });
        }

        let now = clock.now();
        let probation_deadline = now.checked_add_signed(probation).ok_or_else(|| {
            ImpactError::Config(format!(
                "{}: probation of {}s is out of range",
                config.source_key,
                probation.num_seconds()
            ))
        })?;
        debug!(
            "Init {}: probation until {}, sensitivity {}",
            config.source_key, probation_deadline, sensitivity
        );

        Ok(Self {
            config,
            sensitivity: sensitivity as usize,
            probation_deadline,
            last_emitted: None,
            phase: Phase::Initializing,
            flap: FlapWindow::default(),
            filter: ChannelFilter::new(),
        })
    }

    /// Estimate the intensity of a block using this channel's calibration and
    /// smoothing state.
    pub fn estimate(&mut self, block: &SampleBlock) -> Result<Estimate> {
        estimate(
            &self.config.source_key,
            &block.samples,
            block.sample_rate,
            &self.config.calibration,
            &self.config.thresholds,
            self.sensitivity,
            &mut self.filter,
        )
    }

    pub fn source_key(&self) -> &str {
        &self.config.source_key
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn sensitivity(&self) -> usize {
        self.sensitivity
    }

    pub fn probation_deadline(&self) -> DateTime<Utc> {
        self.probation_deadline
    }

    pub fn last_emitted(&self) -> Option<i32> {
        self.last_emitted
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::streams::{Calibration, ThresholdRow, ThresholdTable};
    use chrono::TimeZone;

    fn config() -> StreamConfig {
        StreamConfig {
            source_key: "NZ_WEL_10_HHZ".to_string(),
            label: None,
            calibration: Calibration {
                sensitivity: 1.0,
                offset: Some(0.0),
                smoothing: None,
                units: "counts".to_string(),
            },
            thresholds: ThresholdTable::new(vec![
                ThresholdRow { amplitude: 0.0, level: 0 },
                ThresholdRow { amplitude: 100.0, level: 1 },
                ThresholdRow { amplitude: 500.0, level: 2 },
            ])
            .unwrap(),
            probation: None,
            level: None,
        }
    }

    #[test]
    fn test_init_sets_deadline_and_unset_level() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let state = StreamState::init(config(), Duration::minutes(10), 2, &clock).unwrap();
        assert_eq!(state.probation_deadline(), start + Duration::minutes(10));
        assert_eq!(state.last_emitted(), None);
        assert_eq!(state.phase(), Phase::Initializing);
        assert_eq!(state.sensitivity(), 2);
    }

    #[test]
    fn test_init_rejects_out_of_range_level() {
        let clock = ManualClock::new(Utc::now());
        for level in [-1, 3, 10] {
            let err = StreamState::init(config(), Duration::zero(), level, &clock).unwrap_err();
            assert!(matches!(err, ImpactError::InvalidLevel { rows: 3, .. }));
        }
    }

    #[test]
    fn test_init_rejects_unreachable_deadline() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let probation = Duration::seconds(10_000_000_000_000);
        let err = StreamState::init(config(), probation, 0, &clock).unwrap_err();
        assert!(matches!(err, ImpactError::Config(_)));
    }

    #[test]
    fn test_failed_block_leaves_filter_untouched() {
        let clock = ManualClock::new(Utc::now());
        let mut state = StreamState::init(config(), Duration::zero(), 0, &clock).unwrap();
        let block = SampleBlock {
            source_key: "NZ_WEL_10_HHZ".to_string(),
            channel_label: "NZ.WEL".to_string(),
            start_time: clock.now(),
            sample_rate: 100.0,
            samples: Vec::new(),
        };
        assert!(state.estimate(&block).is_err());
        assert_eq!(state.filter(), &ChannelFilter::new());
    }
}
