use crate::error::{ImpactError, Result};
use crate::intensity::filter::{ChannelFilter, envelope_alpha};
use crate::streams::{Calibration, ThresholdTable};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub peak: f64,
    pub level: i32,
}

/// Turn one block of raw counts into an intensity level.
///
/// The channel filter is only updated when the whole block succeeds, so a
/// rejected block leaves the channel exactly as it was.
pub fn estimate(
    source_key: &str,
    samples: &[i32],
    sample_rate: f64,
    calibration: &Calibration,
    thresholds: &ThresholdTable,
    sensitivity: usize,
    filter: &mut ChannelFilter,
) -> Result<Estimate> {
    if samples.is_empty() {
        return Err(ImpactError::Sample {
            source_key: source_key.to_string(),
            message: "block has no samples".to_string(),
        });
    }

    let alpha = match calibration.smoothing {
        Some(tau) => {
            if !sample_rate.is_finite() || sample_rate <= 0.0 {
                return Err(ImpactError::Calibration {
                    source_key: source_key.to_string(),
                    message: format!("smoothing needs a sample rate, block has {}", sample_rate),
                });
            }
            Some(envelope_alpha(tau, sample_rate))
        }
        None => None,
    };

    let mut next = filter.clone();
    let peak = next.block_peak(samples, calibration.offset, calibration.sensitivity, alpha);
    if !peak.is_finite() {
        return Err(ImpactError::Calibration {
            source_key: source_key.to_string(),
            message: format!("peak amplitude is not finite ({})", peak),
        });
    }

    *filter = next;
    Ok(Estimate {
        peak,
        level: thresholds.lookup(peak, sensitivity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::ThresholdRow;

    fn calibration() -> Calibration {
        Calibration {
            sensitivity: 1.0,
            offset: Some(0.0),
            smoothing: None,
            units: "counts".to_string(),
        }
    }

    fn thresholds() -> ThresholdTable {
        ThresholdTable::new(vec![
            ThresholdRow { amplitude: 0.0, level: 0 },
            ThresholdRow { amplitude: 100.0, level: 1 },
            ThresholdRow { amplitude: 500.0, level: 2 },
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_block_is_sample_error() {
        let mut filter = ChannelFilter::new();
        let err = estimate("NZ_WEL_10_HHZ", &[], 100.0, &calibration(), &thresholds(), 0, &mut filter)
            .unwrap_err();
        assert!(matches!(err, ImpactError::Sample { .. }));
        assert!(!filter.is_initialized());
    }

    #[test]
    fn test_peak_maps_to_level() {
        let mut filter = ChannelFilter::new();
        let e = estimate("K", &[10, -600, 20], 100.0, &calibration(), &thresholds(), 0, &mut filter)
            .unwrap();
        assert_eq!(e.peak, 600.0);
        assert_eq!(e.level, 2);
    }

    #[test]
    fn test_smoothing_without_rate_leaves_state() {
        let mut cal = calibration();
        cal.offset = None;
        cal.smoothing = Some(1.0);
        let mut filter = ChannelFilter::new();
        let err = estimate("K", &[1, 2, 3], 0.0, &cal, &thresholds(), 0, &mut filter).unwrap_err();
        assert!(matches!(err, ImpactError::Calibration { .. }));
        assert_eq!(filter, ChannelFilter::new());
    }

    #[test]
    fn test_estimate_monotonic_in_amplitude() {
        let mut prev = i32::MIN;
        for amp in (0..1000).step_by(7) {
            let mut filter = ChannelFilter::new();
            let e = estimate("K", &[0, amp, 0], 100.0, &calibration(), &thresholds(), 0, &mut filter)
                .unwrap();
            assert!(e.level >= prev);
            prev = e.level;
        }
    }
}
