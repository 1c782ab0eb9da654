/// Weight given to each new sample by the running-mean bias tracker.
pub const BIAS_ALPHA: f64 = 0.001;

/// Per-channel conditioning state carried across blocks.
///
/// Tracks a running mean for bias removal (when no fixed offset is
/// configured) and a one-pole envelope follower for smoothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelFilter {
    running_mean: f64,
    envelope: f64,
    initialized: bool,
}

impl ChannelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Seed the running mean from the first block to avoid a large step.
    fn seed(&mut self, samples: &[i32]) {
        if !self.initialized && !samples.is_empty() {
            let sum: f64 = samples.iter().map(|&s| s as f64).sum();
            self.running_mean = sum / samples.len() as f64;
            self.initialized = true;
        }
    }

    /// Remove bias and scale one raw count into physical units.
    fn condition(&mut self, count: i32, offset: Option<f64>, sensitivity: f64) -> f64 {
        let x = count as f64;
        let bias = match offset {
            Some(o) => o,
            None => {
                self.running_mean += (x - self.running_mean) * BIAS_ALPHA;
                self.running_mean
            }
        };
        (x - bias) / sensitivity
    }

    /// Peak absolute physical amplitude of a block.
    ///
    /// `envelope_alpha` enables the envelope follower; the peak is then the
    /// maximum of the envelope rather than of the raw amplitude.
    pub fn block_peak(
        &mut self,
        samples: &[i32],
        offset: Option<f64>,
        sensitivity: f64,
        envelope_alpha: Option<f64>,
    ) -> f64 {
        self.seed(samples);

        let mut peak = 0.0_f64;
        for &count in samples {
            let amplitude = self.condition(count, offset, sensitivity).abs();
            let value = match envelope_alpha {
                Some(alpha) => {
                    self.envelope += (amplitude - self.envelope) * alpha;
                    self.envelope
                }
                None => amplitude,
            };
            if value > peak {
                peak = value;
            }
        }
        peak
    }
}

/// Envelope coefficient for a time constant (seconds) at a sample rate.
pub fn envelope_alpha(time_constant: f64, sample_rate: f64) -> f64 {
    1.0 - (-1.0 / (time_constant * sample_rate)).exp()
}
