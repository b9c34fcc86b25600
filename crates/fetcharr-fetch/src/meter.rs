//! Exponentially weighted download rate meter.

use std::time::Duration;

/// EWMA rate meter sampled on a fixed tick.
///
/// With a 500 ms tick and a 3 s window the smoothing factor is
/// `α = 1 − e^(−0.5/3)`, so roughly the last three seconds dominate the
/// published rate.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    alpha: f64,
    rate: Option<f64>,
}

impl SpeedMeter {
    /// Meter tuned for `tick`-spaced samples over a `window`-wide average.
    #[must_use]
    pub fn new(tick: Duration, window: Duration) -> Self {
        let ratio = tick.as_secs_f64() / window.as_secs_f64().max(f64::EPSILON);
        Self {
            alpha: 1.0 - (-ratio).exp(),
            rate: None,
        }
    }

    /// Fold in the bytes observed since the previous sample.
    pub fn update(&mut self, bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let sample = to_f64(bytes) / secs;
        self.rate = Some(match self.rate {
            None => sample,
            Some(rate) => self.alpha.mul_add(sample - rate, rate),
        });
    }

    /// Current smoothed rate in bytes per second.
    #[must_use]
    pub fn bps(&self) -> u64 {
        match self.rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => rate as u64,
            _ => 0,
        }
    }
}

const fn to_f64(value: u64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "byte counts fit comfortably in f64 for rate math"
    )]
    {
        value as f64
    }
}
