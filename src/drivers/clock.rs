use log::warn;

use crate::drivers::packet::SAMPLES_PER_PACKET;

/// Nominal EEG sample rate of the headband.
pub const NOMINAL_SAMPLE_RATE_HZ: f64 = 256.0;
/// Initial adaptation gain of the rate estimator.
pub const INITIAL_GAIN: f64 = 1e-4;
/// Relative deviation from the nominal interval above which the estimate is reported.
const DIVERGENCE_WARN_RATIO: f64 = 0.05;

/// Linear mapping from device sample index to wall-clock seconds.
///
/// The rate term is refined with a one-parameter recursive least-squares
/// update each time a cycle completes. The model lives for a whole session and
/// is only rebuilt by [`SampleClock::reset`].
#[derive(Clone, Debug)]
pub struct SampleClock {
    origin_time: f64,
    rate: f64,
    gain: f64,
    nominal_rate_hz: f64,
    updates: u64,
    diverged: bool,
}

impl SampleClock {
    pub fn new(origin_time: f64) -> Self {
        Self::with_nominal_rate(origin_time, NOMINAL_SAMPLE_RATE_HZ)
    }

    pub fn with_nominal_rate(origin_time: f64, nominal_rate_hz: f64) -> Self {
        Self {
            origin_time,
            rate: 1.0 / nominal_rate_hz,
            gain: INITIAL_GAIN,
            nominal_rate_hz,
            updates: 0,
            diverged: false,
        }
    }

    pub fn reset(&mut self, origin_time: f64) {
        *self = Self::with_nominal_rate(origin_time, self.nominal_rate_hz);
    }

    pub fn origin_time(&self) -> f64 {
        self.origin_time
    }

    /// Estimated seconds per sample.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn estimated_rate_hz(&self) -> f64 {
        1.0 / self.rate
    }

    pub fn estimate(&self, index: u64) -> f64 {
        self.origin_time + self.rate * index as f64
    }

    /// Timestamps for the samples of one packet starting at `first_index`.
    pub fn packet_timestamps(&self, first_index: u64) -> [f64; SAMPLES_PER_PACKET] {
        let mut out = [0.0; SAMPLES_PER_PACKET];
        for (offset, t) in out.iter_mut().enumerate() {
            *t = self.estimate(first_index + offset as u64);
        }
        out
    }

    /// Feed one `(sample index, observed wall-clock)` pair.
    ///
    /// `P' = P - P²x²/(1 - Px²)`, `R' = R + P'x(y - xR)` with `x` the sample
    /// index and `y` the observation relative to the session origin.
    pub fn update(&mut self, index: u64, observed_time: f64) {
        let x = index as f64;
        let y = observed_time - self.origin_time;
        let p = self.gain;
        let px2 = p * x * x;
        let denom = 1.0 - px2;
        if denom == 0.0 {
            return;
        }
        let p_next = p - (p * p * x * x) / denom;
        let r_next = self.rate + p_next * x * (y - x * self.rate);
        if !p_next.is_finite() || !r_next.is_finite() {
            warn!("sample clock update produced a non-finite estimate at index {index}; keeping previous model");
            return;
        }
        self.gain = p_next;
        self.rate = r_next;
        self.updates += 1;
        self.check_divergence();
    }

    fn check_divergence(&mut self) {
        let nominal = 1.0 / self.nominal_rate_hz;
        let off = ((self.rate - nominal) / nominal).abs() > DIVERGENCE_WARN_RATIO;
        if off && !self.diverged && self.updates > 10 {
            warn!(
                "sample clock rate {:.3} Hz is far from nominal {:.1} Hz; check packet ordering",
                self.estimated_rate_hz(),
                self.nominal_rate_hz
            );
        }
        self.diverged = off;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn starts_at_nominal_rate() {
        let clock = SampleClock::new(100.0);
        assert_eq!(clock.rate(), 1.0 / 256.0);
        assert_eq!(clock.gain(), INITIAL_GAIN);
        assert_eq!(clock.estimate(0), 100.0);
        assert!((clock.estimate(256) - 101.0).abs() < 1e-12);
    }

    #[test]
    fn converges_under_bounded_jitter() {
        let origin = 1_700_000_000.0;
        let mut clock = SampleClock::new(origin);
        let mut rng = StdRng::seed_from_u64(7);
        let true_rate = 1.0 / 256.0;
        for cycle in 0..500u64 {
            let last = cycle * 12 + 11;
            let jitter: f64 = rng.gen_range(-0.005..0.005);
            clock.update(last, origin + last as f64 * true_rate + jitter);
        }
        assert!((clock.rate() - true_rate).abs() / true_rate < 1e-3);
    }

    #[test]
    fn tracks_a_drifting_device_clock() {
        let origin = 50.0;
        let mut clock = SampleClock::new(origin);
        let true_rate = 1.0 / 256.0 * 1.004;
        for cycle in 0..800u64 {
            let last = cycle * 12 + 11;
            clock.update(last, origin + last as f64 * true_rate);
        }
        assert!((clock.rate() - true_rate).abs() / true_rate < 1e-3);
        assert!(clock.gain() > 0.0 && clock.gain() < INITIAL_GAIN);
    }

    #[test]
    fn reset_restores_initial_model() {
        let mut clock = SampleClock::new(0.0);
        clock.update(11, 0.05);
        clock.reset(10.0);
        assert_eq!(clock.origin_time(), 10.0);
        assert_eq!(clock.rate(), 1.0 / 256.0);
        assert_eq!(clock.updates(), 0);
    }

    #[test]
    fn packet_timestamps_are_evenly_spaced() {
        let clock = SampleClock::new(0.0);
        let ts = clock.packet_timestamps(24);
        assert!((ts[0] - 24.0 / 256.0).abs() < 1e-12);
        assert!((ts[11] - ts[10] - 1.0 / 256.0).abs() < 1e-12);
    }
}
