use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};

use crate::config::{BandSpec, PsdMethod};

/// One-sided power spectrum of a single signal.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub method: PsdMethod,
    pub frequencies_hz: Vec<f64>,
    pub power: Vec<f64>,
}

impl PowerSpectrum {
    /// Power inside `band` (inclusive edges).
    ///
    /// Periodogram bins are summed; Welch densities are integrated with the
    /// trapezoidal rule over the bins that fall inside the band.
    pub fn band_power(&self, band: &BandSpec) -> f64 {
        let inside = self
            .frequencies_hz
            .iter()
            .zip(&self.power)
            .filter(|(f, _)| band.contains(**f));
        match self.method {
            PsdMethod::Periodogram => inside.map(|(_, p)| *p).sum(),
            PsdMethod::Welch { .. } => {
                let points: Vec<(f64, f64)> = inside.map(|(f, p)| (*f, *p)).collect();
                points
                    .windows(2)
                    .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) * 0.5)
                    .sum()
            }
        }
    }

    pub fn peak_frequency(&self) -> Option<f64> {
        self.frequencies_hz
            .iter()
            .zip(&self.power)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(f, _)| *f)
    }
}

/// Helper that computes power spectra for a fixed estimation method.
pub struct SpectrumBuilder {
    method: PsdMethod,
    sample_rate_hz: f64,
    planner: FftPlanner<f64>,
}

impl std::fmt::Debug for SpectrumBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumBuilder")
            .field("method", &self.method)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .finish()
    }
}

impl SpectrumBuilder {
    pub fn new(method: PsdMethod, sample_rate_hz: f64) -> Self {
        Self {
            method,
            sample_rate_hz,
            planner: FftPlanner::new(),
        }
    }

    /// Mean-removed spectrum of `samples`. Returns an empty spectrum for empty input.
    pub fn compute(&mut self, samples: &[f64]) -> PowerSpectrum {
        let centred = remove_mean(samples);
        let (frequencies_hz, power) = match self.method {
            PsdMethod::Periodogram => self.periodogram(&centred),
            PsdMethod::Welch { segment, overlap } => self.welch(&centred, segment, overlap),
        };
        PowerSpectrum {
            method: self.method,
            frequencies_hz,
            power,
        }
    }

    fn periodogram(&mut self, samples: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = samples.len();
        if n == 0 {
            return (Vec::new(), Vec::new());
        }
        let mut buffer: Vec<Complex64> = samples.iter().map(|v| Complex64::new(*v, 0.0)).collect();
        self.planner.plan_fft_forward(n).process(&mut buffer);
        let bins = n / 2 + 1;
        let power = buffer.iter().take(bins).map(|c| c.norm_sqr()).collect();
        (self.frequencies(n), power)
    }

    fn welch(&mut self, samples: &[f64], segment: usize, overlap: usize) -> (Vec<f64>, Vec<f64>) {
        let n = samples.len();
        let segment = segment.min(n);
        if segment == 0 {
            return (Vec::new(), Vec::new());
        }
        let step = segment.saturating_sub(overlap).max(1);
        let window = hann(segment);
        let window_power: f64 = window.iter().map(|w| w * w).sum();
        let scale = 1.0 / (self.sample_rate_hz * window_power);
        let fft = self.planner.plan_fft_forward(segment);
        let bins = segment / 2 + 1;
        let mut acc = vec![0.0; bins];
        let mut segments = 0usize;
        let mut start = 0;
        while start + segment <= n {
            let chunk = remove_mean(&samples[start..start + segment]);
            let mut buffer: Vec<Complex64> = chunk
                .iter()
                .zip(&window)
                .map(|(v, w)| Complex64::new(v * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            for (a, c) in acc.iter_mut().zip(&buffer) {
                *a += c.norm_sqr();
            }
            segments += 1;
            start += step;
        }
        let nyquist_bin = if segment % 2 == 0 { Some(bins - 1) } else { None };
        let power = acc
            .iter()
            .enumerate()
            .map(|(k, p)| {
                let one_sided = if k == 0 || Some(k) == nyquist_bin { 1.0 } else { 2.0 };
                p * scale * one_sided / segments as f64
            })
            .collect();
        (self.frequencies(segment), power)
    }

    fn frequencies(&self, n: usize) -> Vec<f64> {
        (0..=n / 2)
            .map(|k| k as f64 * self.sample_rate_hz / n as f64)
            .collect()
    }
}

fn remove_mean(samples: &[f64]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|v| v - mean).collect()
}

/// Periodic Hann window.
fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}
