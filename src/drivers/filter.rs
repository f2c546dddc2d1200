use std::collections::BTreeMap;
use std::f64::consts::PI;

use log::{info, warn};
use rustfft::num_complex::Complex64;

use crate::drivers::PipelineError;
use crate::types::Channel;

pub const MIN_ORDER: usize = 2;
pub const MAX_ORDER: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Steady-state delay-line contents for a unit step input, transposed direct form II.
    fn step_state(&self) -> BiquadState {
        let dc_gain = (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2);
        BiquadState {
            z1: dc_gain - self.b0,
            z2: self.b2 - self.a2 * dc_gain,
        }
    }

    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    fn scaled(self, k: f64) -> Self {
        Self {
            z1: self.z1 * k,
            z2: self.z2 * k,
        }
    }
}

fn process(coeffs: &BiquadCoeffs, state: &mut BiquadState, input: f64) -> f64 {
    // Transposed direct form II
    let y = coeffs.b0 * input + state.z1;
    state.z1 = coeffs.b1 * input - coeffs.a1 * y + state.z2;
    state.z2 = coeffs.b2 * input - coeffs.a2 * y;
    y
}

/// Butterworth band-pass as a cascade of second-order sections.
#[derive(Clone, Debug, PartialEq)]
pub struct BandpassDesign {
    pub low_hz: f64,
    pub high_hz: f64,
    pub order: usize,
    pub sample_rate_hz: f64,
    sections: Vec<BiquadCoeffs>,
    /// Per-section state for a unit step held forever.
    step_state: Vec<BiquadState>,
}

impl BandpassDesign {
    pub fn new(
        low_hz: f64,
        high_hz: f64,
        order: usize,
        sample_rate_hz: f64,
    ) -> Result<Self, PipelineError> {
        let nyquist = sample_rate_hz * 0.5;
        let reject = |reason| PipelineError::InvalidFilterParameters {
            low_hz,
            high_hz,
            order,
            reason,
        };
        if !low_hz.is_finite() || !high_hz.is_finite() {
            return Err(reject("cut-off frequencies must be finite"));
        }
        if low_hz >= high_hz {
            return Err(reject("low cut must be below high cut"));
        }
        if low_hz <= 0.0 || high_hz >= nyquist {
            return Err(reject("cut-offs must lie strictly between 0 Hz and Nyquist"));
        }
        if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
            return Err(reject("order must be between 2 and 8"));
        }
        let sections = butterworth_bandpass_sos(low_hz, high_hz, order, sample_rate_hz);
        let mut step_state = Vec::with_capacity(sections.len());
        let mut scale = 1.0;
        for s in &sections {
            step_state.push(s.step_state().scaled(scale));
            scale *= s.dc_gain();
        }
        Ok(Self {
            low_hz,
            high_hz,
            order,
            sample_rate_hz,
            sections,
            step_state,
        })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Magnitude response at `freq_hz`.
    pub fn gain_at(&self, freq_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / self.sample_rate_hz;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        self.sections
            .iter()
            .map(|s| {
                let num = s.b0 + z1 * s.b1 + z2 * s.b2;
                let den = 1.0 + z1 * s.a1 + z2 * s.a2;
                (num / den).norm()
            })
            .product()
    }

    fn initial_state(&self, first_sample: f64) -> Vec<BiquadState> {
        self.step_state
            .iter()
            .map(|s| s.scaled(first_sample))
            .collect()
    }
}

/// Analog Butterworth prototype -> band-pass -> bilinear transform, grouped
/// into sections with one zero at z = 1 and one at z = -1 each.
fn butterworth_bandpass_sos(
    low_hz: f64,
    high_hz: f64,
    order: usize,
    sample_rate_hz: f64,
) -> Vec<BiquadCoeffs> {
    let fs2 = 2.0 * sample_rate_hz;
    let warp = |f: f64| fs2 * (PI * f / sample_rate_hz).tan();
    let (w1, w2) = (warp(low_hz), warp(high_hz));
    let bw = w2 - w1;
    let w0 = (w1 * w2).sqrt();

    let mut analog = Vec::with_capacity(2 * order);
    for k in 0..order {
        let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
        let proto = Complex64::from_polar(1.0, theta);
        let shifted = proto * (bw / 2.0);
        let root = (shifted * shifted - w0 * w0).sqrt();
        analog.push(shifted + root);
        analog.push(shifted - root);
    }
    // k_bp = bw^N, bilinear adds fs2^N / prod(fs2 - p)
    let mut gain = Complex64::new(bw.powi(order as i32) * fs2.powi(order as i32), 0.0);
    let digital: Vec<Complex64> = analog
        .iter()
        .map(|&p| {
            gain /= fs2 - p;
            (fs2 + p) / (fs2 - p)
        })
        .collect();

    let eps = 1e-12;
    let mut sections = Vec::with_capacity(order);
    let mut reals: Vec<f64> = Vec::new();
    for p in &digital {
        if p.im > eps {
            sections.push((-2.0 * p.re, p.norm_sqr()));
        } else if p.im.abs() <= eps {
            reals.push(p.re);
        }
    }
    reals.sort_by(|a, b| a.total_cmp(b));
    for pair in reals.chunks(2) {
        match pair {
            [a, b] => sections.push((-(a + b), a * b)),
            [a] => sections.push((-a, 0.0)),
            _ => {}
        }
    }
    let k = gain.re;
    sections
        .into_iter()
        .enumerate()
        .map(|(i, (a1, a2))| {
            let g = if i == 0 { k } else { 1.0 };
            BiquadCoeffs {
                b0: g,
                b1: 0.0,
                b2: -g,
                a1,
                a2,
            }
        })
        .collect()
}

#[derive(Clone, Debug, Default)]
struct ChannelFilterState {
    /// `None` until the first sample after (re)configuration seeds the steady state.
    sections: Option<Vec<BiquadState>>,
}

/// Optional band-pass per channel with state carried across frames.
#[derive(Debug, Default)]
pub struct ChannelFilter {
    enabled: bool,
    design: Option<BandpassDesign>,
    states: BTreeMap<Channel, ChannelFilterState>,
}

impl ChannelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.design.is_some()
    }

    pub fn design(&self) -> Option<&BandpassDesign> {
        self.design.as_ref()
    }

    /// Install a new design and re-seed every channel's state.
    ///
    /// On error the previous design and enabled flag are left untouched.
    pub fn configure(
        &mut self,
        low_hz: f64,
        high_hz: f64,
        order: usize,
        sample_rate_hz: f64,
    ) -> Result<(), PipelineError> {
        let design = match BandpassDesign::new(low_hz, high_hz, order, sample_rate_hz) {
            Ok(d) => d,
            Err(err) => {
                warn!("filter configuration rejected: {err}");
                return Err(err);
            }
        };
        info!(
            "band-pass filter designed: {low_hz}-{high_hz} Hz, order {order}, {} sections",
            design.section_count()
        );
        self.design = Some(design);
        self.reset_states();
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.reset_states();
        }
        self.enabled = enabled;
    }

    /// Re-seed one channel without disturbing the others.
    pub fn reset_channel(&mut self, channel: Channel) {
        self.states.insert(channel, ChannelFilterState::default());
    }

    pub fn reset_states(&mut self) {
        self.states.clear();
    }

    /// Filter `samples` in place; a disabled filter leaves them untouched.
    pub fn apply(&mut self, channel: Channel, samples: &mut [f64]) {
        let Some(design) = self.design.as_ref().filter(|_| self.enabled) else {
            return;
        };
        let Some(&first) = samples.first() else {
            return;
        };
        let entry = self.states.entry(channel).or_default();
        let states = entry
            .sections
            .get_or_insert_with(|| design.initial_state(first));
        for sample in samples.iter_mut() {
            let mut value = *sample;
            for (coeffs, state) in design.sections.iter().zip(states.iter_mut()) {
                value = process(coeffs, state, value);
            }
            *sample = value;
        }
    }

    /// Convenience wrapper returning a filtered copy.
    pub fn apply_copy<const N: usize>(&mut self, channel: Channel, samples: &[f64; N]) -> [f64; N] {
        let mut out = *samples;
        self.apply(channel, &mut out);
        out
    }
}
