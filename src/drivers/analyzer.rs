use std::collections::BTreeMap;

use log::debug;

use crate::config::{AnalysisConfig, BandSpec};
use crate::drivers::fft::SpectrumBuilder;
use crate::drivers::{PipelineError, SignalBuffer};
use crate::types::Channel;

/// Band name -> power.
pub type BandPowers = BTreeMap<String, f64>;

/// Band powers of the left and right channel pairs, plus their per-band mean.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HemispherePowers {
    pub left: BandPowers,
    pub right: BandPowers,
    pub mean: BandPowers,
}

impl HemispherePowers {
    pub fn band(&self, name: &str) -> (f64, f64) {
        (
            self.left.get(name).copied().unwrap_or(0.0),
            self.right.get(name).copied().unwrap_or(0.0),
        )
    }
}

/// Each band's share of the summed power; all zero when there is no power.
pub fn relative_powers(powers: &BandPowers) -> BandPowers {
    let total: f64 = powers.values().sum();
    powers
        .iter()
        .map(|(k, v)| {
            let share = if total > 0.0 { v / total } else { 0.0 };
            (k.clone(), share)
        })
        .collect()
}

/// Rolling per-channel window plus band-power estimation on demand.
///
/// Results are cached: when a window is not full yet the previous result is
/// handed back unchanged. The band-power getters only recompute after new
/// samples arrived; callers that need the readiness signal use [`refresh`]
/// and the `last_*` accessors instead.
///
/// [`refresh`]: SpectralAnalyzer::refresh
#[derive(Debug)]
pub struct SpectralAnalyzer {
    config: AnalysisConfig,
    buffers: SignalBuffer,
    builder: SpectrumBuilder,
    aggregate: BandPowers,
    hemispheres: HemispherePowers,
    per_channel: BTreeMap<Channel, BandPowers>,
    computations: u64,
    /// New samples since the last refresh.
    stale: bool,
}

impl SpectralAnalyzer {
    pub fn new(config: AnalysisConfig, sample_rate_hz: f64) -> Result<Self, PipelineError> {
        let buffers = SignalBuffer::with_capacity(
            Channel::PRIMARY.to_vec(),
            sample_rate_hz,
            config.window_samples,
        )?;
        let zeros = zero_powers(&config.bands);
        Ok(Self {
            builder: SpectrumBuilder::new(config.psd, sample_rate_hz),
            buffers,
            aggregate: zeros.clone(),
            hemispheres: HemispherePowers {
                left: zeros.clone(),
                right: zeros.clone(),
                mean: zeros,
            },
            per_channel: BTreeMap::new(),
            computations: 0,
            stale: false,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn push(&mut self, channel: Channel, samples: &[f64]) {
        self.buffers.push(channel, samples);
        self.stale = true;
    }

    /// Whether every primary channel holds a full window.
    pub fn is_ready(&self) -> bool {
        self.buffers.min_len() >= self.config.window_samples
    }

    pub fn computations(&self) -> u64 {
        self.computations
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
        let zeros = zero_powers(&self.config.bands);
        self.aggregate = zeros.clone();
        self.hemispheres = HemispherePowers {
            left: zeros.clone(),
            right: zeros.clone(),
            mean: zeros,
        };
        self.per_channel.clear();
        self.stale = false;
    }

    /// Recompute every result from the current windows.
    ///
    /// `InsufficientData` means the cached results were left as they were.
    pub fn refresh(&mut self) -> Result<(), PipelineError> {
        self.stale = false;
        self.refresh_per_channel();
        let have = self.buffers.min_len();
        let need = self.config.window_samples;
        if have < need {
            debug!("spectral window not ready: {have}/{need} samples");
            return Err(PipelineError::InsufficientData { have, need });
        }
        let frame = self.buffers.snapshot(need);
        if let Some(avg) = frame.average_of(&self.config.aggregate_channels) {
            self.aggregate = self.band_powers(&avg);
        }
        if let (Some(left), Some(right)) = (
            frame.average_of(&Channel::LEFT),
            frame.average_of(&Channel::RIGHT),
        ) {
            let left = self.band_powers(&left);
            let right = self.band_powers(&right);
            let mean = left
                .iter()
                .map(|(k, l)| (k.clone(), (l + right.get(k).copied().unwrap_or(0.0)) / 2.0))
                .collect();
            self.hemispheres = HemispherePowers { left, right, mean };
        }
        self.computations += 1;
        Ok(())
    }

    /// Aggregate band powers of the configured (frontal) channels.
    pub fn aggregate_band_powers(&mut self) -> &BandPowers {
        self.refresh_if_stale();
        &self.aggregate
    }

    /// Left/right band powers for the lateral comparison.
    pub fn hemisphere_band_powers(&mut self) -> &HemispherePowers {
        self.refresh_if_stale();
        &self.hemispheres
    }

    pub fn last_aggregate(&self) -> &BandPowers {
        &self.aggregate
    }

    pub fn last_hemispheres(&self) -> &HemispherePowers {
        &self.hemispheres
    }

    /// Band powers of each channel that currently holds a full window.
    pub fn last_per_channel(&self) -> &BTreeMap<Channel, BandPowers> {
        &self.per_channel
    }

    fn refresh_if_stale(&mut self) {
        if !self.stale {
            return;
        }
        // Not ready: the cached results stand and `is_ready()` reports why.
        if let Err(err) = self.refresh() {
            debug!("keeping previous band powers: {err}");
        }
    }

    fn refresh_per_channel(&mut self) {
        let need = self.config.window_samples;
        for ch in Channel::PRIMARY {
            let Some(ring) = self.buffers.ring(ch) else {
                continue;
            };
            if ring.len() < need {
                continue;
            }
            let window = ring.latest(need);
            let powers = self.band_powers(&window);
            self.per_channel.insert(ch, powers);
        }
    }

    fn band_powers(&mut self, samples: &[f64]) -> BandPowers {
        let spectrum = self.builder.compute(samples);
        self.config
            .bands
            .iter()
            .map(|b| (b.name.clone(), spectrum.band_power(b)))
            .collect()
    }
}

fn zero_powers(bands: &[BandSpec]) -> BandPowers {
    bands.iter().map(|b| (b.name.clone(), 0.0)).collect()
}
