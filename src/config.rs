use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::drivers::PipelineError;
use crate::types::Channel;

/// Named frequency interval, inclusive on both ends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    pub name: String,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl BandSpec {
    pub fn new(name: &str, low_hz: f64, high_hz: f64) -> Self {
        Self {
            name: name.to_owned(),
            low_hz,
            high_hz,
        }
    }

    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }
}

pub fn default_bands() -> Vec<BandSpec> {
    vec![
        BandSpec::new("delta", 0.5, 4.0),
        BandSpec::new("theta", 4.0, 8.0),
        BandSpec::new("alpha", 8.0, 13.0),
        BandSpec::new("beta", 13.0, 30.0),
        BandSpec::new("gamma", 30.0, 49.0),
    ]
}

/// How the power spectral density is estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PsdMethod {
    /// |FFT|² of the whole window, band power is the bin sum.
    #[default]
    Periodogram,
    /// Averaged Hann-windowed segments, band power is the trapezoidal integral.
    Welch { segment: usize, overlap: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub low_hz: f64,
    pub high_hz: f64,
    pub order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            low_hz: 1.0,
            high_hz: 50.0,
            order: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples per analysis window (one second at the nominal rate).
    pub window_samples: usize,
    pub cadence_ms: u64,
    pub psd: PsdMethod,
    pub bands: Vec<BandSpec>,
    /// Channels averaged for the aggregate (visualisation) band powers.
    pub aggregate_channels: Vec<Channel>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_samples: 256,
            cadence_ms: 500,
            psd: PsdMethod::default(),
            bands: default_bands(),
            aggregate_channels: vec![Channel::Af7, Channel::Af8],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Divisor applied to beta/alpha before clipping to [0, 1].
    pub focus_scale: f64,
    /// Newest raw samples used for the contact estimate (~0.5 s).
    pub contact_window: usize,
    pub good_std: f64,
    pub fair_std: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            focus_scale: 10.0,
            contact_window: 128,
            good_std: 20.0,
            fair_std: 50.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate_hz: f64,
    pub filter: FilterConfig,
    pub analysis: AnalysisConfig,
    pub metrics: MetricsConfig,
    /// Filtered samples kept per channel for consumers.
    pub display_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: crate::drivers::NOMINAL_SAMPLE_RATE_HZ,
            filter: FilterConfig::default(),
            analysis: AnalysisConfig::default(),
            metrics: MetricsConfig::default(),
            display_history: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let bad = |msg: String| Err(PipelineError::InvalidConfig(msg));
        if !(self.sample_rate_hz > 0.0) {
            return bad(format!("sample rate {} must be positive", self.sample_rate_hz));
        }
        let a = &self.analysis;
        if a.window_samples == 0 {
            return bad("analysis window must hold at least one sample".into());
        }
        if a.cadence_ms == 0 {
            return bad("analysis cadence must be non-zero".into());
        }
        if a.bands.is_empty() {
            return bad("at least one frequency band is required".into());
        }
        if let Some(b) = a.bands.iter().find(|b| !(b.low_hz < b.high_hz) || b.low_hz < 0.0) {
            return bad(format!("band {} has inverted or negative edges", b.name));
        }
        if a.aggregate_channels.is_empty() || a.aggregate_channels.iter().any(|c| !c.is_primary()) {
            return bad("aggregate channels must be a non-empty set of primary channels".into());
        }
        if let PsdMethod::Welch { segment, overlap } = a.psd {
            if segment == 0 || segment > a.window_samples || overlap >= segment {
                return bad(format!(
                    "welch segment {segment} / overlap {overlap} does not fit a {}-sample window",
                    a.window_samples
                ));
            }
        }
        let m = &self.metrics;
        if m.contact_window == 0 || m.contact_window > a.window_samples {
            return bad(format!(
                "contact window {} must be within 1..={}",
                m.contact_window, a.window_samples
            ));
        }
        if !(m.focus_scale > 0.0) || !(m.good_std < m.fair_std) {
            return bad("focus scale must be positive and contact thresholds increasing".into());
        }
        if self.display_history == 0 {
            return bad("display history must be non-zero".into());
        }
        Ok(())
    }
}
