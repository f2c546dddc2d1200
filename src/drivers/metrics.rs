//! Scalar control metrics derived from band powers and raw signal spread.
//!
//! - Focus: beta/alpha ratio, scaled and clipped to [0, 1].
//! - Lateral bias: ln(right beta / left beta), clipped to [-1, 1].
//! - Contact quality: population standard deviation (µV) of the newest raw
//!   samples of a channel, bucketed into good / fair / poor.
use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::drivers::analyzer::HemispherePowers;
use crate::drivers::buffer::SampleRing;
use crate::types::{Channel, Quality};

const ALPHA: &str = "alpha";
const BETA: &str = "beta";

/// Focus score for one alpha/beta pair. Zero alpha gives zero focus.
pub fn focus_score(alpha: f64, beta: f64, focus_scale: f64) -> f64 {
    if alpha <= 0.0 || !alpha.is_finite() || !beta.is_finite() {
        return 0.0;
    }
    ((beta / alpha) / focus_scale).clamp(0.0, 1.0)
}

/// Signed left/right beta comparison; positive means the right side dominates.
pub fn lateral_bias(left_beta: f64, right_beta: f64) -> f64 {
    if left_beta <= 0.0 || right_beta <= 0.0 {
        return 0.0;
    }
    let bias = (right_beta / left_beta).ln();
    if bias.is_finite() {
        bias.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Position of `power` on a log10 scale between `min` and `max`, in percent.
pub fn log_scale_percent(power: f64, min: f64, max: f64) -> f64 {
    if power <= 0.0 || min <= 0.0 || max <= min {
        return 0.0;
    }
    let (lo, hi) = (min.log10(), max.log10());
    ((power.log10() - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0)
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let variance = data
        .iter()
        .map(|v| {
            let delta = v - mean;
            delta * delta
        })
        .sum::<f64>()
        / data.len() as f64;
    variance.sqrt()
}

pub fn classify_contact(std_microvolts: f64, config: &MetricsConfig) -> Quality {
    if std_microvolts < config.good_std {
        Quality::Good
    } else if std_microvolts < config.fair_std {
        Quality::Fair
    } else {
        Quality::Poor
    }
}

/// Everything a consumer needs from one metrics evaluation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub focus_score: f64,
    pub focus_left: f64,
    pub focus_right: f64,
    pub lateral_bias: f64,
    pub contact_quality: BTreeMap<Channel, Quality>,
}

#[derive(Debug)]
pub struct MetricDeriver {
    config: MetricsConfig,
    raw: BTreeMap<Channel, SampleRing>,
    contact: BTreeMap<Channel, Quality>,
}

impl MetricDeriver {
    pub fn new(config: MetricsConfig) -> Self {
        let raw = Channel::PRIMARY
            .iter()
            .map(|c| (*c, SampleRing::new(config.contact_window)))
            .collect();
        let contact = Channel::PRIMARY
            .iter()
            .map(|c| (*c, Quality::default()))
            .collect();
        Self {
            config,
            raw,
            contact,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Feed unfiltered microvolts for the contact estimate.
    pub fn push_raw(&mut self, channel: Channel, samples: &[f64]) {
        if let Some(ring) = self.raw.get_mut(&channel) {
            ring.push_slice(samples);
        }
    }

    /// Re-evaluate one channel. With fewer than a full contact window the
    /// previous verdict is kept.
    pub fn contact_quality(&mut self, channel: Channel) -> Quality {
        let previous = self.contact.get(&channel).copied().unwrap_or_default();
        let Some(ring) = self.raw.get(&channel) else {
            return previous;
        };
        if !ring.is_full() {
            return previous;
        }
        let spread = std_dev(&ring.latest(self.config.contact_window));
        let quality = classify_contact(spread, &self.config);
        if quality != previous {
            debug!(
                "{} contact {previous:?} -> {quality:?} (std {spread:.1} µV)",
                channel.description()
            );
        }
        self.contact.insert(channel, quality);
        quality
    }

    pub fn focus_score(&self, alpha: f64, beta: f64) -> f64 {
        focus_score(alpha, beta, self.config.focus_scale)
    }

    /// Focus from the hemisphere means, per-side focus, bias and contact.
    pub fn derive(&mut self, hemispheres: &HemispherePowers) -> DerivedMetrics {
        let band = |powers: &BTreeMap<String, f64>, name: &str| powers.get(name).copied().unwrap_or(0.0);
        let (left_beta, right_beta) = hemispheres.band(BETA);
        let (left_alpha, right_alpha) = hemispheres.band(ALPHA);
        let contact_quality = Channel::PRIMARY
            .iter()
            .map(|c| (*c, self.contact_quality(*c)))
            .collect();
        DerivedMetrics {
            focus_score: self.focus_score(band(&hemispheres.mean, ALPHA), band(&hemispheres.mean, BETA)),
            focus_left: self.focus_score(left_alpha, left_beta),
            focus_right: self.focus_score(right_alpha, right_beta),
            lateral_bias: lateral_bias(left_beta, right_beta),
            contact_quality,
        }
    }

    pub fn reset(&mut self) {
        for ring in self.raw.values_mut() {
            ring.clear();
        }
        for quality in self.contact.values_mut() {
            *quality = Quality::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn powers(alpha: f64, beta: f64) -> BTreeMap<String, f64> {
        [(ALPHA.to_string(), alpha), (BETA.to_string(), beta)]
            .into_iter()
            .collect()
    }

    #[test]
    fn focus_scales_and_clips() {
        assert_eq!(focus_score(10.0, 50.0, 10.0), 0.5);
        assert_eq!(focus_score(1.0, 500.0, 10.0), 1.0);
        assert_eq!(focus_score(0.0, 50.0, 10.0), 0.0);
    }

    #[test]
    fn bias_sign_follows_the_stronger_side() {
        assert!(lateral_bias(1.0, 2.0) > 0.0);
        assert!((lateral_bias(2.0, 1.0) + 2.0f64.ln()).abs() < 1e-12);
        assert_eq!(lateral_bias(1.0, 100.0), 1.0);
        assert_eq!(lateral_bias(0.0, 5.0), 0.0);
        assert_eq!(lateral_bias(5.0, 0.0), 0.0);
    }

    #[test]
    fn log_scale_maps_decades() {
        assert_eq!(log_scale_percent(1e2, 1e2, 1e8), 0.0);
        assert!((log_scale_percent(1e5, 1e2, 1e8) - 50.0).abs() < 1e-9);
        assert_eq!(log_scale_percent(1e9, 1e2, 1e8), 100.0);
        assert_eq!(log_scale_percent(0.0, 1e2, 1e8), 0.0);
    }

    #[test]
    fn std_dev_is_population_style() {
        assert_eq!(std_dev(&[0.0, 2.0, -2.0, 0.0]), 2.0f64.sqrt());
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn contact_needs_a_full_window() {
        let mut deriver = MetricDeriver::new(MetricsConfig::default());
        let noisy: Vec<f64> = (0..127).map(|i| if i % 2 == 0 { 100.0 } else { -100.0 }).collect();
        deriver.push_raw(Channel::Tp9, &noisy);
        assert_eq!(deriver.contact_quality(Channel::Tp9), Quality::Good);
        deriver.push_raw(Channel::Tp9, &[100.0]);
        assert_eq!(deriver.contact_quality(Channel::Tp9), Quality::Poor);
    }

    #[test]
    fn contact_buckets_by_spread() {
        let config = MetricsConfig::default();
        let mut deriver = MetricDeriver::new(config.clone());
        let square = |amp: f64| -> Vec<f64> {
            (0..128).map(|i| if i % 2 == 0 { amp } else { -amp }).collect()
        };
        deriver.push_raw(Channel::Af7, &square(5.0));
        deriver.push_raw(Channel::Af8, &square(30.0));
        deriver.push_raw(Channel::Tp10, &square(80.0));
        assert_eq!(deriver.contact_quality(Channel::Af7), Quality::Good);
        assert_eq!(deriver.contact_quality(Channel::Af8), Quality::Fair);
        assert_eq!(deriver.contact_quality(Channel::Tp10), Quality::Poor);
        assert_eq!(classify_contact(20.0, &config), Quality::Fair);
        assert_eq!(classify_contact(50.0, &config), Quality::Poor);
    }

    #[test]
    fn derive_uses_hemisphere_means() {
        let mut deriver = MetricDeriver::new(MetricsConfig::default());
        let hemispheres = HemispherePowers {
            left: powers(10.0, 20.0),
            right: powers(10.0, 60.0),
            mean: powers(10.0, 40.0),
        };
        let m = deriver.derive(&hemispheres);
        assert!((m.focus_score - 0.4).abs() < 1e-12);
        assert!((m.focus_left - 0.2).abs() < 1e-12);
        assert!((m.focus_right - 0.6).abs() < 1e-12);
        assert!((m.lateral_bias - 1.0).abs() < 1e-12);
        assert_eq!(m.contact_quality.len(), 4);
    }

    proptest! {
        #[test]
        fn focus_stays_in_unit_interval(alpha in 0.0f64..1e9, beta in 0.0f64..1e9, scale in 0.1f64..100.0) {
            let f = focus_score(alpha, beta, scale);
            prop_assert!((0.0..=1.0).contains(&f));
        }

        #[test]
        fn bias_stays_bounded(left in 0.0f64..1e9, right in 0.0f64..1e9) {
            let b = lateral_bias(left, right);
            prop_assert!((-1.0..=1.0).contains(&b));
        }
    }
}
