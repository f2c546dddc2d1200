use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{FilterConfig, PipelineConfig};
use crate::drivers::analyzer::{relative_powers, BandPowers, HemispherePowers, SpectralAnalyzer};
use crate::drivers::assembler::{AlignedFrame, FrameAssembler};
use crate::drivers::clock::SampleClock;
use crate::drivers::filter::ChannelFilter;
use crate::drivers::metrics::{DerivedMetrics, MetricDeriver};
use crate::drivers::packet::{decode_eeg, decode_telemetry, TelemetryData, SAMPLES_PER_PACKET};
use crate::drivers::source::{Notification, NotificationSource, SourceKind};
use crate::drivers::{PipelineError, SignalBuffer};
use crate::types::{Channel, Quality};

/// Running counters of one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub packets_decoded: u64,
    pub frames_emitted: u64,
    pub samples_per_channel: u64,
    pub gaps_detected: u64,
    pub packets_dropped: u64,
    pub duplicates: u64,
    /// Cycles whose counter went backwards; discarded like duplicates.
    pub reordered: u64,
    pub decode_errors: u64,
    /// Samples per channel divided by the arrival span of the session.
    pub effective_rate_hz: f64,
}

/// Snapshot handed to consumers on every analysis tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConsumerTick {
    /// Most recent filtered samples per primary channel, oldest first.
    pub filtered: BTreeMap<Channel, Vec<f64>>,
    pub aggregate_powers: BandPowers,
    pub relative_powers: BandPowers,
    pub left_powers: BandPowers,
    pub right_powers: BandPowers,
    pub hemisphere_mean_powers: BandPowers,
    pub channel_powers: BTreeMap<Channel, BandPowers>,
    pub focus_score: f64,
    pub focus_left: f64,
    pub focus_right: f64,
    pub lateral_bias: f64,
    pub contact_quality: BTreeMap<Channel, Quality>,
    /// Whether the spectral window was full for this tick.
    pub spectrum_ready: bool,
    pub clock_rate_hz: Option<f64>,
    pub telemetry: Option<TelemetryData>,
    pub stats: SessionStats,
}

impl ConsumerTick {
    fn from_parts(
        filtered: BTreeMap<Channel, Vec<f64>>,
        aggregate: &BandPowers,
        hemispheres: &HemispherePowers,
        channel_powers: &BTreeMap<Channel, BandPowers>,
        metrics: DerivedMetrics,
    ) -> Self {
        Self {
            filtered,
            relative_powers: relative_powers(aggregate),
            aggregate_powers: aggregate.clone(),
            left_powers: hemispheres.left.clone(),
            right_powers: hemispheres.right.clone(),
            hemisphere_mean_powers: hemispheres.mean.clone(),
            channel_powers: channel_powers.clone(),
            focus_score: metrics.focus_score,
            focus_left: metrics.focus_left,
            focus_right: metrics.focus_right,
            lateral_bias: metrics.lateral_bias,
            contact_quality: metrics.contact_quality,
            ..Self::default()
        }
    }
}

/// All mutable state of one streaming session, driven by a single caller.
///
/// Notifications go through [`Session::handle_notification`] in arrival
/// order; [`Session::analysis_tick`] runs on the slower consumer cadence.
#[derive(Debug)]
pub struct Session {
    config: PipelineConfig,
    /// Created by the first notification of the session.
    clock: Option<SampleClock>,
    assembler: FrameAssembler,
    filter: ChannelFilter,
    analyzer: SpectralAnalyzer,
    metrics: MetricDeriver,
    display: SignalBuffer,
    telemetry: Option<TelemetryData>,
    stats: SessionStats,
    first_arrival: Option<f64>,
    last_arrival: f64,
}

impl Session {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let mut filter = ChannelFilter::new();
        apply_filter_config(&mut filter, &config.filter, config.sample_rate_hz)?;
        Ok(Self {
            clock: None,
            assembler: FrameAssembler::new(),
            filter,
            analyzer: SpectralAnalyzer::new(config.analysis.clone(), config.sample_rate_hz)?,
            metrics: MetricDeriver::new(config.metrics.clone()),
            display: SignalBuffer::with_capacity(
                Channel::PRIMARY.to_vec(),
                config.sample_rate_hz,
                config.display_history,
            )?,
            telemetry: None,
            stats: SessionStats::default(),
            first_arrival: None,
            last_arrival: 0.0,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clock(&self) -> Option<&SampleClock> {
        self.clock.as_ref()
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    pub fn telemetry(&self) -> Option<&TelemetryData> {
        self.telemetry.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.clock.is_some()
    }

    pub fn stats(&self) -> SessionStats {
        let asm = self.assembler.stats();
        let mut stats = self.stats;
        stats.frames_emitted = asm.frames_emitted;
        stats.gaps_detected = asm.gaps_detected;
        stats.packets_dropped = asm.packets_dropped;
        stats.duplicates = asm.duplicates;
        stats.reordered = asm.reordered;
        stats.effective_rate_hz = match self.first_arrival {
            Some(first) if self.last_arrival > first => {
                stats.samples_per_channel as f64 / (self.last_arrival - first)
            }
            _ => 0.0,
        };
        stats
    }

    /// Decode one notification and push any completed frame downstream.
    ///
    /// Malformed payloads and unmapped handles are counted, logged and
    /// returned as recoverable errors; the session state is left intact.
    pub fn handle_notification(
        &mut self,
        notification: &Notification,
    ) -> Result<Option<AlignedFrame>, PipelineError> {
        let source = match notification.source() {
            Ok(s) => s,
            Err(err) => {
                warn!("dropping notification: {err}");
                self.stats.decode_errors += 1;
                return Err(err);
            }
        };
        match source {
            SourceKind::Telemetry => {
                match decode_telemetry(&notification.payload) {
                    Ok(t) => {
                        debug!("telemetry {}: battery {:.1}%", t.sequence_id, t.battery_percent);
                        self.telemetry = Some(t);
                    }
                    Err(err) => {
                        warn!("dropping telemetry: {err}");
                        self.stats.decode_errors += 1;
                        return Err(err);
                    }
                }
                Ok(None)
            }
            SourceKind::Eeg(channel) => {
                let packet = match decode_eeg(channel, &notification.payload) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!("dropping {channel} packet: {err}");
                        self.stats.decode_errors += 1;
                        return Err(err);
                    }
                };
                self.stats.packets_decoded += 1;
                debug!("{channel} packet {} at {:.4}", packet.device_counter, notification.arrival);
                let arrival = notification.arrival;
                let clock = self.clock.get_or_insert_with(|| {
                    info!("session started at {arrival:.3}");
                    SampleClock::with_nominal_rate(arrival, self.config.sample_rate_hz)
                });
                self.first_arrival.get_or_insert(arrival);
                self.last_arrival = self.last_arrival.max(arrival);
                let frame = self.assembler.push(packet, arrival, clock);
                if let Some(frame) = &frame {
                    self.ingest_frame(frame);
                }
                Ok(frame)
            }
        }
    }

    /// Drain everything `source` has pending. Returns the number of frames completed.
    pub fn pump<S: NotificationSource>(&mut self, source: &mut S) -> Result<usize, PipelineError> {
        let mut frames = 0;
        while let Some(notification) = source.next_notification()? {
            match self.handle_notification(&notification) {
                Ok(Some(_)) => frames += 1,
                Ok(None) => {}
                Err(err) if err.is_recoverable() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(frames)
    }

    fn ingest_frame(&mut self, frame: &AlignedFrame) {
        for (&channel, raw) in &frame.samples_by_channel {
            self.metrics.push_raw(channel, raw);
            let filtered = self.filter.apply_copy(channel, raw);
            self.analyzer.push(channel, &filtered);
            self.display.push(channel, &filtered);
        }
        self.stats.samples_per_channel += SAMPLES_PER_PACKET as u64;
    }

    /// Recompute spectra and metrics from the current buffers.
    pub fn analysis_tick(&mut self) -> ConsumerTick {
        let spectrum_ready = match self.analyzer.refresh() {
            Ok(()) => true,
            Err(PipelineError::InsufficientData { .. }) => false,
            Err(err) => {
                warn!("spectral analysis failed: {err}");
                false
            }
        };
        let metrics = self.metrics.derive(self.analyzer.last_hemispheres());
        let frame = self.display.full_frame();
        let filtered = frame
            .channels
            .iter()
            .copied()
            .zip(frame.samples)
            .collect();
        let mut tick = ConsumerTick::from_parts(
            filtered,
            self.analyzer.last_aggregate(),
            self.analyzer.last_hemispheres(),
            self.analyzer.last_per_channel(),
            metrics,
        );
        tick.spectrum_ready = spectrum_ready;
        tick.clock_rate_hz = self.clock.as_ref().map(SampleClock::estimated_rate_hz);
        tick.telemetry = self.telemetry.clone();
        tick.stats = self.stats();
        tick
    }

    /// Install a new filter configuration; on error the previous one stays active.
    pub fn configure_filter(&mut self, config: &FilterConfig) -> Result<(), PipelineError> {
        apply_filter_config(&mut self.filter, config, self.config.sample_rate_hz)?;
        self.config.filter = config.clone();
        Ok(())
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.filter.set_enabled(enabled);
        self.config.filter.enabled = enabled;
        info!("band-pass filter {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Drop clock, channel state and buffers so the next notification starts a fresh session.
    pub fn reset(&mut self) {
        if self.clock.is_some() {
            info!("session reset after {} frames", self.assembler.stats().frames_emitted);
        }
        self.clock = None;
        self.assembler.reset();
        self.filter.reset_states();
        self.analyzer.reset();
        self.metrics.reset();
        self.display.clear();
        self.telemetry = None;
        self.stats = SessionStats::default();
        self.first_arrival = None;
        self.last_arrival = 0.0;
    }
}

fn apply_filter_config(
    filter: &mut ChannelFilter,
    config: &FilterConfig,
    sample_rate_hz: f64,
) -> Result<(), PipelineError> {
    filter.configure(config.low_hz, config.high_hz, config.order, sample_rate_hz)?;
    filter.set_enabled(config.enabled);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::packet::{encode_eeg, microvolts_to_code};
    use crate::drivers::source::ManualSource;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    const T0: f64 = 100.0;

    fn codes_for(channel: Channel, counter: u16) -> [u16; SAMPLES_PER_PACKET] {
        let mut codes = [0u16; SAMPLES_PER_PACKET];
        for (i, c) in codes.iter_mut().enumerate() {
            let n = f64::from(counter) * 12.0 + i as f64;
            let freq = if channel.slot() % 2 == 0 { 10.0 } else { 20.0 };
            *c = microvolts_to_code(30.0 * (2.0 * PI * freq * n / 256.0).sin());
        }
        codes
    }

    /// One reception cycle in device arrival order, arriving around the end of its samples.
    fn cycle(counter: u16, k: u64, rng: &mut StdRng) -> Vec<Notification> {
        let base = T0 + (12 * k + 11) as f64 / 256.0;
        Channel::ARRIVAL_ORDER
            .iter()
            .map(|ch| {
                let payload = encode_eeg(counter, &codes_for(*ch, counter));
                Notification::eeg(*ch, payload.to_vec(), base + rng.gen_range(0.0..0.004))
            })
            .collect()
    }

    fn session() -> Session {
        Session::new(PipelineConfig::default()).unwrap()
    }

    #[test]
    fn thousand_packets_reconstruct_every_sample() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut source = ManualSource::new(
            (0..1000u64).flat_map(|k| cycle(k as u16, k, &mut rng)).collect::<Vec<_>>(),
        );
        let mut s = session();
        assert_eq!(s.pump(&mut source).unwrap(), 1000);
        let stats = s.stats();
        assert_eq!(stats.samples_per_channel, 12_000);
        assert_eq!(stats.frames_emitted, 1000);
        assert_eq!(stats.packets_decoded, 5000);
        assert_eq!(stats.gaps_detected, 0);
        assert_eq!(stats.decode_errors, 0);
        let rate = s.clock().unwrap().estimated_rate_hz();
        assert!((rate - 256.0).abs() / 256.0 < 0.01, "rate {rate}");
        assert!((stats.effective_rate_hz - 256.0).abs() < 3.0);
    }

    #[test]
    fn samples_come_out_in_device_order() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut s = session();
        let mut indices = Vec::new();
        for k in 0..20u64 {
            for n in cycle(k as u16, k, &mut rng) {
                if let Some(frame) = s.handle_notification(&n).unwrap() {
                    indices.push(frame.frame_sample_index);
                    let expected: Vec<f64> = codes_for(Channel::Tp9, k as u16)
                        .iter()
                        .map(|c| crate::drivers::packet::code_to_microvolts(*c))
                        .collect();
                    assert_eq!(frame.samples_by_channel[&Channel::Tp9].to_vec(), expected);
                }
            }
        }
        let expected: Vec<u64> = (0..20).map(|k| k * 12).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn dropped_cycle_is_a_gap_not_an_error() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut s = session();
        for k in [0u64, 1, 3] {
            for n in cycle(k as u16, k, &mut rng) {
                s.handle_notification(&n).unwrap();
            }
        }
        let stats = s.stats();
        assert_eq!(stats.gaps_detected, 1);
        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(stats.samples_per_channel, 36);
    }

    #[test]
    fn resent_and_stale_cycles_add_no_samples() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut s = session();
        let mut frames = 0;
        for (counter, k) in [(0u16, 0u64), (1, 1), (0, 1), (1, 1), (2, 2)] {
            for n in cycle(counter, k, &mut rng) {
                if s.handle_notification(&n).unwrap().is_some() {
                    frames += 1;
                }
            }
        }
        assert_eq!(frames, 3);
        let stats = s.stats();
        assert_eq!(stats.samples_per_channel, 36);
        assert_eq!(stats.frames_emitted, 3);
        assert_eq!(stats.reordered, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.gaps_detected, 0);
        assert_eq!(stats.packets_dropped, 0);
    }

    #[test]
    fn malformed_payload_is_dropped_and_counted() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut s = session();
        let short = Notification::eeg(Channel::Tp9, vec![0u8; 7], T0);
        let err = s.handle_notification(&short).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!s.is_started());
        let unknown = Notification {
            handle: 50,
            payload: vec![0; 20],
            arrival: T0,
        };
        assert!(s.handle_notification(&unknown).is_err());
        for n in cycle(0, 0, &mut rng) {
            s.handle_notification(&n).unwrap();
        }
        let stats = s.stats();
        assert_eq!(stats.decode_errors, 2);
        assert_eq!(stats.frames_emitted, 1);
    }

    #[test]
    fn telemetry_is_kept_and_exposed() {
        let mut s = session();
        let payload = [0x00, 0x07, 0x01, 0x00, 0x00, 0x0a, 0, 0, 0x00, 0x21];
        s.handle_notification(&Notification::telemetry(payload.to_vec(), T0))
            .unwrap();
        let tick = s.analysis_tick();
        let t = tick.telemetry.unwrap();
        assert_eq!(t.sequence_id, 7);
        assert_eq!(t.battery_percent, 50.0);
        assert_eq!(t.temperature_raw, 0x21);
        assert!(s
            .handle_notification(&Notification::telemetry(vec![0; 4], T0))
            .is_err());
    }

    #[test]
    fn tick_before_a_full_window_holds_defaults() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut s = session();
        for k in 0..5u64 {
            for n in cycle(k as u16, k, &mut rng) {
                s.handle_notification(&n).unwrap();
            }
        }
        let tick = s.analysis_tick();
        assert!(!tick.spectrum_ready);
        assert_eq!(tick.focus_score, 0.0);
        assert_eq!(tick.lateral_bias, 0.0);
        assert_eq!(tick.filtered[&Channel::Af7].len(), 60);
        assert!(tick.aggregate_powers.values().all(|p| *p == 0.0));
    }

    #[test]
    fn tick_reports_spectra_and_metrics_once_ready() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut s = session();
        for k in 0..40u64 {
            for n in cycle(k as u16, k, &mut rng) {
                s.handle_notification(&n).unwrap();
            }
        }
        let tick = s.analysis_tick();
        assert!(tick.spectrum_ready);
        // TP9/AF8 carry 10 Hz, AF7/TP10 carry 20 Hz at equal amplitude.
        assert!(tick.aggregate_powers["alpha"] > 0.0 && tick.aggregate_powers["beta"] > 0.0);
        assert!((0.0..=1.0).contains(&tick.focus_score));
        assert!(tick.lateral_bias.abs() < 0.1);
        assert_eq!(tick.channel_powers.len(), 4);
        assert_eq!(tick.contact_quality[&Channel::Tp9], Quality::Fair);
        assert!(tick.clock_rate_hz.is_some());
        let total: f64 = tick.relative_powers.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reset_starts_a_fresh_session() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut s = session();
        for k in 0..3u64 {
            for n in cycle(k as u16, k, &mut rng) {
                s.handle_notification(&n).unwrap();
            }
        }
        s.reset();
        assert!(!s.is_started());
        assert_eq!(s.stats(), SessionStats::default());
        let mut first = None;
        for n in cycle(500, 0, &mut rng) {
            if let Some(f) = s.handle_notification(&n).unwrap() {
                first = Some(f);
            }
        }
        let first = first.unwrap();
        assert_eq!(first.frame_sample_index, 0);
        assert_eq!(s.stats().gaps_detected, 0);
    }

    #[test]
    fn rejected_filter_keeps_previous_configuration() {
        let mut s = session();
        let bad = FilterConfig {
            enabled: true,
            low_hz: 40.0,
            high_hz: 10.0,
            order: 4,
        };
        assert!(s.configure_filter(&bad).is_err());
        assert!(!s.filter().is_enabled());
        assert_eq!(s.config().filter, FilterConfig::default());
        let good = FilterConfig {
            enabled: true,
            low_hz: 5.0,
            high_hz: 30.0,
            order: 4,
        };
        s.configure_filter(&good).unwrap();
        assert!(s.filter().is_enabled());
        s.set_filter_enabled(false);
        assert!(!s.filter().is_enabled());
    }
}
