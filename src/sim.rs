// src/sim.rs
use std::collections::VecDeque;
use std::f64::consts::PI;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drivers::packet::{encode_eeg, microvolts_to_code, SAMPLES_PER_PACKET};
use crate::drivers::{Notification, NotificationSource, PipelineError, NOMINAL_SAMPLE_RATE_HZ};
use crate::types::Channel;

const ALPHA_HZ: f64 = 10.0;
const BETA_HZ: f64 = 20.0;
/// Upper bound of the random delay between a cycle's last sample and its notifications.
const MAX_JITTER_S: f64 = 0.004;

/// Amplitudes (µV) and link behaviour of the synthetic headset.
#[derive(Clone, Debug, PartialEq)]
pub struct SimProfile {
    pub alpha_uv: f64,
    pub beta_left_uv: f64,
    pub beta_right_uv: f64,
    /// Peak of the uniform noise added to every sample.
    pub noise_uv: f64,
    /// Chance that a whole cycle never reaches the host.
    pub drop_probability: f64,
    /// A telemetry notification is emitted every this many cycles (0 = never).
    pub telemetry_every: u64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            alpha_uv: 12.0,
            beta_left_uv: 6.0,
            beta_right_uv: 6.0,
            noise_uv: 3.0,
            drop_probability: 0.0,
            telemetry_every: 256,
        }
    }
}

/// Synthetic headband producing genuine 20-byte packets in device arrival order.
///
/// Left channels (TP9, AF7) carry `beta_left_uv`, right channels (AF8, TP10)
/// `beta_right_uv`; all four share the alpha rhythm. AUX only carries noise.
#[derive(Debug)]
pub struct SimulatedHeadset {
    profile: SimProfile,
    rng: StdRng,
    start_time: f64,
    sample_rate_hz: f64,
    cycle: u64,
    counter: u16,
    pending: VecDeque<Notification>,
    battery_raw: u16,
}

impl SimulatedHeadset {
    pub fn new(seed: u64, start_time: f64) -> Self {
        Self::with_profile(seed, start_time, SimProfile::default())
    }

    pub fn with_profile(seed: u64, start_time: f64, profile: SimProfile) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
            start_time,
            sample_rate_hz: NOMINAL_SAMPLE_RATE_HZ,
            cycle: 0,
            counter: 0,
            pending: VecDeque::new(),
            battery_raw: 512,
        }
    }

    pub fn cycles_generated(&self) -> u64 {
        self.cycle
    }

    /// Nominal time at which cycle `k`'s notifications leave the device.
    fn cycle_time(&self, k: u64) -> f64 {
        let last_sample = (k + 1) * SAMPLES_PER_PACKET as u64 - 1;
        self.start_time + last_sample as f64 / self.sample_rate_hz
    }

    /// Queue every cycle whose samples are complete by `now`.
    pub fn advance_to(&mut self, now: f64) {
        while self.cycle_time(self.cycle) <= now {
            let batch = self.next_cycle();
            self.pending.extend(batch);
        }
    }

    /// Generate the next cycle. A dropped cycle yields no EEG notifications
    /// but still consumes its device counter.
    pub fn next_cycle(&mut self) -> Vec<Notification> {
        let k = self.cycle;
        let counter = self.counter;
        self.cycle += 1;
        self.counter = self.counter.wrapping_add(1);

        let mut out = Vec::with_capacity(Channel::ARRIVAL_ORDER.len() + 1);
        let base = self.cycle_time(k);
        if self.profile.telemetry_every > 0 && k % self.profile.telemetry_every == 0 {
            out.push(Notification::telemetry(self.telemetry_payload(k), base));
        }
        let drop_probability = self.profile.drop_probability.clamp(0.0, 1.0);
        if drop_probability > 0.0 && self.rng.gen_bool(drop_probability) {
            debug!("simulated headset dropped cycle {counter}");
            return out;
        }
        for channel in Channel::ARRIVAL_ORDER {
            let codes = self.codes(channel, k);
            let arrival = base + self.rng.gen_range(0.0..MAX_JITTER_S);
            out.push(Notification::eeg(channel, encode_eeg(counter, &codes).to_vec(), arrival));
        }
        out
    }

    fn codes(&mut self, channel: Channel, k: u64) -> [u16; SAMPLES_PER_PACKET] {
        let p = &self.profile;
        let noise_uv = p.noise_uv;
        let (alpha, beta) = match channel {
            Channel::Tp9 | Channel::Af7 => (p.alpha_uv, p.beta_left_uv),
            Channel::Af8 | Channel::Tp10 => (p.alpha_uv, p.beta_right_uv),
            Channel::Aux => (0.0, 0.0),
        };
        let mut codes = [0u16; SAMPLES_PER_PACKET];
        for (i, code) in codes.iter_mut().enumerate() {
            let t = (k * SAMPLES_PER_PACKET as u64 + i as u64) as f64 / self.sample_rate_hz;
            let noise = if noise_uv > 0.0 {
                self.rng.gen_range(-noise_uv..noise_uv)
            } else {
                0.0
            };
            let value = alpha * (2.0 * PI * ALPHA_HZ * t).sin()
                + beta * (2.0 * PI * BETA_HZ * t).sin()
                + noise;
            *code = microvolts_to_code(value);
        }
        codes
    }

    fn telemetry_payload(&mut self, k: u64) -> Vec<u8> {
        // Slow discharge, one raw step per telemetry packet.
        self.battery_raw = self.battery_raw.saturating_sub(1);
        let seq = (k / self.profile.telemetry_every.max(1)) as u16;
        let mut payload = Vec::with_capacity(10);
        payload.extend_from_slice(&seq.to_be_bytes());
        payload.extend_from_slice(&self.battery_raw.to_be_bytes());
        payload.extend_from_slice(&1800u16.to_be_bytes());
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&30u16.to_be_bytes());
        payload
    }
}

impl NotificationSource for SimulatedHeadset {
    fn next_notification(&mut self) -> Result<Option<Notification>, PipelineError> {
        Ok(self.pending.pop_front())
    }
}
