use std::collections::VecDeque;

use crate::drivers::PipelineError;
use crate::types::Channel;

/// Copied-out view of the most recent samples of several channels.
#[derive(Clone, Debug)]
pub struct TimeSeriesFrame {
    pub sample_rate_hz: f64,
    pub channels: Vec<Channel>,
    pub samples: Vec<Vec<f64>>, // channels x samples
}
impl TimeSeriesFrame {
    pub fn channel(&self, channel: Channel) -> Option<&[f64]> {
        self.channels
            .iter()
            .position(|c| *c == channel)
            .map(|i| self.samples[i].as_slice())
    }
    /// Sample-wise mean of the listed channels, truncated to the shortest one.
    pub fn average_of(&self, channels: &[Channel]) -> Option<Vec<f64>> {
        let picked: Vec<&[f64]> = channels
            .iter()
            .map(|c| self.channel(*c))
            .collect::<Option<_>>()?;
        let len = picked.iter().map(|s| s.len()).min()?;
        let n = picked.len() as f64;
        Some(
            (0..len)
                .map(|i| picked.iter().map(|s| s[i]).sum::<f64>() / n)
                .collect(),
        )
    }
}
/// Fixed-capacity ring of the newest samples of one channel.
#[derive(Clone, Debug)]
pub struct SampleRing {
    data: VecDeque<f64>,
    capacity: usize,
}
impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }
    pub fn push_slice(&mut self, samples: &[f64]) {
        for &sample in samples {
            if self.data.len() == self.capacity {
                self.data.pop_front();
            }
            self.data.push_back(sample);
        }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }
    /// The newest `count` samples, oldest first.
    pub fn latest(&self, count: usize) -> Vec<f64> {
        let skip = self.data.len().saturating_sub(count);
        self.data.iter().skip(skip).copied().collect()
    }
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
/// Rolling buffer that stores recent samples per channel.
#[derive(Clone, Debug)]
pub struct SignalBuffer {
    per_channel: Vec<SampleRing>,
    channels: Vec<Channel>,
    sample_rate_hz: f64,
}
impl SignalBuffer {
    pub fn with_capacity(
        channels: Vec<Channel>,
        sample_rate_hz: f64,
        capacity: usize,
    ) -> Result<Self, PipelineError> {
        if sample_rate_hz <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "sample rate must be greater than zero".into(),
            ));
        }
        if capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "buffer capacity must be greater than zero".into(),
            ));
        }
        let per_channel = channels.iter().map(|_| SampleRing::new(capacity)).collect();
        Ok(Self {
            per_channel,
            channels,
            sample_rate_hz,
        })
    }
    pub fn push(&mut self, channel: Channel, samples: &[f64]) {
        if let Some(ring) = self.ring_mut(channel) {
            ring.push_slice(samples);
        }
    }
    pub fn ring(&self, channel: Channel) -> Option<&SampleRing> {
        self.channels
            .iter()
            .position(|c| *c == channel)
            .map(|i| &self.per_channel[i])
    }
    fn ring_mut(&mut self, channel: Channel) -> Option<&mut SampleRing> {
        let idx = self.channels.iter().position(|c| *c == channel)?;
        self.per_channel.get_mut(idx)
    }
    /// Smallest occupancy across channels.
    pub fn min_len(&self) -> usize {
        self.per_channel.iter().map(|r| r.len()).min().unwrap_or(0)
    }
    pub fn snapshot(&self, count: usize) -> TimeSeriesFrame {
        TimeSeriesFrame {
            sample_rate_hz: self.sample_rate_hz,
            channels: self.channels.clone(),
            samples: self.per_channel.iter().map(|r| r.latest(count)).collect(),
        }
    }
    pub fn full_frame(&self) -> TimeSeriesFrame {
        let capacity = self.per_channel.first().map(|r| r.capacity()).unwrap_or(0);
        self.snapshot(capacity)
    }
    pub fn clear(&mut self) {
        for ring in &mut self.per_channel {
            ring.clear();
        }
    }
}
