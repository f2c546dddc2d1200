use std::collections::BTreeMap;

use log::{debug, warn};

use crate::drivers::clock::SampleClock;
use crate::drivers::packet::{DecodedPacket, SAMPLES_PER_PACKET};
use crate::types::Channel;

/// How the device counter moved between two completed cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterStep {
    /// Exactly one packet later (including the 65535 -> 0 wrap).
    Next,
    /// `dropped` packets never arrived; their sample range is skipped.
    Gap { dropped: u16 },
    /// Same counter as the previous cycle; the cycle is discarded.
    Duplicate,
    /// Counter moved backwards; the stale cycle is discarded and the
    /// reference counter stays where it was.
    Reordered,
}

impl CounterStep {
    pub fn classify(last: u16, current: u16) -> Self {
        match current.wrapping_sub(last) {
            1 => CounterStep::Next,
            0 => CounterStep::Duplicate,
            delta if delta > 0x8000 => CounterStep::Reordered,
            delta => CounterStep::Gap { dropped: delta - 1 },
        }
    }
}

/// One completed reception cycle.
#[derive(Clone, Debug)]
pub struct AlignedFrame {
    /// Samples for every primary channel; slots that did not report this cycle are zero-filled.
    pub samples_by_channel: BTreeMap<Channel, [f64; SAMPLES_PER_PACKET]>,
    /// Auxiliary slot, if it reported this cycle.
    pub aux: Option<[f64; SAMPLES_PER_PACKET]>,
    /// Logical index of the first sample of this frame.
    pub frame_sample_index: u64,
    /// Clock-corrected wall-clock time of each sample.
    pub timestamps: [f64; SAMPLES_PER_PACKET],
    pub device_counter: u16,
    pub step: CounterStep,
    pub missing_channels: Vec<Channel>,
}

#[derive(Clone, Debug)]
struct PendingPacket {
    samples: [f64; SAMPLES_PER_PACKET],
    arrival: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub frames_emitted: u64,
    pub gaps_detected: u64,
    pub packets_dropped: u64,
    pub duplicates: u64,
    pub reordered: u64,
}

/// Multiplexes per-channel packets into aligned frames and keeps the logical
/// sample timeline consistent with the device counter.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    slots: [Option<PendingPacket>; 5],
    last_counter: Option<u16>,
    running_sample_index: u64,
    stats: AssemblerStats,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn running_sample_index(&self) -> u64 {
        self.running_sample_index
    }

    pub fn last_counter(&self) -> Option<u16> {
        self.last_counter
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Store one decoded packet; returns a frame when it completes a fresh cycle.
    ///
    /// Duplicate and stale cycles are counted and dropped without touching
    /// the sample timeline or the clock.
    pub fn push(
        &mut self,
        packet: DecodedPacket,
        arrival: f64,
        clock: &mut SampleClock,
    ) -> Option<AlignedFrame> {
        let slot = &mut self.slots[packet.channel.slot()];
        if slot.is_some() {
            debug!(
                "{} reported twice within one cycle; keeping the newer packet",
                packet.channel
            );
        }
        *slot = Some(PendingPacket {
            samples: packet.samples,
            arrival,
        });
        if packet.channel != Channel::CYCLE_TRIGGER {
            return None;
        }
        self.complete_cycle(packet.device_counter, clock)
    }

    fn complete_cycle(&mut self, counter: u16, clock: &mut SampleClock) -> Option<AlignedFrame> {
        let last = self.last_counter.unwrap_or_else(|| counter.wrapping_sub(1));
        let step = CounterStep::classify(last, counter);
        match step {
            CounterStep::Next => {}
            CounterStep::Gap { dropped } => {
                warn!("missing packets between counter {last} and {counter} ({dropped} dropped)");
                self.stats.gaps_detected += 1;
                self.stats.packets_dropped += u64::from(dropped);
                self.running_sample_index += SAMPLES_PER_PACKET as u64 * u64::from(dropped);
            }
            CounterStep::Duplicate => {
                warn!("duplicate packet counter {counter}; cycle discarded");
                self.stats.duplicates += 1;
                self.discard_slots();
                return None;
            }
            CounterStep::Reordered => {
                warn!("stale packet counter {counter} after {last}; cycle discarded");
                self.stats.reordered += 1;
                self.discard_slots();
                return None;
            }
        }
        self.last_counter = Some(counter);

        let first_index = self.running_sample_index;
        let last_index = first_index + SAMPLES_PER_PACKET as u64 - 1;
        self.running_sample_index += SAMPLES_PER_PACKET as u64;

        let timestamps = clock.packet_timestamps(first_index);
        let earliest = self
            .slots
            .iter()
            .flatten()
            .map(|p| p.arrival)
            .fold(f64::INFINITY, f64::min);
        if earliest.is_finite() {
            clock.update(last_index, earliest);
        }

        let mut samples_by_channel = BTreeMap::new();
        let mut missing_channels = Vec::new();
        for ch in Channel::PRIMARY {
            let samples = match self.slots[ch.slot()].take() {
                Some(p) => p.samples,
                None => {
                    missing_channels.push(ch);
                    [0.0; SAMPLES_PER_PACKET]
                }
            };
            samples_by_channel.insert(ch, samples);
        }
        let aux = self.slots[Channel::Aux.slot()].take().map(|p| p.samples);
        if !missing_channels.is_empty() {
            debug!("cycle {counter} completed without {missing_channels:?}");
        }
        self.stats.frames_emitted += 1;
        debug!("cycle {counter} -> samples {first_index}..={last_index}");
        Some(AlignedFrame {
            samples_by_channel,
            aux,
            frame_sample_index: first_index,
            timestamps,
            device_counter: counter,
            step,
            missing_channels,
        })
    }

    fn discard_slots(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn packet(channel: Channel, counter: u16, value: f64) -> DecodedPacket {
        DecodedPacket {
            channel,
            device_counter: counter,
            samples: [value; SAMPLES_PER_PACKET],
        }
    }

    fn try_cycle(
        asm: &mut FrameAssembler,
        clock: &mut SampleClock,
        counter: u16,
        arrival: f64,
    ) -> Option<AlignedFrame> {
        let mut frame = None;
        for (i, ch) in Channel::ARRIVAL_ORDER.iter().enumerate() {
            frame = asm.push(packet(*ch, counter, ch.slot() as f64), arrival + i as f64 * 1e-3, clock);
        }
        frame
    }

    fn run_cycle(
        asm: &mut FrameAssembler,
        clock: &mut SampleClock,
        counter: u16,
        arrival: f64,
    ) -> AlignedFrame {
        try_cycle(asm, clock, counter, arrival).expect("trigger channel completes the cycle")
    }

    #[test]
    fn only_trigger_channel_completes_cycle() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        assert!(asm.push(packet(Channel::Aux, 1, 0.0), 0.0, &mut clock).is_none());
        assert!(asm.push(packet(Channel::Tp9, 1, 0.0), 0.0, &mut clock).is_none());
        assert!(asm.push(packet(Channel::Af7, 1, 0.0), 0.0, &mut clock).is_some());
    }

    #[test]
    fn first_cycle_never_reports_a_gap() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        let frame = run_cycle(&mut asm, &mut clock, 4321, 0.0);
        assert_eq!(frame.step, CounterStep::Next);
        assert_eq!(frame.frame_sample_index, 0);
        assert_eq!(asm.running_sample_index(), 12);
        assert_eq!(asm.stats().gaps_detected, 0);
    }

    #[test]
    fn dropped_packet_skips_its_sample_range() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        let f5 = run_cycle(&mut asm, &mut clock, 5, 0.0);
        let f6 = run_cycle(&mut asm, &mut clock, 6, 0.047);
        let before_gap = asm.running_sample_index();
        let f8 = run_cycle(&mut asm, &mut clock, 8, 0.141);
        assert_eq!(f5.frame_sample_index, 0);
        assert_eq!(f6.frame_sample_index, 12);
        assert_eq!(f8.frame_sample_index, 36);
        assert_eq!(f8.step, CounterStep::Gap { dropped: 1 });
        assert_eq!(asm.running_sample_index() - before_gap, 12 * 2);
        assert_eq!(asm.running_sample_index() - f6.frame_sample_index, 12 * 3);
        assert_eq!(asm.stats().packets_dropped, 1);
    }

    #[test]
    fn counter_wrap_is_a_single_step() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        run_cycle(&mut asm, &mut clock, 65535, 0.0);
        let frame = run_cycle(&mut asm, &mut clock, 0, 0.047);
        assert_eq!(frame.step, CounterStep::Next);
        assert_eq!(frame.frame_sample_index, 12);
        assert_eq!(asm.stats().gaps_detected, 0);
    }

    #[test]
    fn classify_covers_every_step() {
        assert_eq!(CounterStep::classify(10, 10), CounterStep::Duplicate);
        assert_eq!(CounterStep::classify(11, 9), CounterStep::Reordered);
        assert_eq!(CounterStep::classify(6, 8), CounterStep::Gap { dropped: 1 });
    }

    #[test]
    fn duplicate_cycle_is_discarded() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        run_cycle(&mut asm, &mut clock, 10, 0.0);
        assert!(try_cycle(&mut asm, &mut clock, 10, 0.05).is_none());
        assert_eq!(asm.running_sample_index(), 12);
        assert_eq!(clock.updates(), 1);
        let next = run_cycle(&mut asm, &mut clock, 11, 0.047);
        assert_eq!(next.step, CounterStep::Next);
        assert_eq!(next.frame_sample_index, 12);
        let stats = asm.stats();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.frames_emitted, 2);
    }

    #[test]
    fn stale_cycle_keeps_the_reference_counter() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        run_cycle(&mut asm, &mut clock, 10, 0.0);
        run_cycle(&mut asm, &mut clock, 11, 0.047);
        assert!(try_cycle(&mut asm, &mut clock, 9, 0.05).is_none());
        assert_eq!(asm.last_counter(), Some(11));
        assert_eq!(asm.running_sample_index(), 24);

        let frame = run_cycle(&mut asm, &mut clock, 12, 0.094);
        assert_eq!(frame.step, CounterStep::Next);
        assert_eq!(frame.frame_sample_index, 24);
        let stats = asm.stats();
        assert_eq!(stats.reordered, 1);
        assert_eq!(stats.gaps_detected, 0);
        assert_eq!(stats.packets_dropped, 0);
        assert_eq!(stats.frames_emitted, 3);
    }

    #[test]
    fn discarded_cycle_leaves_no_slots_behind() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        run_cycle(&mut asm, &mut clock, 3, 0.0);
        assert!(try_cycle(&mut asm, &mut clock, 2, 0.05).is_none());
        asm.push(packet(Channel::Tp9, 4, 7.0), 0.1, &mut clock);
        let frame = asm.push(packet(Channel::Af7, 4, 1.0), 0.1, &mut clock).unwrap();
        assert_eq!(frame.missing_channels, vec![Channel::Af8, Channel::Tp10]);
        assert!(frame.aux.is_none());
    }

    #[test]
    fn frame_carries_samples_per_slot_and_zero_fills_missing() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        asm.push(packet(Channel::Tp10, 1, 3.0), 0.0, &mut clock);
        let frame = asm.push(packet(Channel::Af7, 1, 1.0), 0.0, &mut clock).unwrap();
        assert_eq!(frame.samples_by_channel[&Channel::Tp10], [3.0; 12]);
        assert_eq!(frame.samples_by_channel[&Channel::Af7], [1.0; 12]);
        assert_eq!(frame.samples_by_channel[&Channel::Tp9], [0.0; 12]);
        assert_eq!(frame.missing_channels, vec![Channel::Tp9, Channel::Af8]);
        assert!(frame.aux.is_none());
    }

    #[test]
    fn clock_is_fed_with_the_earliest_arrival() {
        let mut asm = FrameAssembler::new();
        let mut clock = SampleClock::new(0.0);
        let frame = run_cycle(&mut asm, &mut clock, 1, 0.010);
        assert_eq!(clock.updates(), 1);
        assert_eq!(frame.timestamps[0], 0.0);
        // Only the earliest arrival (0.010) pulls the rate: x = 11, y = 0.010.
        let mut reference = SampleClock::new(0.0);
        reference.update(11, 0.010);
        assert_eq!(clock.rate(), reference.rate());
    }

    proptest! {
        #[test]
        fn wrapping_step_is_next(last in any::<u16>()) {
            prop_assert_eq!(CounterStep::classify(last, last.wrapping_add(1)), CounterStep::Next);
        }
    }
}
