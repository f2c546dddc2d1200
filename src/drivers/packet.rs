//! Decoders for raw headband notifications.
//!
//! EEG payload (20 bytes): a 16-bit big-endian packet counter followed by
//! twelve 12-bit unsigned codes packed back to back, most significant bit first.
//! Codes are centred at 2048 and scaled to microvolts:
//! `µV = 0.48828125 * (code - 2048)` (12 bits over a 2 mVpp range).
//!
//! Telemetry payload (>= 10 bytes), all big-endian u16:
//! sequence id, battery raw, fuel-gauge raw, 2 unused bytes, temperature raw.
use serde::{Deserialize, Serialize};

use crate::drivers::PipelineError;
use crate::types::Channel;

pub const SAMPLES_PER_PACKET: usize = 12;
pub const SAMPLE_BITS: u32 = 12;
pub const COUNTER_BITS: u32 = 16;
/// 16 + 12 * 12 bits = 160 bits.
pub const EEG_PAYLOAD_LEN: usize = (COUNTER_BITS as usize + SAMPLES_PER_PACKET * SAMPLE_BITS as usize) / 8;
pub const CODE_MIDPOINT: f64 = 2048.0;
pub const MICROVOLTS_PER_CODE: f64 = 0.48828125;
pub const TELEMETRY_MIN_LEN: usize = 10;
/// Extremes of the decoded range, reached at code 0 and code 4095.
pub const MIN_MICROVOLTS: f64 = -CODE_MIDPOINT * MICROVOLTS_PER_CODE;
pub const MAX_MICROVOLTS: f64 = (4095.0 - CODE_MIDPOINT) * MICROVOLTS_PER_CODE;

/// GATT characteristics of the classic firmware and the slot each one feeds.
pub const EEG_CHARACTERISTICS: [(&str, Channel); 5] = [
    ("273e0003-4c4d-454d-96be-f03bac821358", Channel::Tp9),
    ("273e0004-4c4d-454d-96be-f03bac821358", Channel::Af7),
    ("273e0005-4c4d-454d-96be-f03bac821358", Channel::Af8),
    ("273e0006-4c4d-454d-96be-f03bac821358", Channel::Tp10),
    ("273e0007-4c4d-454d-96be-f03bac821358", Channel::Aux),
];
pub const TELEMETRY_CHARACTERISTIC: &str = "273e000b-4c4d-454d-96be-f03bac821358";

/// Map a characteristic UUID (any case) to the EEG slot it carries.
pub fn channel_for_uuid(uuid: &str) -> Option<Channel> {
    EEG_CHARACTERISTICS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(uuid))
        .map(|(_, ch)| *ch)
}

/// MSB-first reader over a byte slice.
///
/// Bits are shifted into an integer accumulator one byte at a time, so fields
/// do not need to be byte aligned.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u64,
    acc_bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            acc_bits: 0,
        }
    }

    pub fn remaining_bits(&self) -> usize {
        (self.data.len() - self.pos) * 8 + self.acc_bits as usize
    }

    /// Read `bits` (1..=32) as an unsigned value, or `None` once the input runs out.
    pub fn read(&mut self, bits: u32) -> Option<u32> {
        debug_assert!((1..=32).contains(&bits));
        while self.acc_bits < bits {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;
            self.acc = (self.acc << 8) | u64::from(byte);
            self.acc_bits += 8;
        }
        let shift = self.acc_bits - bits;
        let value = (self.acc >> shift) & ((1u64 << bits) - 1);
        self.acc_bits = shift;
        self.acc &= (1u64 << shift) - 1;
        Some(value as u32)
    }
}

/// One channel's worth of samples from a single notification.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPacket {
    pub channel: Channel,
    pub device_counter: u16,
    pub samples: [f64; SAMPLES_PER_PACKET],
}

pub fn code_to_microvolts(code: u16) -> f64 {
    MICROVOLTS_PER_CODE * (f64::from(code) - CODE_MIDPOINT)
}

/// Inverse of [`code_to_microvolts`], clamped to the 12-bit code domain.
pub fn microvolts_to_code(value_uv: f64) -> u16 {
    let code = (value_uv / MICROVOLTS_PER_CODE + CODE_MIDPOINT).round();
    code.clamp(0.0, 4095.0) as u16
}

/// Decode a 20-byte EEG notification.
pub fn decode_eeg(channel: Channel, payload: &[u8]) -> Result<DecodedPacket, PipelineError> {
    if payload.len() != EEG_PAYLOAD_LEN {
        return Err(PipelineError::Decode {
            expected: EEG_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }
    let mut reader = BitReader::new(payload);
    let truncated = || PipelineError::Decode {
        expected: EEG_PAYLOAD_LEN,
        actual: payload.len(),
    };
    let device_counter = reader.read(COUNTER_BITS).ok_or_else(truncated)? as u16;
    let mut samples = [0.0; SAMPLES_PER_PACKET];
    for slot in samples.iter_mut() {
        let code = reader.read(SAMPLE_BITS).ok_or_else(truncated)? as u16;
        *slot = code_to_microvolts(code);
    }
    Ok(DecodedPacket {
        channel,
        device_counter,
        samples,
    })
}

/// Pack a counter and twelve codes into the wire layout `decode_eeg` reads.
pub fn encode_eeg(device_counter: u16, codes: &[u16; SAMPLES_PER_PACKET]) -> [u8; EEG_PAYLOAD_LEN] {
    let mut out = [0u8; EEG_PAYLOAD_LEN];
    out[0..2].copy_from_slice(&device_counter.to_be_bytes());
    let mut acc: u32 = 0;
    let mut acc_bits = 0u32;
    let mut pos = 2;
    for &code in codes {
        acc = (acc << SAMPLE_BITS) | u32::from(code & 0x0FFF);
        acc_bits += SAMPLE_BITS;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out[pos] = (acc >> acc_bits) as u8;
            pos += 1;
        }
        acc &= (1 << acc_bits) - 1;
    }
    out
}

/// Battery and housekeeping telemetry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub sequence_id: u16,
    pub battery_percent: f64,
    pub fuel_gauge_mv: f64,
    pub temperature_raw: u16,
}

pub fn decode_telemetry(payload: &[u8]) -> Result<TelemetryData, PipelineError> {
    if payload.len() < TELEMETRY_MIN_LEN {
        return Err(PipelineError::TelemetryTooShort {
            actual: payload.len(),
        });
    }
    let be = |offset: usize| u16::from_be_bytes([payload[offset], payload[offset + 1]]);
    Ok(TelemetryData {
        sequence_id: be(0),
        battery_percent: f64::from(be(2)) / 512.0 * 100.0,
        fuel_gauge_mv: f64::from(be(4)) * 2.2,
        temperature_raw: be(8),
    })
}
