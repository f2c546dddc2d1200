// src/types.rs
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::drivers::{ConsumerTick, Notification, TelemetryData};

/// Electrode slot on the headband.
///
/// Handles follow the GATT table of the classic firmware: 32, 35, 38, 41, 44.
/// The slot index is `(handle - 32) / 3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    Tp9,
    Af7,
    Af8,
    Tp10,
    Aux,
}

impl Channel {
    /// Every slot that takes part in a reception cycle.
    pub const ALL: [Channel; 5] = [
        Channel::Tp9,
        Channel::Af7,
        Channel::Af8,
        Channel::Tp10,
        Channel::Aux,
    ];
    /// Slots streamed to consumers.
    pub const PRIMARY: [Channel; 4] = [Channel::Tp9, Channel::Af7, Channel::Af8, Channel::Tp10];
    pub const LEFT: [Channel; 2] = [Channel::Tp9, Channel::Af7];
    pub const RIGHT: [Channel; 2] = [Channel::Af8, Channel::Tp10];
    /// The headset notifies in the order 44, 41, 38, 32, 35.
    pub const ARRIVAL_ORDER: [Channel; 5] = [
        Channel::Aux,
        Channel::Tp10,
        Channel::Af8,
        Channel::Tp9,
        Channel::Af7,
    ];
    /// Receipt of this slot closes the cycle.
    pub const CYCLE_TRIGGER: Channel = Channel::Af7;

    pub fn handle(self) -> u16 {
        32 + 3 * self.slot() as u16
    }

    pub fn slot(self) -> usize {
        match self {
            Channel::Tp9 => 0,
            Channel::Af7 => 1,
            Channel::Af8 => 2,
            Channel::Tp10 => 3,
            Channel::Aux => 4,
        }
    }

    pub fn from_handle(handle: u16) -> Option<Self> {
        if handle < 32 || (handle - 32) % 3 != 0 {
            return None;
        }
        Self::ALL.get(usize::from((handle - 32) / 3)).copied()
    }

    pub fn is_primary(self) -> bool {
        self != Channel::Aux
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Tp9 => "TP9",
            Channel::Af7 => "AF7",
            Channel::Af8 => "AF8",
            Channel::Tp10 => "TP10",
            Channel::Aux => "AUX",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Channel::Tp9 => "Left Ear (TP9)",
            Channel::Af7 => "Left Forehead (AF7)",
            Channel::Af8 => "Right Forehead (AF8)",
            Channel::Tp10 => "Right Ear (TP10)",
            Channel::Aux => "Right Aux",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Electrode-skin contact classification derived from raw signal spread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    Good,
    Fair,
    Poor,
}

// Connection mode
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ConnectionMode {
    /// Packets come from the built-in synthetic headset.
    Simulation,
    /// Packets are pushed in by an external transport through `EngineCommand::Notify`.
    External,
}

/// Commands accepted by the processing thread.
#[derive(Clone, Debug)]
pub enum EngineCommand {
    Connect(ConnectionMode),
    Disconnect,
    StartStream,
    StopStream,
    ConfigureFilter(FilterConfig),
    SetFilterEnabled(bool),
    Notify(Notification),
    Shutdown,
}

/// Messages emitted by the processing thread.
#[derive(Clone, Debug)]
pub enum EngineMessage {
    Log(String),
    Status(bool),
    Streaming(bool),
    Telemetry(TelemetryData),
    Tick(Box<ConsumerTick>),
}
