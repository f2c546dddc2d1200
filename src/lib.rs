//! Streaming EEG pipeline for four-channel BLE headbands.
//!
//! Raw GATT notifications are decoded, multiplexed into aligned frames on a
//! drift-corrected clock, optionally band-pass filtered, and reduced to band
//! powers plus a focus score, a lateral bias and per-channel contact quality.
pub mod config;
pub mod drivers;
pub mod engine;
pub mod sim;
pub mod types;

pub use config::PipelineConfig;
pub use drivers::{ConsumerTick, Notification, PipelineError, Session};
pub use types::{Channel, ConnectionMode, EngineCommand, EngineMessage, Quality};
