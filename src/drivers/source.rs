use std::collections::VecDeque;

use crate::drivers::PipelineError;
use crate::types::Channel;

/// GATT handle of the telemetry characteristic.
pub const TELEMETRY_HANDLE: u16 = 0x001a;

/// What a notification carries, resolved from its handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Eeg(Channel),
    Telemetry,
}

/// Single raw notification as delivered by the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub handle: u16,
    pub payload: Vec<u8>,
    /// Wall-clock receipt time in seconds.
    pub arrival: f64,
}

impl Notification {
    pub fn eeg(channel: Channel, payload: impl Into<Vec<u8>>, arrival: f64) -> Self {
        Self {
            handle: channel.handle(),
            payload: payload.into(),
            arrival,
        }
    }

    pub fn telemetry(payload: impl Into<Vec<u8>>, arrival: f64) -> Self {
        Self {
            handle: TELEMETRY_HANDLE,
            payload: payload.into(),
            arrival,
        }
    }

    pub fn source(&self) -> Result<SourceKind, PipelineError> {
        if self.handle == TELEMETRY_HANDLE {
            return Ok(SourceKind::Telemetry);
        }
        Channel::from_handle(self.handle)
            .map(SourceKind::Eeg)
            .ok_or(PipelineError::UnknownSource(self.handle))
    }
}

/// Trait representing something that can yield notifications on demand.
pub trait NotificationSource {
    /// `Ok(None)` means nothing is pending right now.
    fn next_notification(&mut self) -> Result<Option<Notification>, PipelineError>;
}

/// In-memory source useful for tests and deterministic playback.
#[derive(Debug, Default)]
pub struct ManualSource {
    queue: VecDeque<Notification>,
}

impl ManualSource {
    pub fn new(notifications: impl IntoIterator<Item = Notification>) -> Self {
        Self {
            queue: notifications.into_iter().collect(),
        }
    }

    pub fn push(&mut self, notification: Notification) {
        self.queue.push_back(notification);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl NotificationSource for ManualSource {
    fn next_notification(&mut self) -> Result<Option<Notification>, PipelineError> {
        Ok(self.queue.pop_front())
    }
}
