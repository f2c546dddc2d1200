use thiserror::Error;
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed EEG payload: expected {expected} bytes, got {actual}")]
    Decode { expected: usize, actual: usize },
    #[error("telemetry payload too short: need at least 10 bytes, got {actual}")]
    TelemetryTooShort { actual: usize },
    #[error("notification from unmapped source handle {0}")]
    UnknownSource(u16),
    #[error("invalid filter parameters {low_hz}-{high_hz} Hz (order {order}): {reason}")]
    InvalidFilterParameters {
        low_hz: f64,
        high_hz: f64,
        order: usize,
        reason: &'static str,
    },
    #[error("not enough samples buffered: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
impl PipelineError {
    /// Stream-level faults: the offending packet or request is dropped and the
    /// session keeps running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode { .. }
                | PipelineError::TelemetryTooShort { .. }
                | PipelineError::UnknownSource(_)
                | PipelineError::InvalidFilterParameters { .. }
                | PipelineError::InsufficientData { .. }
        )
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn stream_faults_are_recoverable() {
        assert!(PipelineError::Decode { expected: 20, actual: 3 }.is_recoverable());
        assert!(PipelineError::InsufficientData { have: 1, need: 256 }.is_recoverable());
        assert!(!PipelineError::InvalidConfig("window".into()).is_recoverable());
    }
    #[test]
    fn decode_error_names_both_lengths() {
        let msg = PipelineError::Decode { expected: 20, actual: 7 }.to_string();
        assert!(msg.contains("20") && msg.contains('7'));
    }
}
