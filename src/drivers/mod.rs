// src/drivers/mod.rs
// One file per processing stage
pub mod analyzer;
pub mod assembler;
pub mod buffer;
pub mod clock;
pub mod error;
pub mod fft;
pub mod filter;
pub mod metrics;
pub mod packet;
pub mod pipeline;
pub mod source;
// Re-export the types callers need most often
pub use analyzer::{relative_powers, BandPowers, HemispherePowers, SpectralAnalyzer};
pub use assembler::{AlignedFrame, AssemblerStats, CounterStep, FrameAssembler};
pub use buffer::{SampleRing, SignalBuffer, TimeSeriesFrame};
pub use clock::{SampleClock, NOMINAL_SAMPLE_RATE_HZ};
pub use error::PipelineError;
pub use fft::{PowerSpectrum, SpectrumBuilder};
pub use filter::{BandpassDesign, ChannelFilter};
pub use metrics::{
    classify_contact, focus_score, lateral_bias, log_scale_percent, DerivedMetrics, MetricDeriver,
};
pub use packet::{
    decode_eeg, decode_telemetry, encode_eeg, DecodedPacket, TelemetryData, EEG_PAYLOAD_LEN,
    SAMPLES_PER_PACKET,
};
pub use pipeline::{ConsumerTick, Session, SessionStats};
pub use source::{ManualSource, Notification, NotificationSource, SourceKind, TELEMETRY_HANDLE};
