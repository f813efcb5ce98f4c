// Adaptive bitrate streaming control loop
pub mod buffer;
pub mod config;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod network;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod telemetry;

// Export common types for ease of use
pub use buffer::{BufferHealth, BufferModel, BufferedRange};
pub use config::{AbrConfig, STARVATION_THRESHOLD_SECONDS};
pub use error::{AbrError, Result};
pub use fetch::{
    FaultPolicy, FetchAttempt, FetchState, FetchedSegment, RetryNotice, SegmentFetcher,
    SegmentTransport, SimulatedTransport,
};
pub use manifest::{
    DirectoryPlaylists, InMemoryPlaylists, LadderLoad, MasterManifest, PlaylistResolver,
    QualityId, QualityLadder, QualityLevel, Resolution, SegmentRef, parse_master_manifest,
    parse_media_playlist,
};
pub use network::{
    MeasuredEstimator, NetworkCondition, NetworkEstimator, NetworkTier, SimulatedEstimator,
    StaticEstimator, TransferObserver, TransferSample,
};
pub use scheduler::{IntervalTicks, ManualTicks, Tick, TickSender, TickSource};
pub use selector::{QualitySelector, QualitySwitch, SelectionState, SwitchReason};
pub use session::{
    PlaybackPosition, PlaybackProbe, PlaybackSession, SessionEvent, SessionHandle,
    SessionSnapshot, SharedPlayback,
};
pub use telemetry::{LogEntry, PlayerMetrics, RingBuffer, Severity, TelemetrySink};
