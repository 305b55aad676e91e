// Library interface for busbuddy
// The binary and the integration tests both drive the tracker through it

pub mod channel;
pub mod config;
pub mod errors;
pub mod permissions;
pub mod presence;
pub mod source;
pub mod tracking;
pub mod writer;

// Re-export commonly used types
pub use channel::{ChannelEvent, ChannelStatus, JsonLinesChannel, MemoryChannel, TelemetryChannel};
pub use config::AppConfig;
pub use errors::BusBuddyError;
pub use permissions::{Permission, PermissionGrantor, PermissionStatus, StaticGrantor};
pub use presence::{LogNotifier, MemoryNotifier, PresenceNotifier};
pub use source::{ManualPositionSource, PositionSource, RawFix, ReplayPositionSource};
pub use tracking::{
    Control, DistanceAccumulator, PositionSample, SessionConfig, SessionSummary, TrackerEvent,
    TrackingSession, TrackingState, run_tracker,
};
