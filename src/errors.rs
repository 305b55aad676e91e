// Error types for busbuddy

use crate::{permissions::Permission, tracking::TrackingState};
use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum BusBuddyError {
    // Errors that abort a Start transition
    #[snafu(display("{permission} permission denied"))]
    PermissionDenied { permission: Permission },
    #[snafu(display("Presence notifier could not be started: {reason}"))]
    ServiceStartFailure { reason: String },
    #[snafu(display("Cannot {operation} while tracking is {state}"))]
    InvalidState {
        operation: &'static str,
        state: TrackingState,
    },
    #[snafu(display("A start is already in progress"))]
    StartPending,
    #[snafu(display("Start was cancelled before it completed"))]
    StartSuperseded,

    // Errors reported by collaborators while a session is running
    #[snafu(display("Position source error: {description}"))]
    PositionError { description: String },
    #[snafu(display("Could not send telemetry event: {reason}"))]
    TelemetrySendFailure { reason: String },
    #[snafu(display("Telemetry channel connection failed: {reason}"))]
    ChannelConnectionError { reason: String },
    #[snafu(display("Presence display error: {reason}"))]
    PresenceError { reason: String },

    // Errors for the fix recorder
    #[snafu(display("Error writing fix recording"))]
    WriterError { source: io::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Process setup errors
    #[snafu(display("Could not install the Ctrl-C handler"))]
    SignalHandlerError { source: ctrlc::Error },

    // Replay errors
    #[snafu(display("Invalid replay file: {path}"))]
    InvalidReplayFile { path: String },
    #[snafu(display("Error loading replay file"))]
    ReplayLoaderError { source: io::Error },
}
