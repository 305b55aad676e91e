pub mod jsonlines;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BusBuddyError, tracking::TelemetryEvent};

pub use jsonlines::{Endpoint, JsonLinesChannel, ReconnectPolicy};
pub use memory::MemoryChannel;

/// Who the client is when identifying to the realtime server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub driver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Extra information attached to `driver:join`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub session_id: String,
    pub location: Coordinates,
    pub speed_kmh: f64,
    pub heading_degrees: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&TelemetryEvent> for LocationPayload {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
            session_id: event.session_id.clone(),
            location: Coordinates {
                lat: event.latitude,
                lon: event.longitude,
            },
            speed_kmh: event.speed_kmh,
            heading_degrees: event.heading_degrees,
            timestamp: event.timestamp,
        }
    }
}

/// Messages the client sends, one JSON object per line:
/// `{"event": "<name>", "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "identify")]
    Identify {
        #[serde(rename = "type")]
        client_type: String,
        credentials: Credentials,
    },
    #[serde(rename = "driver:join")]
    Join {
        #[serde(rename = "sessionId")]
        session_id: String,
        metadata: SessionMetadata,
    },
    #[serde(rename = "driver:location")]
    Location(LocationPayload),
}

impl OutboundMessage {
    pub fn identify(credentials: &Credentials) -> Self {
        OutboundMessage::Identify {
            client_type: "driver".to_string(),
            credentials: credentials.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutboundMessage::Identify { .. } => "identify",
            OutboundMessage::Join { .. } => "driver:join",
            OutboundMessage::Location(_) => "driver:location",
        }
    }
}

/// Raw inbound line before it is mapped onto a [`ChannelEvent`].
#[derive(Clone, Debug, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Something the channel reports asynchronously.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { reason: String },
    IdentifySuccess,
    IdentifyError { message: String },
    Joined { session_id: Option<String> },
    DriverError { message: String },
}

impl ChannelEvent {
    /// Maps a server frame onto an event. Unknown event names yield `None`.
    pub fn from_frame(frame: InboundFrame) -> Option<Self> {
        let message = || {
            frame
                .data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| frame.data.as_str().map(str::to_string))
                .unwrap_or_default()
        };

        let event = match frame.event.as_str() {
            "connect" => ChannelEvent::Connected,
            "disconnect" => ChannelEvent::Disconnected { reason: message() },
            "connect_error" => ChannelEvent::ConnectError { reason: message() },
            "identify:success" => ChannelEvent::IdentifySuccess,
            "identify:error" => ChannelEvent::IdentifyError { message: message() },
            "driver:joined" => ChannelEvent::Joined {
                session_id: frame
                    .data
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "driver:error" => ChannelEvent::DriverError { message: message() },
            _ => return None,
        };
        Some(event)
    }
}

/// What the session exposes about the channel for display.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub connected: bool,
    pub identified: bool,
    pub joined_session: Option<String>,
    pub last_error: Option<String>,
}

impl ChannelStatus {
    pub fn apply(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.connected = true;
                self.last_error = None;
            }
            ChannelEvent::Disconnected { reason } => {
                self.connected = false;
                self.identified = false;
                self.joined_session = None;
                if !reason.is_empty() {
                    self.last_error = Some(reason.clone());
                }
            }
            ChannelEvent::ConnectError { reason } => {
                self.connected = false;
                self.last_error = Some(reason.clone());
            }
            ChannelEvent::IdentifySuccess => self.identified = true,
            ChannelEvent::IdentifyError { message } => {
                self.identified = false;
                self.last_error = Some(message.clone());
            }
            ChannelEvent::Joined { session_id } => {
                if session_id.is_some() {
                    self.joined_session = session_id.clone();
                }
            }
            ChannelEvent::DriverError { message } => self.last_error = Some(message.clone()),
        }
    }
}

/// Realtime duplex connection to the tracking server.
///
/// The connection is process-scoped: it outlives individual tracking sessions,
/// and reconnection policy is the implementation's own business. Asynchronous
/// notifications (server acknowledgements, drops) are reported as
/// [`ChannelEvent`]s through whatever event sink the implementation was built
/// with.
pub trait TelemetryChannel {
    /// Establish the connection.
    ///
    /// # Errors
    ///
    /// Returns `ChannelConnectionError` if the server cannot be reached.
    fn connect(&mut self) -> Result<(), BusBuddyError>;

    /// Announce the client as a driver.
    fn identify(&mut self, session_id: &str, credentials: &Credentials) -> Result<(), BusBuddyError>;

    /// Join the server-side session position updates are published to.
    fn join_session(&mut self, session_id: &str, metadata: &SessionMetadata) -> Result<(), BusBuddyError>;

    /// Fire-and-forget position update.
    ///
    /// # Errors
    ///
    /// Returns `TelemetrySendFailure` if the event could not be handed to the
    /// transport. Nothing is queued for retry.
    fn emit(&mut self, event: &TelemetryEvent) -> Result<(), BusBuddyError>;

    fn disconnect(&mut self) -> Result<(), BusBuddyError>;

    fn is_connected(&self) -> bool;
}
