use crate::{BusBuddyError, tracking::TelemetryEvent};

use super::{Credentials, LocationPayload, OutboundMessage, SessionMetadata, TelemetryChannel};

/// Channel keeping every frame in memory, with switches to make calls fail.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    pub fail_connect: bool,
    pub fail_emit: bool,
    connected: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    sent: Vec<OutboundMessage>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel that is already up, as if connected earlier in the process.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> &[OutboundMessage] {
        &self.sent
    }

    /// Location payloads sent so far, oldest first.
    pub fn locations(&self) -> Vec<&LocationPayload> {
        self.sent
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::Location(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls
    }

    /// Simulate the transport dropping.
    pub fn drop_connection(&mut self) {
        self.connected = false;
    }

    fn record(&mut self, message: OutboundMessage) -> Result<(), BusBuddyError> {
        if !self.connected {
            return Err(BusBuddyError::TelemetrySendFailure {
                reason: format!("not connected, dropping {}", message.name()),
            });
        }
        self.sent.push(message);
        Ok(())
    }
}

impl TelemetryChannel for MemoryChannel {
    fn connect(&mut self) -> Result<(), BusBuddyError> {
        self.connect_calls += 1;
        if self.fail_connect {
            return Err(BusBuddyError::ChannelConnectionError {
                reason: "connection refused".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn identify(&mut self, _session_id: &str, credentials: &Credentials) -> Result<(), BusBuddyError> {
        self.record(OutboundMessage::identify(credentials))
    }

    fn join_session(&mut self, session_id: &str, metadata: &SessionMetadata) -> Result<(), BusBuddyError> {
        self.record(OutboundMessage::Join {
            session_id: session_id.to_string(),
            metadata: metadata.clone(),
        })
    }

    fn emit(&mut self, event: &TelemetryEvent) -> Result<(), BusBuddyError> {
        if self.fail_emit {
            return Err(BusBuddyError::TelemetrySendFailure {
                reason: "emit rejected".to_string(),
            });
        }
        self.record(OutboundMessage::Location(LocationPayload::from(event)))
    }

    fn disconnect(&mut self) -> Result<(), BusBuddyError> {
        self.disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
