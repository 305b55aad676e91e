use std::{
    fs::OpenOptions,
    io::{self, BufReader, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_jsonlines::{JsonLinesReader, JsonLinesWriter};

use crate::{BusBuddyError, tracking::TelemetryEvent, tracking::TrackerEvent};

use super::{
    ChannelEvent, Credentials, InboundFrame, LocationPayload, OutboundMessage, SessionMetadata,
    TelemetryChannel,
};

/// Where the channel writes its frames.
#[derive(Clone, Debug, PartialEq)]
pub enum Endpoint {
    /// Realtime server at `host:port`; inbound frames are read on a background thread.
    Tcp(String),
    /// Append-only file, for offline runs and capturing what would have been sent.
    File(PathBuf),
}

/// How the channel retries a lost or failed connection.
///
/// Every `connect` makes one attempt. Sends while disconnected make further
/// attempts, at most one per `backoff_ms`, until `max_attempts` failed in a
/// row; then frames are dropped without touching the network until the next
/// explicit `connect`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Upper bound for a single TCP connect
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 1000,
            connect_timeout_ms: 2000,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

type FrameWriter = JsonLinesWriter<Box<dyn Write + Send>>;

/// Telemetry channel speaking newline-delimited JSON frames of the form
/// `{"event": ..., "data": ...}`.
pub struct JsonLinesChannel {
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    inbound: Option<Sender<TrackerEvent>>,
    writer: Option<FrameWriter>,
    stream: Option<TcpStream>,
    reader: Option<JoinHandle<()>>,
    link_up: Arc<AtomicBool>,
    last_attempt: Option<Instant>,
    failed_attempts: u32,
}

impl JsonLinesChannel {
    pub fn new(endpoint: Endpoint, policy: ReconnectPolicy) -> Self {
        Self {
            endpoint,
            policy,
            inbound: None,
            writer: None,
            stream: None,
            reader: None,
            link_up: Arc::new(AtomicBool::new(false)),
            last_attempt: None,
            failed_attempts: 0,
        }
    }

    /// Report connection changes and server frames to `sender`.
    pub fn with_inbound(mut self, sender: Sender<TrackerEvent>) -> Self {
        self.inbound = Some(sender);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn notify(&self, event: ChannelEvent) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(TrackerEvent::Channel(event));
        }
    }

    fn open(&mut self) -> io::Result<()> {
        self.last_attempt = Some(Instant::now());
        match &self.endpoint {
            Endpoint::Tcp(address) => {
                let stream = connect_tcp(address, self.policy.connect_timeout())?;
                stream.set_nodelay(true)?;
                let read_half = stream.try_clone()?;
                self.reader = Some(spawn_reader(
                    read_half,
                    self.link_up.clone(),
                    self.inbound.clone(),
                )?);
                self.writer = Some(JsonLinesWriter::new(Box::new(stream.try_clone()?)));
                self.stream = Some(stream);
            }
            Endpoint::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                self.writer = Some(JsonLinesWriter::new(Box::new(file)));
            }
        }
        self.link_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.link_up.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!("Channel reader thread panicked");
            }
        }
    }

    /// A single connection attempt, reported to the inbound sender either way.
    fn attempt(&mut self) -> io::Result<()> {
        self.close();
        match self.open() {
            Ok(()) => {
                self.failed_attempts = 0;
                info!("Telemetry channel connected to {:?}", self.endpoint);
                self.notify(ChannelEvent::Connected);
                Ok(())
            }
            Err(e) => {
                self.failed_attempts = self.failed_attempts.saturating_add(1);
                self.notify(ChannelEvent::ConnectError {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Reconnect from a send, within the policy's attempt budget and backoff.
    fn try_reconnect(&mut self) -> bool {
        if self.failed_attempts >= self.policy.max_attempts {
            return false;
        }
        let due = self
            .last_attempt
            .is_none_or(|last| last.elapsed() >= self.policy.backoff());
        if !due {
            return false;
        }
        match self.attempt() {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "Telemetry channel reconnect {}/{} failed: {}",
                    self.failed_attempts, self.policy.max_attempts, e
                );
                false
            }
        }
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), BusBuddyError> {
        if !self.is_connected() && !self.try_reconnect() {
            return Err(BusBuddyError::TelemetrySendFailure {
                reason: format!("not connected, dropping {}", message.name()),
            });
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BusBuddyError::TelemetrySendFailure {
                reason: "no writer".to_string(),
            })?;
        let result = writer.write(message).and_then(|_| writer.flush());
        if let Err(e) = result {
            warn!("Telemetry channel write failed: {}", e);
            self.close();
            self.notify(ChannelEvent::Disconnected {
                reason: e.to_string(),
            });
            return Err(BusBuddyError::TelemetrySendFailure {
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

fn connect_tcp(address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let addresses: Vec<SocketAddr> = address.to_socket_addrs()?.collect();
    let mut last_error = io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("no address found for {address}"),
    );
    for socket_address in addresses {
        match TcpStream::connect_timeout(&socket_address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

fn spawn_reader(
    stream: TcpStream,
    link_up: Arc<AtomicBool>,
    inbound: Option<Sender<TrackerEvent>>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("channel-reader".to_string())
        .spawn(move || {
            let frames = JsonLinesReader::new(BufReader::new(stream)).read_all::<InboundFrame>();
            for frame in frames {
                match frame {
                    Ok(frame) => {
                        let name = frame.event.clone();
                        match ChannelEvent::from_frame(frame) {
                            Some(event) => {
                                if let Some(inbound) = &inbound {
                                    let _ = inbound.send(TrackerEvent::Channel(event));
                                }
                            }
                            None => debug!("Ignoring inbound event '{}'", name),
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        warn!("Malformed frame from server: {}", e);
                    }
                    Err(e) => {
                        debug!("Channel read ended: {}", e);
                        break;
                    }
                }
            }
            // only a drop the client did not ask for is reported
            if link_up.swap(false, Ordering::SeqCst) {
                if let Some(inbound) = &inbound {
                    let _ = inbound.send(TrackerEvent::Channel(ChannelEvent::Disconnected {
                        reason: "connection closed by server".to_string(),
                    }));
                }
            }
        })
}

impl TelemetryChannel for JsonLinesChannel {
    fn connect(&mut self) -> Result<(), BusBuddyError> {
        if self.is_connected() {
            return Ok(());
        }
        // an explicit connect renews the reconnect budget
        self.failed_attempts = 0;
        self.attempt().map_err(|e| {
            warn!("Telemetry channel connect to {:?} failed: {}", self.endpoint, e);
            BusBuddyError::ChannelConnectionError {
                reason: e.to_string(),
            }
        })
    }

    fn identify(&mut self, session_id: &str, credentials: &Credentials) -> Result<(), BusBuddyError> {
        debug!("Identifying as driver {} for {}", credentials.driver_id, session_id);
        self.send(&OutboundMessage::identify(credentials))
    }

    fn join_session(&mut self, session_id: &str, metadata: &SessionMetadata) -> Result<(), BusBuddyError> {
        self.send(&OutboundMessage::Join {
            session_id: session_id.to_string(),
            metadata: metadata.clone(),
        })
    }

    fn emit(&mut self, event: &TelemetryEvent) -> Result<(), BusBuddyError> {
        self.send(&OutboundMessage::Location(LocationPayload::from(event)))
    }

    fn disconnect(&mut self) -> Result<(), BusBuddyError> {
        let was_connected = self.is_connected();
        self.close();
        if was_connected {
            info!("Telemetry channel disconnected");
            self.notify(ChannelEvent::Disconnected {
                reason: String::new(),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.link_up.load(Ordering::SeqCst)
    }
}

impl Drop for JsonLinesChannel {
    fn drop(&mut self) {
        self.close();
    }
}
