pub mod distance;
pub mod runtime;
pub mod session;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::RawFix;

pub use distance::{DistanceAccumulator, haversine_km, path_distance_km};
pub use runtime::{Control, RuntimeOptions, TrackerEvent, run_tracker};
pub use session::{SessionConfig, StartTicket, TrackingSession};

const MPS_TO_KMH: f64 = 3.6;

/// A single location fix as stored by the tracking session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Horizontal accuracy in meters, when the provider reports one
    pub accuracy_m: Option<f64>,
    /// Ground speed in km/h, never negative
    pub speed_kmh: f64,
    /// Course over ground in degrees, when the provider reports one
    pub heading_deg: Option<f64>,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            speed_kmh: 0.,
            heading_deg: None,
        }
    }
}

impl From<RawFix> for PositionSample {
    fn from(fix: RawFix) -> Self {
        let speed_kmh = fix
            .speed_meters_per_second
            .map(|mps| mps * MPS_TO_KMH)
            .filter(|kmh| kmh.is_finite() && *kmh > 0.)
            .unwrap_or(0.);

        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_m: fix.accuracy_meters,
            speed_kmh,
            heading_deg: fix.heading_degrees.filter(|h| h.is_finite()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackingState {
    #[default]
    Idle,
    Active,
    Paused,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingState::Idle => write!(f, "idle"),
            TrackingState::Active => write!(f, "active"),
            TrackingState::Paused => write!(f, "paused"),
        }
    }
}

/// Per-session bookkeeping, reset on every Start and Stop.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub started_at: Option<DateTime<Utc>>,
    pub distance: DistanceAccumulator,
    pub last_position: Option<PositionSample>,
    pub samples_received: u64,
    pub telemetry_sent: u64,
    pub telemetry_dropped: u64,
}

impl SessionStats {
    pub fn begin(&mut self, now: DateTime<Utc>) {
        *self = Self {
            started_at: Some(now),
            ..Self::default()
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total_distance_km(&self) -> f64 {
        self.distance.total_km()
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.started_at
            .map(|started| (now - started).num_seconds().max(0))
            .unwrap_or(0)
    }

    pub fn current_speed_kmh(&self) -> f64 {
        self.last_position.map(|p| p.speed_kmh).unwrap_or(0.)
    }
}

/// What Stop hands back to the caller once a session has ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: i64,
    pub total_distance_km: f64,
    pub samples_received: u64,
    pub telemetry_sent: u64,
    pub telemetry_dropped: u64,
}

/// Outbound position update for the realtime server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub session_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub heading_degrees: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn from_sample(session_id: &str, sample: &PositionSample, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            speed_kmh: sample.speed_kmh,
            heading_degrees: sample.heading_deg.unwrap_or(0.),
            timestamp,
        }
    }
}
