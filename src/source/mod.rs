pub mod manual;
pub mod replay;

use std::{fmt, sync::mpsc::Sender};

use serde::{Deserialize, Serialize};

use crate::{BusBuddyError, tracking::TrackerEvent};

pub use manual::ManualPositionSource;
pub use replay::ReplayPositionSource;

/// Identifies one watch on a position source. Each Start gets a fresh id, so
/// fixes tagged with an older id can be told apart from current ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sampling configuration handed to the position source when a watch begins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    pub high_accuracy: bool,
    pub min_distance_meters: f64,
    pub min_interval_ms: u64,
    pub timeout_ms: u64,
    pub allow_cached: bool,
}

impl WatchConfig {
    /// Every available fix, time-gated at one second rather than distance-gated.
    pub const fn tracking() -> Self {
        Self {
            high_accuracy: true,
            min_distance_meters: 0.,
            min_interval_ms: 1000,
            timeout_ms: 5000,
            allow_cached: false,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::tracking()
    }
}

/// A fix exactly as the platform location provider reports it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
    #[serde(default)]
    pub speed_meters_per_second: Option<f64>,
    #[serde(default)]
    pub heading_degrees: Option<f64>,
}

impl RawFix {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
            speed_meters_per_second: None,
            heading_degrees: None,
        }
    }
}

/// Delivery end of a watch. Every fix sent through it is tagged with the
/// subscription it belongs to.
#[derive(Clone, Debug)]
pub struct FixSink {
    subscription: SubscriptionId,
    sender: Sender<TrackerEvent>,
}

impl FixSink {
    pub fn new(subscription: SubscriptionId, sender: Sender<TrackerEvent>) -> Self {
        Self {
            subscription,
            sender,
        }
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Forwards a fix or a provider error. Returns false once nobody listens anymore.
    pub fn deliver(&self, fix: Result<RawFix, String>) -> bool {
        self.sender
            .send(TrackerEvent::Fix {
                subscription: self.subscription,
                fix,
            })
            .is_ok()
    }

    /// Signals that the source has no more fixes for this watch.
    pub fn finish(&self) -> bool {
        self.sender
            .send(TrackerEvent::SourceFinished {
                subscription: self.subscription,
            })
            .is_ok()
    }
}

/// A device location provider.
///
/// The tracking session calls `watch` when a session starts and `clear_watch`
/// when it stops. Between the two calls the source pushes fixes through the
/// [`FixSink`] at whatever pace the provider delivers them; fixes may still be
/// in flight after `clear_watch` returns, and the session discards those by
/// their subscription id.
pub trait PositionSource {
    /// Begin delivering fixes for the watch identified by `sink.subscription()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot begin sampling.
    fn watch(&mut self, config: &WatchConfig, sink: FixSink) -> Result<(), BusBuddyError>;

    /// Stop delivering fixes for `subscription`. Unknown ids are ignored.
    fn clear_watch(&mut self, subscription: SubscriptionId);
}
