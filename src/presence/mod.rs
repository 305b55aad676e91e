pub mod notifiers;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::BusBuddyError;

pub use notifiers::{LogNotifier, MemoryNotifier};

const ACTIVE_TITLE: &str = "🚍 BusBuddy - Live Tracking";
const PAUSED_TITLE: &str = "⏸️ BusBuddy - Tracking Paused";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PresenceConfig {
    pub channel_id: String,
    pub channel_name: String,
    pub notification_id: i32,
    /// How often the display is re-issued while a session is running
    pub reappear_interval_secs: u64,
    /// Minimum age of the display before a new fix refreshes it
    pub refresh_interval_secs: u64,
    /// A display shown within this window counts as recently updated
    pub recent_update_window_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            channel_id: "live_tracking".to_string(),
            channel_name: "Live Location Tracking".to_string(),
            notification_id: 144,
            reappear_interval_secs: 10,
            refresh_interval_secs: 5,
            recent_update_window_secs: 15,
        }
    }
}

/// Static description of the channel the display is posted on.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub priority: PresencePriority,
    pub vibration: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresencePriority {
    Low,
    Default,
    High,
}

/// The button offered next to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceAction {
    Pause,
    Resume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceDisplay {
    pub channel_id: String,
    pub notification_id: i32,
    pub title: String,
    pub body: String,
    pub priority: PresencePriority,
    pub dismissible: bool,
    pub paused: bool,
    pub action: PresenceAction,
}

impl PresenceDisplay {
    pub fn active(
        config: &PresenceConfig,
        elapsed_minutes: i64,
        distance_km: f64,
        speed_kmh: f64,
    ) -> Self {
        Self {
            channel_id: config.channel_id.clone(),
            notification_id: config.notification_id,
            title: ACTIVE_TITLE.to_string(),
            body: format!("{elapsed_minutes} min • {distance_km:.2} km • {speed_kmh:.0} km/h"),
            priority: PresencePriority::High,
            dismissible: false,
            paused: false,
            action: PresenceAction::Pause,
        }
    }

    pub fn paused(config: &PresenceConfig, distance_km: f64) -> Self {
        Self {
            channel_id: config.channel_id.clone(),
            notification_id: config.notification_id,
            title: PAUSED_TITLE.to_string(),
            body: format!("Tracking paused | {distance_km:.2} km tracked"),
            priority: PresencePriority::High,
            dismissible: false,
            paused: true,
            action: PresenceAction::Resume,
        }
    }
}

/// The platform's persistent status indicator (a foreground-service
/// notification on mobile), which keeps the process alive and visible while a
/// session runs.
///
/// There is one display slot; `show` creates it or replaces its content.
pub trait PresenceNotifier {
    /// Prepare the channel the display is posted on. Must be safe to call repeatedly.
    fn ensure_channel(&mut self, channel: &PresenceChannel) -> Result<(), BusBuddyError>;

    /// Create or update the non-dismissible display.
    fn show(&mut self, display: &PresenceDisplay) -> Result<(), BusBuddyError>;

    /// Remove the display.
    fn hide(&mut self) -> Result<(), BusBuddyError>;
}

/// Owns the notifier for a tracking session and decides when to re-issue
/// the display. Only `start` reports failures; later calls log and carry on.
pub struct PresenceKeeper<N> {
    notifier: N,
    config: PresenceConfig,
    channel_ready: bool,
    showing: bool,
    last_update: Option<DateTime<Utc>>,
    last_reappear: Option<DateTime<Utc>>,
}

impl<N: PresenceNotifier> PresenceKeeper<N> {
    pub fn new(notifier: N, config: PresenceConfig) -> Self {
        Self {
            notifier,
            config,
            channel_ready: false,
            showing: false,
            last_update: None,
            last_reappear: None,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn is_showing(&self) -> bool {
        self.showing
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    fn channel(&self) -> PresenceChannel {
        PresenceChannel {
            id: self.config.channel_id.clone(),
            name: self.config.channel_name.clone(),
            description: "Shows persistent notification while tracking your location".to_string(),
            priority: PresencePriority::High,
            vibration: false,
        }
    }

    /// Bring the display up for a new session.
    pub fn start(&mut self, display: &PresenceDisplay, now: DateTime<Utc>) -> Result<(), BusBuddyError> {
        if !self.channel_ready {
            let channel = self.channel();
            self.notifier
                .ensure_channel(&channel)
                .map_err(|e| BusBuddyError::ServiceStartFailure {
                    reason: e.to_string(),
                })?;
            self.channel_ready = true;
        }

        self.notifier
            .show(display)
            .map_err(|e| BusBuddyError::ServiceStartFailure {
                reason: e.to_string(),
            })?;
        self.showing = true;
        self.last_update = Some(now);
        self.last_reappear = Some(now);
        Ok(())
    }

    /// Re-issue the display. Returns whether the notifier accepted it.
    pub fn update(&mut self, display: &PresenceDisplay, now: DateTime<Utc>) -> bool {
        if !self.showing {
            return false;
        }
        match self.notifier.show(display) {
            Ok(()) => {
                self.last_update = Some(now);
                true
            }
            Err(e) => {
                warn!("Failed to update presence display: {}", e);
                false
            }
        }
    }

    /// Refresh the display when the last update is older than the refresh interval.
    pub fn refresh_if_stale(&mut self, display: &PresenceDisplay, now: DateTime<Utc>) -> bool {
        let stale = self
            .last_update
            .is_none_or(|last| now - last >= secs(self.config.refresh_interval_secs));
        if self.showing && stale {
            self.update(display, now)
        } else {
            false
        }
    }

    pub fn reappear_due(&self, now: DateTime<Utc>) -> bool {
        self.showing
            && self
                .last_reappear
                .is_none_or(|last| now - last >= secs(self.config.reappear_interval_secs))
    }

    /// Periodic re-issue guarding against the platform dropping the display.
    pub fn reappear(&mut self, display: &PresenceDisplay, now: DateTime<Utc>) -> bool {
        self.last_reappear = Some(now);
        let shown = self.update(display, now);
        if shown {
            debug!("Presence reappear check - ensured visible");
        }
        shown
    }

    pub fn was_recently_updated(&self, now: DateTime<Utc>) -> bool {
        self.last_update
            .is_some_and(|last| now - last < secs(self.config.recent_update_window_secs))
    }

    /// Remove the display. Returns whether the notifier accepted the request.
    pub fn stop(&mut self) -> bool {
        self.showing = false;
        self.last_update = None;
        self.last_reappear = None;
        match self.notifier.hide() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove presence display: {}", e);
                false
            }
        }
    }
}

fn secs(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}
