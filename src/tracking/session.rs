use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    BusBuddyError,
    channel::{ChannelEvent, ChannelStatus, Credentials, SessionMetadata, TelemetryChannel},
    config::AppConfig,
    permissions::{PermissionGrant, PermissionGrantor, request_tracking_permissions},
    presence::{PresenceConfig, PresenceDisplay, PresenceKeeper, PresenceNotifier},
    source::{FixSink, PositionSource, RawFix, SubscriptionId, WatchConfig},
};

use super::{
    PositionSample, SessionStats, SessionSummary, TelemetryEvent, TrackerEvent, TrackingState,
};

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub session_id: Option<String>,
    pub credentials: Credentials,
    pub bus_id: Option<String>,
    pub route: Option<String>,
    pub require_notification_permission: bool,
    pub presence: PresenceConfig,
    pub watch: WatchConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            session_id: config.session_id.clone(),
            credentials: Credentials {
                driver_id: config.driver_id.clone(),
                token: config.auth_token.clone(),
            },
            bus_id: config.bus_id.clone(),
            route: config.route.clone(),
            require_notification_permission: config.require_notification_permission,
            presence: config.presence.clone(),
            watch: WatchConfig::tracking(),
        }
    }
}

/// Proof of a Start in progress. Completing a start needs the ticket that
/// began it, and a Stop in between invalidates the ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartTicket(u64);

/// The live tracking session.
///
/// Owns the tracking state and the per-session statistics, and drives the
/// three collaborators: the position source (subscribed between Start and
/// Stop), the presence notifier (shown while a session runs) and the telemetry
/// channel (process-scoped, never torn down by the session).
///
/// All methods run on the one thread that processes tracker events. Each
/// operation checks the state first and rejects calls that are invalid in it.
pub struct TrackingSession<S, N, C> {
    config: SessionConfig,
    state: TrackingState,
    stats: SessionStats,
    session_id: Option<String>,
    subscription: Option<SubscriptionId>,
    pending_start: Option<StartTicket>,
    generation: u64,
    source: S,
    presence: PresenceKeeper<N>,
    channel: C,
    channel_status: ChannelStatus,
    events: Sender<TrackerEvent>,
}

impl<S, N, C> TrackingSession<S, N, C>
where
    S: PositionSource,
    N: PresenceNotifier,
    C: TelemetryChannel,
{
    /// `events` is where the position source delivers fixes for this session.
    pub fn new(
        config: SessionConfig,
        source: S,
        notifier: N,
        channel: C,
        events: Sender<TrackerEvent>,
    ) -> Self {
        let presence = PresenceKeeper::new(notifier, config.presence.clone());
        let channel_status = ChannelStatus {
            connected: channel.is_connected(),
            ..ChannelStatus::default()
        };
        Self {
            config,
            state: TrackingState::Idle,
            stats: SessionStats::default(),
            session_id: None,
            subscription: None,
            pending_start: None,
            generation: 0,
            source,
            presence,
            channel,
            channel_status,
            events,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    pub fn is_start_pending(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn channel_status(&self) -> &ChannelStatus {
        &self.channel_status
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn presence(&self) -> &PresenceKeeper<N> {
        &self.presence
    }

    pub fn notifier(&self) -> &N {
        self.presence.notifier()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The channel is shared with the rest of the process, which owns connect/disconnect.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Start tracking with a grantor that answers synchronously.
    ///
    /// # Errors
    ///
    /// - `InvalidState` / `StartPending` when not idle
    /// - `PermissionDenied` when a required permission was refused
    /// - `ServiceStartFailure` when the presence display cannot be shown
    /// - `PositionError` when the position source refuses the watch
    ///
    /// The session stays idle, with nothing subscribed, in every error case.
    pub fn start(
        &mut self,
        grantor: &mut impl PermissionGrantor,
        now: DateTime<Utc>,
    ) -> Result<(), BusBuddyError> {
        let ticket = self.begin_start()?;
        let grant = request_tracking_permissions(grantor);
        self.complete_start(ticket, grant, now)
    }

    /// First half of Start: validate the state and hand out a ticket while
    /// permissions are being asked for.
    pub fn begin_start(&mut self) -> Result<StartTicket, BusBuddyError> {
        if self.state != TrackingState::Idle {
            return Err(BusBuddyError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        if self.pending_start.is_some() {
            return Err(BusBuddyError::StartPending);
        }
        self.generation += 1;
        let ticket = StartTicket(self.generation);
        self.pending_start = Some(ticket);
        debug!("Start pending ({:?})", ticket);
        Ok(ticket)
    }

    /// Second half of Start, applied only if `ticket` is still the pending one.
    pub fn complete_start(
        &mut self,
        ticket: StartTicket,
        grant: PermissionGrant,
        now: DateTime<Utc>,
    ) -> Result<(), BusBuddyError> {
        if self.pending_start != Some(ticket) {
            warn!("Discarding completion of a start that was cancelled");
            return Err(BusBuddyError::StartSuperseded);
        }
        self.pending_start = None;

        if let Some(permission) = grant.first_denied(self.config.require_notification_permission) {
            warn!("Cannot start tracking: {} permission denied", permission);
            return Err(BusBuddyError::PermissionDenied { permission });
        }

        let display = PresenceDisplay::active(self.presence.config(), 0, 0., 0.);
        if let Err(e) = self.presence.start(&display, now) {
            error!("Cannot start tracking: {}", e);
            return Err(e);
        }

        let subscription = SubscriptionId(ticket.0);
        let sink = FixSink::new(subscription, self.events.clone());
        if let Err(e) = self.source.watch(&self.config.watch, sink) {
            error!("Cannot start tracking: {}", e);
            self.presence.stop();
            return Err(e);
        }

        let session_id = self
            .config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.stats.begin(now);
        self.subscription = Some(subscription);
        self.session_id = Some(session_id.clone());
        self.state = TrackingState::Active;
        info!("Tracking started (session {}, subscription {})", session_id, subscription);

        self.bring_up_channel(&session_id, now);
        Ok(())
    }

    fn bring_up_channel(&mut self, session_id: &str, now: DateTime<Utc>) {
        if self.channel.is_connected() {
            self.channel_status.connected = true;
        } else {
            match self.channel.connect() {
                Ok(()) => {
                    self.channel_status.apply(&ChannelEvent::Connected);
                    if let Err(e) = self.channel.identify(session_id, &self.config.credentials) {
                        warn!("Could not identify to telemetry server: {}", e);
                        self.channel_status.last_error = Some(e.to_string());
                    }
                }
                Err(e) => {
                    warn!("Telemetry channel unavailable, tracking locally: {}", e);
                    self.channel_status.apply(&ChannelEvent::ConnectError {
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }

        let metadata = SessionMetadata {
            bus_id: self.config.bus_id.clone(),
            route: self.config.route.clone(),
            started_at: Some(now),
        };
        if let Err(e) = self.channel.join_session(session_id, &metadata) {
            warn!("Could not join telemetry session {}: {}", session_id, e);
            self.channel_status.last_error = Some(e.to_string());
        }
    }

    /// Handle one fix delivered for `subscription`. Returns the stored sample,
    /// or `None` when the fix was discarded.
    pub fn on_position_sample(
        &mut self,
        subscription: SubscriptionId,
        fix: Result<RawFix, String>,
        now: DateTime<Utc>,
    ) -> Option<PositionSample> {
        if self.subscription != Some(subscription) {
            debug!("Ignoring fix from stale subscription {}", subscription);
            return None;
        }

        let sample = match fix {
            Ok(raw) => PositionSample::from(raw),
            Err(description) => {
                let e = BusBuddyError::PositionError { description };
                warn!("{}", e);
                return None;
            }
        };
        if !sample.latitude.is_finite() || !sample.longitude.is_finite() {
            warn!("Ignoring fix with invalid coordinates");
            return None;
        }

        let previous = self.stats.last_position.replace(sample);
        self.stats.samples_received += 1;

        if self.state == TrackingState::Active {
            if let Some(previous) = previous {
                self.stats.distance.add_leg(&previous, &sample);
            }
            self.emit_telemetry(&sample, now);

            let display = self.current_display(now);
            self.presence.refresh_if_stale(&display, now);
        }

        Some(sample)
    }

    fn emit_telemetry(&mut self, sample: &PositionSample, now: DateTime<Utc>) {
        let Some(session_id) = self.session_id.as_deref() else {
            return;
        };
        let event = TelemetryEvent::from_sample(session_id, sample, now);
        match self.channel.emit(&event) {
            Ok(()) => self.stats.telemetry_sent += 1,
            Err(e) => {
                debug!("Dropped telemetry event: {}", e);
                self.stats.telemetry_dropped += 1;
                self.channel_status.last_error = Some(e.to_string());
                if !self.channel.is_connected() {
                    self.channel_status.connected = false;
                }
            }
        }
    }

    fn current_display(&self, now: DateTime<Utc>) -> PresenceDisplay {
        let distance_km = self.stats.total_distance_km();
        match self.state {
            TrackingState::Paused => PresenceDisplay::paused(self.presence.config(), distance_km),
            _ => PresenceDisplay::active(
                self.presence.config(),
                self.stats.elapsed_seconds(now) / 60,
                distance_km,
                self.stats.current_speed_kmh(),
            ),
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), BusBuddyError> {
        if self.state != TrackingState::Active {
            return Err(BusBuddyError::InvalidState {
                operation: "pause",
                state: self.state,
            });
        }
        self.state = TrackingState::Paused;
        let display = self.current_display(now);
        self.presence.update(&display, now);
        info!("Tracking paused at {:.2} km", self.stats.total_distance_km());
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), BusBuddyError> {
        if self.state != TrackingState::Paused {
            return Err(BusBuddyError::InvalidState {
                operation: "resume",
                state: self.state,
            });
        }
        self.state = TrackingState::Active;
        let display = self.current_display(now);
        self.presence.update(&display, now);
        info!("Tracking resumed");
        Ok(())
    }

    /// End the session and return what it recorded. Stopping an idle session
    /// is a no-op returning an empty summary, and cancels a pending start.
    pub fn stop(&mut self, now: DateTime<Utc>) -> SessionSummary {
        if self.state == TrackingState::Idle {
            if self.pending_start.take().is_some() {
                info!("Pending start cancelled");
            }
            return SessionSummary::default();
        }

        if let Some(subscription) = self.subscription.take() {
            self.source.clear_watch(subscription);
        }
        self.presence.stop();

        let summary = SessionSummary {
            session_id: self.session_id.take(),
            started_at: self.stats.started_at,
            stopped_at: Some(now),
            elapsed_seconds: self.stats.elapsed_seconds(now),
            total_distance_km: self.stats.total_distance_km(),
            samples_received: self.stats.samples_received,
            telemetry_sent: self.stats.telemetry_sent,
            telemetry_dropped: self.stats.telemetry_dropped,
        };
        self.stats.reset();
        self.state = TrackingState::Idle;
        info!(
            "Tracking stopped: {:.2} km in {} s",
            summary.total_distance_km, summary.elapsed_seconds
        );
        summary
    }

    /// Periodic timer tick: re-issues the presence display when it is due.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if self.state != TrackingState::Idle && self.presence.reappear_due(now) {
            let display = self.current_display(now);
            self.presence.reappear(&display, now);
        }
    }

    pub fn on_channel_event(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Connected | ChannelEvent::IdentifySuccess | ChannelEvent::Joined { .. } => {
                debug!("Telemetry channel: {:?}", event)
            }
            _ => warn!("Telemetry channel: {:?}", event),
        }
        self.channel_status.apply(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{MemoryChannel, OutboundMessage},
        permissions::{Permission, PermissionStatus, StaticGrantor},
        presence::MemoryNotifier,
        source::ManualPositionSource,
        tracking::distance::haversine_km,
    };
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::sync::mpsc::{self, Receiver};

    type TestSession = TrackingSession<ManualPositionSource, MemoryNotifier, MemoryChannel>;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 7, 30, 0).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(seconds)
    }

    fn session_with(notifier: MemoryNotifier, channel: MemoryChannel) -> (TestSession, Receiver<TrackerEvent>) {
        let (tx, rx) = mpsc::channel();
        let config = SessionConfig {
            session_id: Some("s-1".to_string()),
            ..SessionConfig::default()
        };
        let session = TrackingSession::new(config, ManualPositionSource::new(), notifier, channel, tx);
        (session, rx)
    }

    fn session() -> (TestSession, Receiver<TrackerEvent>) {
        session_with(MemoryNotifier::new(), MemoryChannel::new())
    }

    fn started() -> (TestSession, Receiver<TrackerEvent>) {
        let (mut session, rx) = session();
        session.start(&mut StaticGrantor::granting_all(), t0()).unwrap();
        (session, rx)
    }

    fn feed(session: &mut TestSession, lat: f64, lon: f64, now: DateTime<Utc>) -> Option<PositionSample> {
        let subscription = session.subscription().expect("session is subscribed");
        session.on_position_sample(subscription, Ok(RawFix::at(lat, lon)), now)
    }

    #[test]
    fn test_start_subscribes_and_shows_presence() {
        let (session, _rx) = started();

        assert_eq!(session.state(), TrackingState::Active);
        assert_eq!(session.session_id(), Some("s-1"));
        assert_eq!(session.stats().started_at, Some(t0()));
        assert_eq!(session.source().watches().len(), 1);
        assert_eq!(session.source().watches()[0].1, WatchConfig::tracking());
        assert!(session.notifier().is_visible());
        assert_eq!(session.channel().connect_calls(), 1);
        assert!(session.channel_status().connected);

        let names: Vec<&str> = session.channel().sent().iter().map(OutboundMessage::name).collect();
        assert_eq!(names, vec!["identify", "driver:join"]);
    }

    #[test]
    fn test_start_reuses_connected_channel() {
        let (mut session, _rx) = session_with(MemoryNotifier::new(), MemoryChannel::connected());
        session.start(&mut StaticGrantor::granting_all(), t0()).unwrap();

        assert_eq!(session.channel().connect_calls(), 0);
        let names: Vec<&str> = session.channel().sent().iter().map(OutboundMessage::name).collect();
        assert_eq!(names, vec!["driver:join"]);
    }

    #[test]
    fn test_permission_denied_leaves_session_idle() {
        let (mut session, _rx) = session();
        let mut grantor = StaticGrantor::new(PermissionStatus::Denied, PermissionStatus::Granted);

        let result = session.start(&mut grantor, t0());
        assert!(matches!(
            result,
            Err(BusBuddyError::PermissionDenied {
                permission: Permission::Location
            })
        ));
        assert_eq!(session.state(), TrackingState::Idle);
        assert!(session.source().watches().is_empty());
        assert!(session.notifier().shown().is_empty());
        assert_eq!(session.stats().started_at, None);
        assert!(!session.is_start_pending());
    }

    #[test]
    fn test_presence_failure_aborts_start_without_subscription() {
        let mut notifier = MemoryNotifier::new();
        notifier.fail_show = true;
        let (mut session, _rx) = session_with(notifier, MemoryChannel::new());

        let result = session.start(&mut StaticGrantor::granting_all(), t0());
        assert!(matches!(
            result,
            Err(BusBuddyError::ServiceStartFailure { .. })
        ));
        assert_eq!(session.state(), TrackingState::Idle);
        assert!(session.source().watches().is_empty());
        assert_eq!(session.channel().connect_calls(), 0);
    }

    #[test]
    fn test_presence_channel_failure_aborts_start() {
        let mut notifier = MemoryNotifier::new();
        notifier.fail_channel = true;
        let (mut session, _rx) = session_with(notifier, MemoryChannel::new());

        let result = session.start(&mut StaticGrantor::granting_all(), t0());
        assert!(matches!(
            result,
            Err(BusBuddyError::ServiceStartFailure { .. })
        ));
        assert_eq!(session.state(), TrackingState::Idle);
        assert!(session.source().watches().is_empty());
        assert!(session.notifier().shown().is_empty());
    }

    #[test]
    fn test_lost_connection_marks_channel_down() {
        let (mut session, _rx) = started();
        feed(&mut session, 10., 20., at(1));
        assert!(session.channel_status().connected);

        session.channel_mut().drop_connection();
        feed(&mut session, 10., 20.01, at(2));

        assert!(!session.channel_status().connected);
        assert_eq!(session.stats().telemetry_sent, 1);
        assert_eq!(session.stats().telemetry_dropped, 1);
        assert!(session.stats().total_distance_km() > 1.);
        assert_eq!(session.state(), TrackingState::Active);
    }

    #[test]
    fn test_stop_from_paused() {
        let (mut session, _rx) = started();
        let subscription = session.subscription().unwrap();
        feed(&mut session, 10., 20., at(1));
        feed(&mut session, 10., 20.01, at(2));
        let distance = session.stats().total_distance_km();
        session.pause(at(3)).unwrap();

        let summary = session.stop(at(4));
        assert_eq!(summary.total_distance_km, distance);
        assert_eq!(summary.samples_received, 2);
        assert_eq!(session.state(), TrackingState::Idle);
        assert_eq!(session.subscription(), None);
        assert_eq!(session.source().cleared(), &[subscription]);
        assert!(!session.notifier().is_visible());
        assert!(session.resume(at(5)).is_err());
    }

    #[test]
    fn test_watch_failure_removes_presence() {
        let (mut session, _rx) = session();
        session.source_mut().fail_next_watch("gps off");

        let result = session.start(&mut StaticGrantor::granting_all(), t0());
        assert!(matches!(result, Err(BusBuddyError::PositionError { .. })));
        assert_eq!(session.state(), TrackingState::Idle);
        assert!(!session.notifier().is_visible());
    }

    #[test]
    fn test_channel_failure_does_not_block_start() {
        let mut channel = MemoryChannel::new();
        channel.fail_connect = true;
        let (mut session, _rx) = session_with(MemoryNotifier::new(), channel);

        session.start(&mut StaticGrantor::granting_all(), t0()).unwrap();
        assert_eq!(session.state(), TrackingState::Active);
        assert!(!session.channel_status().connected);
        assert_eq!(
            session.channel_status().last_error.as_deref(),
            Some("Telemetry channel connection failed: connection refused")
        );

        // samples still accumulate distance, telemetry is dropped
        feed(&mut session, 10., 20., at(1));
        feed(&mut session, 10., 20.01, at(2));
        assert!(session.stats().total_distance_km() > 1.);
        assert_eq!(session.stats().telemetry_sent, 0);
        assert_eq!(session.stats().telemetry_dropped, 2);
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let (mut session, _rx) = started();
        let result = session.start(&mut StaticGrantor::granting_all(), t0());
        assert!(matches!(
            result,
            Err(BusBuddyError::InvalidState {
                operation: "start",
                state: TrackingState::Active
            })
        ));
    }

    #[test]
    fn test_state_legality() {
        let (mut session, _rx) = session();
        assert!(matches!(
            session.pause(t0()),
            Err(BusBuddyError::InvalidState {
                state: TrackingState::Idle,
                ..
            })
        ));
        assert_eq!(session.state(), TrackingState::Idle);
        assert!(session.resume(t0()).is_err());

        let summary = session.stop(t0());
        assert_eq!(summary, SessionSummary::default());
        assert_eq!(summary.total_distance_km, 0.);

        session.start(&mut StaticGrantor::granting_all(), t0()).unwrap();
        assert!(matches!(
            session.resume(t0()),
            Err(BusBuddyError::InvalidState {
                operation: "resume",
                state: TrackingState::Active
            })
        ));
        session.pause(t0()).unwrap();
        assert!(session.pause(t0()).is_err());
        assert_eq!(session.state(), TrackingState::Paused);
    }

    #[test]
    fn test_first_sample_adds_no_distance() {
        let (mut session, _rx) = started();
        let sample = feed(&mut session, 10., 20., at(1)).unwrap();

        assert_eq!(session.stats().last_position, Some(sample));
        assert_eq!(session.stats().total_distance_km(), 0.);
        assert_eq!(session.channel().locations().len(), 1);
    }

    #[test]
    fn test_paused_samples_update_position_only() {
        let (mut session, _rx) = started();
        feed(&mut session, 10., 20., at(1));
        feed(&mut session, 10., 20.01, at(2));
        let before = session.stats().total_distance_km();
        let sent_before = session.channel().locations().len();

        session.pause(at(3)).unwrap();
        feed(&mut session, 10., 20.02, at(4));
        feed(&mut session, 10., 20.03, at(5));

        assert_eq!(session.stats().total_distance_km(), before);
        assert_eq!(session.channel().locations().len(), sent_before);
        assert_eq!(session.stats().last_position.unwrap().longitude, 20.03);
        assert_eq!(session.stats().samples_received, 4);

        let last = session.notifier().last_shown().unwrap();
        assert!(last.paused);
        assert_eq!(last.body, format!("Tracking paused | {:.2} km tracked", before));
    }

    #[test]
    fn test_resume_measures_from_last_paused_position() {
        // S1 active, S2 while paused, S3 after resume
        let (mut session, _rx) = started();
        feed(&mut session, 0., 0., at(1));
        session.pause(at(2)).unwrap();
        feed(&mut session, 0., 0.009, at(3));
        session.resume(at(4)).unwrap();
        feed(&mut session, 0., 0.018, at(5));

        let s2_s3 = haversine_km(0., 0.009, 0., 0.018);
        assert!((session.stats().total_distance_km() - s2_s3).abs() < 1e-9);
        assert!(!session.notifier().last_shown().unwrap().paused);
    }

    #[test]
    fn test_late_fix_after_stop_is_ignored() {
        let (mut session, _rx) = started();
        let subscription = session.subscription().unwrap();
        feed(&mut session, 10., 20., at(1));
        session.stop(at(2));

        let late = session.on_position_sample(subscription, Ok(RawFix::at(10., 20.5)), at(3));
        assert!(late.is_none());
        assert_eq!(session.stats().last_position, None);
        assert_eq!(session.stats().samples_received, 0);
        assert_eq!(session.source().cleared(), &[subscription]);
    }

    #[test]
    fn test_fix_from_previous_session_is_ignored() {
        let (mut session, _rx) = started();
        let first = session.subscription().unwrap();
        session.stop(at(1));
        session.start(&mut StaticGrantor::granting_all(), at(2)).unwrap();
        assert_ne!(session.subscription(), Some(first));

        assert!(session
            .on_position_sample(first, Ok(RawFix::at(1., 1.)), at(3))
            .is_none());
        assert_eq!(session.stats().samples_received, 0);
    }

    #[test]
    fn test_position_error_keeps_last_position() {
        let (mut session, _rx) = started();
        let subscription = session.subscription().unwrap();
        let sample = feed(&mut session, 10., 20., at(1));

        let result = session.on_position_sample(subscription, Err("timeout".to_string()), at(2));
        assert!(result.is_none());
        assert_eq!(session.stats().last_position, sample);
        assert_eq!(session.state(), TrackingState::Active);
    }

    #[test]
    fn test_emit_failure_keeps_distance() {
        let (mut session, _rx) = started();
        session.channel_mut().fail_emit = true;
        feed(&mut session, 10., 20., at(1));
        feed(&mut session, 10., 20.01, at(2));

        assert!(session.stats().total_distance_km() > 1.);
        assert_eq!(session.stats().telemetry_dropped, 2);
        assert!(session.channel_status().last_error.is_some());
        assert_eq!(session.state(), TrackingState::Active);
    }

    #[test]
    fn test_stop_returns_summary_and_is_idempotent() {
        let (mut session, _rx) = started();
        feed(&mut session, 10., 20., at(1));
        feed(&mut session, 10., 20.01, at(3));
        let distance = session.stats().total_distance_km();

        let summary = session.stop(at(125));
        assert_eq!(summary.session_id.as_deref(), Some("s-1"));
        assert_eq!(summary.elapsed_seconds, 125);
        assert_eq!(summary.total_distance_km, distance);
        assert_eq!(summary.samples_received, 2);
        assert_eq!(summary.telemetry_sent, 2);
        assert_eq!(session.state(), TrackingState::Idle);
        assert_eq!(session.stats().total_distance_km(), 0.);
        assert!(!session.notifier().is_visible());
        // the connection is process-scoped
        assert_eq!(session.channel().disconnect_calls(), 0);
        assert!(session.channel().is_connected());

        assert_eq!(session.stop(at(126)), SessionSummary::default());
    }

    #[test]
    fn test_stop_during_start_cancels_completion() {
        let (mut session, _rx) = session();
        let ticket = session.begin_start().unwrap();
        assert!(matches!(
            session.begin_start(),
            Err(BusBuddyError::StartPending)
        ));

        assert_eq!(session.stop(t0()), SessionSummary::default());
        let result = session.complete_start(ticket, PermissionGrant::all_granted(), t0());

        assert!(matches!(result, Err(BusBuddyError::StartSuperseded)));
        assert_eq!(session.state(), TrackingState::Idle);
        assert!(session.source().watches().is_empty());
        assert!(session.notifier().shown().is_empty());

        // a fresh start still works
        session.start(&mut StaticGrantor::granting_all(), t0()).unwrap();
        assert_eq!(session.state(), TrackingState::Active);
    }

    #[test]
    fn test_tick_reissues_presence() {
        let (mut session, _rx) = started();
        let shown = session.notifier().shown().len();

        session.tick(at(5));
        assert_eq!(session.notifier().shown().len(), shown);
        session.tick(at(10));
        assert_eq!(session.notifier().shown().len(), shown + 1);

        session.stop(at(11));
        session.tick(at(30));
        assert_eq!(session.notifier().shown().len(), shown + 1);
    }

    #[test]
    fn test_samples_refresh_presence_opportunistically() {
        let (mut session, _rx) = started();
        let shown = session.notifier().shown().len();

        feed(&mut session, 10., 20., at(1));
        assert_eq!(session.notifier().shown().len(), shown);
        feed(&mut session, 10., 20.01, at(6));
        assert_eq!(session.notifier().shown().len(), shown + 1);
        assert_eq!(
            session.notifier().last_shown().unwrap().body,
            format!("0 min • {:.2} km • 0 km/h", session.stats().total_distance_km())
        );
    }

    #[test]
    fn test_presence_failures_do_not_end_session() {
        let (mut session, _rx) = started();
        session.presence.notifier_mut().fail_show = true;
        session.presence.notifier_mut().fail_hide = true;

        session.pause(at(1)).unwrap();
        session.resume(at(2)).unwrap();
        session.tick(at(20));
        assert_eq!(session.state(), TrackingState::Active);

        session.stop(at(21));
        assert_eq!(session.state(), TrackingState::Idle);
    }

    #[test]
    fn test_channel_events_update_status() {
        let (mut session, _rx) = started();
        session.on_channel_event(&ChannelEvent::Disconnected {
            reason: "ping timeout".to_string(),
        });
        assert!(!session.channel_status().connected);
        assert_eq!(session.state(), TrackingState::Active);

        session.on_channel_event(&ChannelEvent::Connected);
        assert!(session.channel_status().connected);
    }

    #[test]
    fn test_generated_session_ids_differ() {
        let (tx, _rx) = mpsc::channel();
        let mut session = TrackingSession::new(
            SessionConfig::default(),
            ManualPositionSource::new(),
            MemoryNotifier::new(),
            MemoryChannel::new(),
            tx,
        );
        session.start(&mut StaticGrantor::granting_all(), t0()).unwrap();
        let first = session.session_id().unwrap().to_string();
        session.stop(at(1));
        session.start(&mut StaticGrantor::granting_all(), at(2)).unwrap();

        assert_ne!(session.session_id().unwrap(), first);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_distance_is_monotonic_and_frozen_while_paused(
            steps in prop::collection::vec((-0.01f64..0.01, -0.01f64..0.01, any::<bool>()), 1..60),
        ) {
            let (mut session, _rx) = started();
            let (mut lat, mut lon) = (45.0, 7.0);
            let mut previous_total = 0.;

            for (i, (dlat, dlon, toggle)) in steps.into_iter().enumerate() {
                let now = at(i as i64);
                if toggle {
                    match session.state() {
                        TrackingState::Active => session.pause(now).unwrap(),
                        TrackingState::Paused => session.resume(now).unwrap(),
                        TrackingState::Idle => unreachable!(),
                    }
                }
                lat += dlat;
                lon += dlon;
                feed(&mut session, lat, lon, now);

                let total = session.stats().total_distance_km();
                prop_assert!(total >= previous_total);
                if session.state() == TrackingState::Paused {
                    prop_assert_eq!(total, previous_total);
                }
                previous_total = total;
            }
        }
    }
}
