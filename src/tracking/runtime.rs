use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, Sender},
    time::{Duration, Instant},
};

use chrono::Utc;
use log::{debug, info, warn};

use crate::{
    channel::{ChannelEvent, TelemetryChannel},
    permissions::PermissionGrantor,
    presence::PresenceNotifier,
    source::{PositionSource, RawFix, SubscriptionId},
};

use super::{SessionSummary, TrackingSession, TrackingState};

const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Everything the tracker loop reacts to, in arrival order.
#[derive(Debug)]
pub enum TrackerEvent {
    Fix {
        subscription: SubscriptionId,
        fix: Result<RawFix, String>,
    },
    SourceFinished {
        subscription: SubscriptionId,
    },
    Control(Control),
    Channel(ChannelEvent),
}

/// Commands from the user or the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Start,
    Pause,
    Resume,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// How often the session's periodic work runs when no events arrive
    pub tick_interval: Duration,
    /// End the loop once the position source has run out of fixes
    pub stop_when_exhausted: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            stop_when_exhausted: false,
        }
    }
}

/// Drive `session` from `events` until shutdown and return the summary of
/// every session that ended along the way.
///
/// Accepted fixes are copied to `recorder` when one is given. On exit the
/// running session is stopped and the telemetry channel disconnected.
pub fn run_tracker<S, N, C>(
    session: &mut TrackingSession<S, N, C>,
    grantor: &mut impl PermissionGrantor,
    events: Receiver<TrackerEvent>,
    mut recorder: Option<Sender<RawFix>>,
    options: &RuntimeOptions,
) -> Vec<SessionSummary>
where
    S: PositionSource,
    N: PresenceNotifier,
    C: TelemetryChannel,
{
    let mut summaries = Vec::new();
    let mut last_tick = Instant::now();

    loop {
        let timeout = options.tick_interval.saturating_sub(last_tick.elapsed());
        let event = match events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Tracker event channel closed");
                break;
            }
        };

        if last_tick.elapsed() >= options.tick_interval {
            session.tick(Utc::now());
            last_tick = Instant::now();
        }

        let Some(event) = event else {
            continue;
        };

        match event {
            TrackerEvent::Fix { subscription, fix } => {
                let raw = fix.as_ref().ok().copied();
                let accepted = session.on_position_sample(subscription, fix, Utc::now());
                if let (Some(_), Some(raw), Some(sender)) = (accepted, raw, recorder.as_ref()) {
                    if sender.send(raw).is_err() {
                        warn!("Fix recorder stopped, no longer recording");
                        recorder = None;
                    }
                }
            }
            TrackerEvent::SourceFinished { subscription } => {
                if session.subscription() != Some(subscription) {
                    continue;
                }
                info!("Position source has no more fixes");
                if options.stop_when_exhausted {
                    break;
                }
            }
            TrackerEvent::Channel(channel_event) => session.on_channel_event(&channel_event),
            TrackerEvent::Control(control) => {
                if control == Control::Shutdown {
                    break;
                }
                if let Some(summary) = apply_control(session, grantor, control) {
                    summaries.push(summary);
                }
            }
        }
    }

    if session.state() != TrackingState::Idle {
        summaries.push(session.stop(Utc::now()));
    }
    if let Err(e) = session.channel_mut().disconnect() {
        warn!("Error closing telemetry channel: {}", e);
    }
    summaries
}

fn apply_control<S, N, C>(
    session: &mut TrackingSession<S, N, C>,
    grantor: &mut impl PermissionGrantor,
    control: Control,
) -> Option<SessionSummary>
where
    S: PositionSource,
    N: PresenceNotifier,
    C: TelemetryChannel,
{
    let now = Utc::now();
    let result = match control {
        Control::Start => session.start(grantor, now),
        Control::Pause => session.pause(now),
        Control::Resume => session.resume(now),
        Control::Stop => {
            let was_running = session.state() != TrackingState::Idle;
            let summary = session.stop(now);
            return was_running.then_some(summary);
        }
        Control::Shutdown => Ok(()),
    };
    if let Err(e) = result {
        warn!("{:?} rejected: {}", control, e);
    }
    None
}
