use std::{
    path::Path,
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError, Sender, TryRecvError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info};

use crate::BusBuddyError;

use super::{FixSink, PositionSource, RawFix, SubscriptionId, WatchConfig};

struct ActiveWatch {
    subscription: SubscriptionId,
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

/// A position source replaying recorded fixes.
///
/// Fixes are played back on a background thread at the watch's minimum
/// interval, or at an explicit interval set with [`with_interval`]. Recordings
/// are JSON Lines files of [`RawFix`] values, the format the fix recorder writes.
///
/// [`with_interval`]: ReplayPositionSource::with_interval
pub struct ReplayPositionSource {
    fixes: Arc<Vec<RawFix>>,
    interval: Option<Duration>,
    active: Option<ActiveWatch>,
}

impl ReplayPositionSource {
    pub fn from_fixes(fixes: Vec<RawFix>) -> Self {
        Self {
            fixes: Arc::new(fixes),
            interval: None,
            active: None,
        }
    }

    /// Load a recording from a JSON Lines file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist or cannot be opened
    /// - A line is not a valid fix
    pub fn from_file(path: &Path) -> Result<Self, BusBuddyError> {
        if !path.exists() {
            return Err(BusBuddyError::InvalidReplayFile {
                path: format!("{:?}", path),
            });
        }

        let fixes = serde_jsonlines::json_lines(path)
            .map_err(|e| BusBuddyError::ReplayLoaderError { source: e })?
            .collect::<Result<Vec<RawFix>, std::io::Error>>()
            .map_err(|e| {
                error!("Could not parse replay file {:?}: {}", path, e);
                BusBuddyError::ReplayLoaderError { source: e }
            })?;

        info!("Loaded {} fixes from {:?}", fixes.len(), path);
        Ok(Self::from_fixes(fixes))
    }

    /// Override the playback interval. `Duration::ZERO` replays as fast as possible.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn fixes(&self) -> &[RawFix] {
        &self.fixes
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            // the thread also stops when the sender is gone
            let _ = active.cancel.send(());
            if active.handle.join().is_err() {
                error!("Replay thread for {} panicked", active.subscription);
            }
        }
    }
}

impl PositionSource for ReplayPositionSource {
    fn watch(&mut self, config: &WatchConfig, sink: FixSink) -> Result<(), BusBuddyError> {
        self.stop_active();

        let interval = self
            .interval
            .unwrap_or_else(|| Duration::from_millis(config.min_interval_ms));
        let fixes = self.fixes.clone();
        let (cancel, cancel_rx) = mpsc::channel::<()>();
        let subscription = sink.subscription();

        let handle = thread::Builder::new()
            .name(format!("replay-{}", subscription.0))
            .spawn(move || {
                let cancelled = |wait: Duration| {
                    if wait.is_zero() {
                        !matches!(cancel_rx.try_recv(), Err(TryRecvError::Empty))
                    } else {
                        !matches!(cancel_rx.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
                    }
                };
                for fix in fixes.iter() {
                    if cancelled(Duration::ZERO) || !sink.deliver(Ok(*fix)) {
                        return;
                    }
                    if cancelled(interval) {
                        return;
                    }
                }
                sink.finish();
            })
            .map_err(|e| BusBuddyError::PositionError {
                description: format!("Could not start replay thread: {}", e),
            })?;

        debug!("Replaying {} fixes for {}", self.fixes.len(), subscription);
        self.active = Some(ActiveWatch {
            subscription,
            cancel,
            handle,
        });
        Ok(())
    }

    fn clear_watch(&mut self, subscription: SubscriptionId) {
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.subscription == subscription)
        {
            self.stop_active();
        }
    }
}

impl Drop for ReplayPositionSource {
    fn drop(&mut self) {
        self.stop_active();
    }
}
