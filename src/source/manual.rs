use log::debug;

use crate::BusBuddyError;

use super::{FixSink, PositionSource, RawFix, SubscriptionId, WatchConfig};

/// A position source fed from outside, e.g. by a platform location callback
/// bridged into Rust, or by a test.
///
/// It keeps the sink of the current watch and forwards whatever is pushed into
/// it. It also keeps a log of watch/clear calls so callers can check the
/// subscription lifecycle.
#[derive(Default)]
pub struct ManualPositionSource {
    sink: Option<FixSink>,
    watches: Vec<(SubscriptionId, WatchConfig)>,
    cleared: Vec<SubscriptionId>,
    fail_next_watch: Option<String>,
}

impl ManualPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `watch` call fail with `reason`.
    pub fn fail_next_watch(&mut self, reason: &str) {
        self.fail_next_watch = Some(reason.to_string());
    }

    /// Push a fix to the current watch. Returns false when there is no watch.
    pub fn push(&self, fix: RawFix) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.deliver(Ok(fix)))
    }

    pub fn push_error(&self, description: &str) -> bool {
        self.sink
            .as_ref()
            .is_some_and(|sink| sink.deliver(Err(description.to_string())))
    }

    pub fn current_subscription(&self) -> Option<SubscriptionId> {
        self.sink.as_ref().map(FixSink::subscription)
    }

    pub fn watches(&self) -> &[(SubscriptionId, WatchConfig)] {
        &self.watches
    }

    pub fn cleared(&self) -> &[SubscriptionId] {
        &self.cleared
    }
}

impl PositionSource for ManualPositionSource {
    fn watch(&mut self, config: &WatchConfig, sink: FixSink) -> Result<(), BusBuddyError> {
        if let Some(reason) = self.fail_next_watch.take() {
            return Err(BusBuddyError::PositionError {
                description: reason,
            });
        }
        debug!("Manual source watching {}", sink.subscription());
        self.watches.push((sink.subscription(), config.clone()));
        self.sink = Some(sink);
        Ok(())
    }

    fn clear_watch(&mut self, subscription: SubscriptionId) {
        if self.current_subscription() == Some(subscription) {
            self.sink = None;
        }
        self.cleared.push(subscription);
    }
}
