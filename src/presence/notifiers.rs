use log::{debug, info};

use crate::BusBuddyError;

use super::{PresenceChannel, PresenceDisplay, PresenceNotifier};

/// Notifier for terminal use: the display is written to the log.
#[derive(Debug, Default)]
pub struct LogNotifier {
    current: Option<PresenceDisplay>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&PresenceDisplay> {
        self.current.as_ref()
    }
}

impl PresenceNotifier for LogNotifier {
    fn ensure_channel(&mut self, channel: &PresenceChannel) -> Result<(), BusBuddyError> {
        debug!("Presence channel '{}' ({}) ready", channel.id, channel.name);
        Ok(())
    }

    fn show(&mut self, display: &PresenceDisplay) -> Result<(), BusBuddyError> {
        // repeated identical displays are only interesting at debug level
        if self.current.as_ref() == Some(display) {
            debug!("{} | {}", display.title, display.body);
        } else {
            info!("{} | {}", display.title, display.body);
        }
        self.current = Some(display.clone());
        Ok(())
    }

    fn hide(&mut self) -> Result<(), BusBuddyError> {
        if self.current.take().is_some() {
            info!("Presence display removed");
        }
        Ok(())
    }
}

/// In-memory notifier recording every call, with switches to make calls fail.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    pub fail_channel: bool,
    pub fail_show: bool,
    pub fail_hide: bool,
    channels_prepared: usize,
    shown: Vec<PresenceDisplay>,
    hide_count: usize,
    visible: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels_prepared(&self) -> usize {
        self.channels_prepared
    }

    /// Every display accepted by `show`, oldest first.
    pub fn shown(&self) -> &[PresenceDisplay] {
        &self.shown
    }

    pub fn last_shown(&self) -> Option<&PresenceDisplay> {
        self.shown.last()
    }

    pub fn hide_count(&self) -> usize {
        self.hide_count
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

impl PresenceNotifier for MemoryNotifier {
    fn ensure_channel(&mut self, _channel: &PresenceChannel) -> Result<(), BusBuddyError> {
        if self.fail_channel {
            return Err(BusBuddyError::PresenceError {
                reason: "channel unavailable".to_string(),
            });
        }
        self.channels_prepared += 1;
        Ok(())
    }

    fn show(&mut self, display: &PresenceDisplay) -> Result<(), BusBuddyError> {
        if self.fail_show {
            return Err(BusBuddyError::PresenceError {
                reason: "show rejected".to_string(),
            });
        }
        self.shown.push(display.clone());
        self.visible = true;
        Ok(())
    }

    fn hide(&mut self) -> Result<(), BusBuddyError> {
        if self.fail_hide {
            return Err(BusBuddyError::PresenceError {
                reason: "hide rejected".to_string(),
            });
        }
        self.hide_count += 1;
        self.visible = false;
        Ok(())
    }
}
