use std::fmt;

use log::{debug, warn};

/// A runtime permission the tracking session needs before it can start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    Location,
    Notifications,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Location => write!(f, "Location"),
            Permission::Notifications => write!(f, "Notification"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

/// Source of permission decisions, usually backed by the host platform's
/// permission prompt.
pub trait PermissionGrantor {
    /// Ask for `permission`, blocking until the user or platform answered.
    fn request(&mut self, permission: Permission) -> PermissionStatus;
}

/// Outcome of the permission round performed at the beginning of a Start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermissionGrant {
    pub location: PermissionStatus,
    pub notifications: PermissionStatus,
}

impl PermissionGrant {
    pub fn all_granted() -> Self {
        Self {
            location: PermissionStatus::Granted,
            notifications: PermissionStatus::Granted,
        }
    }

    /// Returns the first permission the session requires that was not granted.
    pub fn first_denied(&self, require_notifications: bool) -> Option<Permission> {
        if !self.location.is_granted() {
            Some(Permission::Location)
        } else if require_notifications && !self.notifications.is_granted() {
            Some(Permission::Notifications)
        } else {
            None
        }
    }
}

/// Requests location first and only asks for notifications once location was granted.
pub fn request_tracking_permissions(grantor: &mut impl PermissionGrantor) -> PermissionGrant {
    let location = grantor.request(Permission::Location);
    if !location.is_granted() {
        warn!("Location permission denied");
        return PermissionGrant {
            location,
            notifications: PermissionStatus::Denied,
        };
    }
    let notifications = grantor.request(Permission::Notifications);
    debug!("Permissions: location={location:?} notifications={notifications:?}");
    PermissionGrant {
        location,
        notifications,
    }
}

/// Grantor answering from fixed flags, used by the CLI and in tests.
#[derive(Clone, Debug)]
pub struct StaticGrantor {
    pub location: PermissionStatus,
    pub notifications: PermissionStatus,
    requests: Vec<Permission>,
}

impl Default for StaticGrantor {
    fn default() -> Self {
        Self::granting_all()
    }
}

impl StaticGrantor {
    pub fn new(location: PermissionStatus, notifications: PermissionStatus) -> Self {
        Self {
            location,
            notifications,
            requests: Vec::new(),
        }
    }

    pub fn granting_all() -> Self {
        Self::new(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    /// Permissions requested so far, in order.
    pub fn requests(&self) -> &[Permission] {
        &self.requests
    }
}

impl PermissionGrantor for StaticGrantor {
    fn request(&mut self, permission: Permission) -> PermissionStatus {
        self.requests.push(permission);
        match permission {
            Permission::Location => self.location,
            Permission::Notifications => self.notifications,
        }
    }
}
