//! Time-bounded capability grants.
//!
//! A grant records an expiry instant per category. `Once` approvals never
//! touch the gate, so only standing grants live here.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Capability family a grant covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionCategory {
    File,
    Screen,
    Camera,
    Clipboard,
}

impl PermissionCategory {
    pub const ALL: [PermissionCategory; 4] = [Self::File, Self::Screen, Self::Camera, Self::Clipboard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Screen => "screen",
            Self::Camera => "camera",
            Self::Clipboard => "clipboard",
        }
    }
}

impl fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown permission category: {s}"))
    }
}

/// Thread-safe map of category to grant expiry.
#[derive(Debug, Default)]
pub struct PermissionGate {
    grants: Mutex<HashMap<PermissionCategory, Instant>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn grants(&self) -> MutexGuard<'_, HashMap<PermissionCategory, Instant>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.grants.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_granted(&self, category: PermissionCategory) -> bool {
        self.is_granted_at(category, Instant::now())
    }

    pub fn is_granted_at(&self, category: PermissionCategory, now: Instant) -> bool {
        self.grants().get(&category).is_some_and(|expiry| now < *expiry)
    }

    /// Grant `category` for `duration`. `None` grants nothing (allow once).
    pub fn grant(&self, category: PermissionCategory, duration: Option<Duration>) {
        self.grant_at(category, duration, Instant::now());
    }

    pub fn grant_at(&self, category: PermissionCategory, duration: Option<Duration>, now: Instant) {
        let Some(duration) = duration.filter(|d| !d.is_zero()) else {
            return;
        };
        let Some(expiry) = now.checked_add(duration) else {
            return;
        };
        tracing::info!(%category, secs = duration.as_secs(), "permission granted");
        self.grants().insert(category, expiry);
    }

    pub fn revoke(&self, category: PermissionCategory) {
        if self.grants().remove(&category).is_some() {
            tracing::info!(%category, "permission revoked");
        }
    }

    /// Expiry of an active grant.
    pub fn expiry(&self, category: PermissionCategory) -> Option<Instant> {
        let now = Instant::now();
        self.grants().get(&category).copied().filter(|e| now < *e)
    }

    /// Drop expired grants.
    pub fn prune(&self) {
        let now = Instant::now();
        self.grants().retain(|_, expiry| now < *expiry);
    }
}
