//! Author access checks
//!
//! Every pipeline entry point asks an [`AccessPolicy`] before touching
//! anything. The bundled [`StaffRoster`] keeps global staff plus explicit
//! per-course grants.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::http::HeaderMap;
use parking_lot::RwLock;

use crate::course::CourseLikeKey;
use crate::error::AppError;

/// Header carrying the authenticated user id
pub const USER_HEADER: &str = "x-user-id";

/// Header carrying the caller's session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Capability check for course authoring
pub trait AccessPolicy: Send + Sync {
    fn has_author_access(&self, user_id: &str, key: &CourseLikeKey) -> bool;
}

// ============================================================================
// Staff Roster
// ============================================================================

#[derive(Clone, Default)]
pub struct StaffRoster {
    staff: Arc<HashSet<String>>,
    grants: Arc<RwLock<HashMap<CourseLikeKey, HashSet<String>>>>,
    allow_all: bool,
}

impl StaffRoster {
    pub fn new(staff: impl IntoIterator<Item = String>) -> Self {
        Self {
            staff: Arc::new(staff.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Any authenticated user is an author everywhere
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Default::default()
        }
    }

    pub fn with_allow_all(mut self, allow_all: bool) -> Self {
        self.allow_all = allow_all;
        self
    }

    /// Give `user_id` author access to one course or library
    pub fn grant(&self, user_id: impl Into<String>, key: CourseLikeKey) {
        self.grants.write().entry(key).or_default().insert(user_id.into());
    }

    pub fn revoke(&self, user_id: &str, key: &CourseLikeKey) {
        if let Some(users) = self.grants.write().get_mut(key) {
            users.remove(user_id);
        }
    }
}

impl AccessPolicy for StaffRoster {
    fn has_author_access(&self, user_id: &str, key: &CourseLikeKey) -> bool {
        self.allow_all
            || self.staff.contains(user_id)
            || self
                .grants
                .read()
                .get(key)
                .map_or(false, |users| users.contains(user_id))
    }
}

// ============================================================================
// Requester
// ============================================================================

/// Identity of the caller of an import or export request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub session_id: String,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Read the requester from headers set by the fronting auth layer
    ///
    /// Without a session header the user id doubles as the session.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user_id = header_value(headers, USER_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing X-User-Id header".to_string()))?;
        let session_id =
            header_value(headers, SESSION_HEADER).unwrap_or_else(|| format!("user-{}", user_id));

        Ok(Self { user_id, session_id })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
