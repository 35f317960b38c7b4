//! Session tracking.
//!
//! Anonymous users are identified by a `session_id` cookie issued on first
//! contact. Each session may only have a bounded number of compile requests
//! in flight at once; the registry expires idle sessions after the
//! configured TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, header};

use crate::error::{ApiError, ApiResult};

/// Session id from the request's cookies, when present.
pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|part| part.trim().strip_prefix("session_id="))
        .map(str::to_string)
}

/// Existing session id, or a freshly issued one. The boolean is true when
/// the id is new and a `Set-Cookie` must go out with the response.
pub fn get_or_create(headers: &HeaderMap) -> (String, bool) {
    match session_id_from(headers) {
        Some(id) => (id, false),
        None => (uuid::Uuid::new_v4().simple().to_string(), true),
    }
}

/// Tracks per-session in-flight request counts with TTL expiry.
pub struct SessionRegistry {
    max_per_session: usize,
    max_total: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, usize)>>,
}

impl SessionRegistry {
    pub fn new(max_per_session: usize, max_total: usize, ttl: Duration) -> Self {
        Self {
            max_per_session,
            max_total,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Begin one request for `session_id`. Fails with `TooManySessions` when
    /// the session is already at its in-flight cap. The returned permit
    /// decrements the count when dropped, on every exit path.
    pub fn begin(&self, session_id: &str) -> ApiResult<SessionPermit<'_>> {
        let mut entries = self.entries.lock().expect("session registry lock poisoned");
        let now = Instant::now();
        entries.retain(|_, (deadline, _)| *deadline > now);

        let count = entries
            .get(session_id)
            .map(|(_, count)| *count)
            .unwrap_or(0);
        if count >= self.max_per_session {
            return Err(ApiError::TooManySessions);
        }
        if count == 0 && entries.len() >= self.max_total {
            // Full of live sessions: drop the one closest to expiry.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (deadline, _))| *deadline)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(session_id.to_string(), (now + self.ttl, count + 1));
        Ok(SessionPermit {
            registry: self,
            session_id: session_id.to_string(),
        })
    }

    fn finish(&self, session_id: &str) {
        let mut entries = self.entries.lock().expect("session registry lock poisoned");
        if let Some((_, count)) = entries.get_mut(session_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// One in-flight request slot for a session.
pub struct SessionPermit<'a> {
    registry: &'a SessionRegistry,
    session_id: String,
}

impl Drop for SessionPermit<'_> {
    fn drop(&mut self) {
        self.registry.finish(&self.session_id);
    }
}
