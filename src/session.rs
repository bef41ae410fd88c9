//! Join → DevAddr session correlation.
//!
//! A join request parks a pending entry keyed by DevEUI. The first data
//! uplink whose operator matches exactly one pending join promotes it to
//! a DevAddr binding; every later uplink on that DevAddr is stamped with
//! the session token and backfilled with the DevEUI. Ambiguous matches
//! (several pending joins for the operator) bind nothing.
//!
//! The tracker is owned by the pipeline worker; no synchronization.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;

/// Default inactivity window in days, longer than the packet retention
/// period.
pub const DEFAULT_INACTIVITY_DAYS: i64 = 9;

const SESSION_TOKEN_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub dev_eui: String,
    pub join_eui: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingJoin {
    dev_eui: String,
    join_eui: String,
    operator: String,
    session_id: String,
    created_at: DateTime<Utc>,
}

pub struct SessionTracker {
    pending: HashMap<String, PendingJoin>,
    bound: HashMap<String, SessionContext>,
    inactivity: Duration,
}

fn new_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

impl SessionTracker {
    pub fn new(inactivity: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            bound: HashMap::new(),
            inactivity,
        }
    }

    /// Record a join request. Returns the session token, also stamped on
    /// the join packet itself.
    pub fn track_join(
        &mut self,
        dev_eui: &str,
        join_eui: &str,
        operator: &str,
        now: DateTime<Utc>,
    ) -> String {
        let session_id = new_session_token();
        self.pending.insert(
            dev_eui.to_string(),
            PendingJoin {
                dev_eui: dev_eui.to_string(),
                join_eui: join_eui.to_string(),
                operator: operator.to_string(),
                session_id: session_id.clone(),
                created_at: now,
            },
        );
        session_id
    }

    /// Stamp a data uplink: returns `(session_id, dev_eui)` when the
    /// DevAddr is bound or can be promoted unambiguously.
    pub fn stamp_uplink(
        &mut self,
        dev_addr: &str,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Option<(String, String)> {
        if let Some(ctx) = self.bound.get_mut(dev_addr) {
            ctx.last_seen = now;
            return Some((ctx.session_id.clone(), ctx.dev_eui.clone()));
        }

        // Opportunistic promotion: exactly one pending join for this
        // operator within the window, else leave the packet unlinked.
        let candidate_key = {
            let mut candidates = self.pending.values().filter(|join| {
                join.operator == operator && now - join.created_at < self.inactivity
            });
            let first = candidates.next()?;
            if candidates.next().is_some() {
                return None;
            }
            first.dev_eui.clone()
        };

        let join = self.pending.remove(&candidate_key)?;
        let ctx = SessionContext {
            dev_eui: join.dev_eui,
            join_eui: join.join_eui,
            session_id: join.session_id,
            created_at: join.created_at,
            last_seen: now,
        };
        let result = (ctx.session_id.clone(), ctx.dev_eui.clone());
        self.bound.insert(dev_addr.to_string(), ctx);
        Some(result)
    }

    /// Evict entries idle past the inactivity window.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let inactivity = self.inactivity;
        let before = self.pending.len() + self.bound.len();
        self.pending
            .retain(|_, join| now - join.created_at < inactivity);
        self.bound
            .retain(|_, ctx| now - ctx.last_seen < inactivity);
        before - (self.pending.len() + self.bound.len())
    }

    pub fn bound_len(&self) -> usize {
        self.bound.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_INACTIVITY_DAYS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_then_uplink_backfills_dev_eui() {
        let mut tracker = SessionTracker::default();
        let now = Utc::now();

        let session = tracker.track_join(
            "0004A30B001C0530",
            "70B3D57ED0000001",
            "The Things Network",
            now,
        );

        let (stamped, dev_eui) = tracker
            .stamp_uplink("26011AAB", "The Things Network", now + Duration::seconds(5))
            .unwrap();
        assert_eq!(stamped, session);
        assert_eq!(dev_eui, "0004A30B001C0530");

        // Subsequent uplinks reuse the binding.
        let (again, _) = tracker
            .stamp_uplink("26011AAB", "The Things Network", now + Duration::seconds(10))
            .unwrap();
        assert_eq!(again, session);
        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(tracker.bound_len(), 1);
    }

    #[test]
    fn test_ambiguous_pending_joins_bind_nothing() {
        let mut tracker = SessionTracker::default();
        let now = Utc::now();

        tracker.track_join("AAAAAAAAAAAAAAAA", "70B3D57ED0000001", "The Things Network", now);
        tracker.track_join("BBBBBBBBBBBBBBBB", "70B3D57ED0000002", "The Things Network", now);

        assert!(tracker
            .stamp_uplink("26011AAB", "The Things Network", now)
            .is_none());
        // Both joins stay pending for a later unambiguous device.
        assert_eq!(tracker.pending_len(), 2);
    }

    #[test]
    fn test_operator_mismatch_binds_nothing() {
        let mut tracker = SessionTracker::default();
        let now = Utc::now();

        tracker.track_join("AAAAAAAAAAAAAAAA", "70B3D57ED0000001", "Helium", now);
        assert!(tracker
            .stamp_uplink("26011AAB", "The Things Network", now)
            .is_none());
    }

    #[test]
    fn test_rejoining_device_replaces_pending_entry() {
        let mut tracker = SessionTracker::default();
        let now = Utc::now();

        let first = tracker.track_join("AAAAAAAAAAAAAAAA", "70B3D57ED0000001", "Helium", now);
        let second =
            tracker.track_join("AAAAAAAAAAAAAAAA", "70B3D57ED0000001", "Helium", now);
        assert_ne!(first, second);
        assert_eq!(tracker.pending_len(), 1);

        let (session, _) = tracker.stamp_uplink("78000001", "Helium", now).unwrap();
        assert_eq!(session, second);
    }

    #[test]
    fn test_sweep_evicts_idle_entries() {
        let mut tracker = SessionTracker::new(Duration::hours(1));
        let now = Utc::now();

        tracker.track_join("AAAAAAAAAAAAAAAA", "70B3D57ED0000001", "Helium", now);
        tracker.stamp_uplink("78000001", "Helium", now);
        assert_eq!(tracker.bound_len(), 1);

        // Fresh entries survive.
        assert_eq!(tracker.sweep(now + Duration::minutes(30)), 0);
        // Idle entries go.
        assert_eq!(tracker.sweep(now + Duration::hours(2)), 1);
        assert_eq!(tracker.bound_len(), 0);

        // And a stale pending join no longer promotes.
        tracker.track_join("BBBBBBBBBBBBBBBB", "70B3D57ED0000001", "Helium", now);
        assert!(tracker
            .stamp_uplink("78000002", "Helium", now + Duration::hours(3))
            .is_none());
    }
}
