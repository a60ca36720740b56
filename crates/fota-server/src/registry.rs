//! Process-wide registry of active sessions and downloads
//!
//! Each vehicle id maps to one slot owned by exactly one connection. The
//! owning connection holds a [`SessionLease`]; every write goes through the
//! lease and is applied only while the lease still owns the slot. A newer
//! claim for the same vehicle either supersedes the old owner or is refused,
//! depending on configuration. Either way two connections never interleave
//! writes to the same slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fota_core::models::normalize;
use fota_core::{DownloadRequest, Session};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::ConnectionError;

#[derive(Debug)]
struct Slot {
    owner: u64,
    session: Session,
    download: Option<DownloadRequest>,
}

#[derive(Debug)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    next_token: AtomicU64,
    reject_duplicates: bool,
}

impl SessionRegistry {
    pub fn new(reject_duplicates: bool) -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            reject_duplicates,
        })
    }

    /// Claim the slot for `session.car_id`
    pub fn claim(self: &Arc<Self>, session: Session) -> Result<SessionLease, ConnectionError> {
        let key = normalize(&session.car_id);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut slots = self.slots.write();
        if let Some(existing) = slots.get(&key) {
            if self.reject_duplicates {
                return Err(ConnectionError::DuplicateSession(session.car_id.clone()));
            }
            warn!(
                car_id = %session.car_id,
                previous_peer = %existing.session.peer,
                peer = %session.peer,
                "Superseding active session"
            );
        }
        slots.insert(
            key.clone(),
            Slot {
                owner: token,
                session,
                download: None,
            },
        );
        drop(slots);

        debug!(car_id = %key, token, "Session claimed");
        Ok(SessionLease {
            registry: Arc::clone(self),
            key,
            token,
        })
    }

    /// Snapshot of every in-flight download
    pub fn active_downloads(&self) -> Vec<DownloadRequest> {
        self.slots
            .read()
            .values()
            .filter_map(|slot| slot.download.clone())
            .collect()
    }

    /// Snapshot of every active session
    pub fn active_sessions(&self) -> Vec<Session> {
        self.slots
            .read()
            .values()
            .map(|slot| slot.session.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn with_owned_slot(&self, key: &str, token: u64, f: impl FnOnce(&mut Slot)) -> bool {
        match self.slots.write().get_mut(key) {
            Some(slot) if slot.owner == token => {
                f(slot);
                true
            }
            _ => false,
        }
    }
}

/// Write access to one registry slot, released on drop
#[derive(Debug)]
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    key: String,
    token: u64,
}

impl SessionLease {
    /// Whether this lease still owns its slot
    pub fn is_owner(&self) -> bool {
        self.registry
            .slots
            .read()
            .get(&self.key)
            .map_or(false, |slot| slot.owner == self.token)
    }

    /// Publish the connection's current session. No-op once superseded.
    pub fn publish_session(&self, session: &Session) -> bool {
        self.registry
            .with_owned_slot(&self.key, self.token, |slot| slot.session = session.clone())
    }

    /// Publish (or clear) the active download. No-op once superseded.
    pub fn publish_download(&self, download: Option<&DownloadRequest>) -> bool {
        self.registry.with_owned_slot(&self.key, self.token, |slot| {
            slot.download = download.cloned()
        })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut slots = self.registry.slots.write();
        if slots.get(&self.key).map_or(false, |s| s.owner == self.token) {
            slots.remove(&self.key);
            debug!(car_id = %self.key, "Session released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fota_core::ServiceType;
    use std::collections::BTreeMap;

    fn session(car_id: &str, port: u16) -> Session {
        Session::new(
            "ModelX",
            car_id,
            format!("127.0.0.1:{}", port).parse().unwrap(),
            ServiceType::CheckForUpdate,
            serde_json::Value::Null,
        )
    }

    #[test]
    fn test_claim_and_release() {
        let registry = SessionRegistry::new(false);
        let lease = registry.claim(session("MX2023-001", 1)).unwrap();
        assert!(lease.is_owner());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_sessions()[0].car_id, "MX2023-001");
        drop(lease);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_newer_claim_supersedes() {
        let registry = SessionRegistry::new(false);
        let old = registry.claim(session("MX2023-001", 1)).unwrap();
        let new = registry.claim(session("mx2023-001", 2)).unwrap();

        assert!(!old.is_owner());
        assert!(new.is_owner());

        // Writes from the superseded connection are ignored
        let mut stale = session("MX2023-001", 1);
        stale.metadata = serde_json::json!({"stale": true});
        assert!(!old.publish_session(&stale));
        let sessions = registry.active_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].peer.port(), 2);
        assert_eq!(sessions[0].metadata, serde_json::Value::Null);

        // Dropping the old lease leaves the newer slot intact
        drop(old);
        assert_eq!(registry.len(), 1);
        drop(new);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_rejected_when_configured() {
        let registry = SessionRegistry::new(true);
        let _first = registry.claim(session("MX2023-001", 1)).unwrap();
        let err = registry.claim(session("MX2023-001", 2)).unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[test]
    fn test_download_snapshot() {
        let registry = SessionRegistry::new(false);
        let lease = registry.claim(session("MX2023-001", 1)).unwrap();
        assert!(registry.active_downloads().is_empty());

        let download = DownloadRequest::new(
            "ModelX",
            "MX2023-001",
            "127.0.0.1:1".parse().unwrap(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(lease.publish_download(Some(&download)));
        assert_eq!(registry.active_downloads().len(), 1);
        lease.publish_download(None);
        assert!(registry.active_downloads().is_empty());
    }
}
