//! Concurrent session registry and the idle-session reaper

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use super::session::Session;
use crate::stream::params::StreamParams;
use crate::video::device;

/// Reaper sweep cadence
const REAP_INTERVAL: Duration = Duration::from_secs(10);

/// Concurrent map from device id to session. The map mutex guards only
/// lookups and inserts; capture teardown happens outside it.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        })
    }

    /// Look up a session, inserting a fresh one whose parameters become
    /// the device's first-comer lock. An existing session is returned
    /// unchanged, whatever the caller requested.
    pub fn get_or_create(&self, device_id: &str, params: StreamParams) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(device_id) {
            return session.clone();
        }
        info!("Creating session for {}", device_id);
        let session = Session::new(device_id.to_string(), params);
        sessions.insert(device_id.to_string(), session.clone());
        session
    }

    pub fn find(&self, device_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(device_id).cloned()
    }

    /// Refresh a session's idle timestamp
    pub fn touch(&self, device_id: &str) {
        if let Some(session) = self.find(device_id) {
            session.touch();
        }
    }

    /// Tear the session down if no client is attached. Called by each
    /// responder's guard on exit.
    pub fn release_if_idle(&self, device_id: &str) {
        let evicted = {
            let mut sessions = self.sessions.lock();
            match sessions.get(device_id) {
                Some(session) if session.client_count() == 0 => sessions.remove(device_id),
                _ => None,
            }
        };
        if let Some(session) = evicted {
            info!("Releasing idle session {}", device_id);
            session.capture.stop();
        }
    }

    /// One reaper sweep: evict sessions with no clients that have been
    /// idle past the configured threshold.
    pub fn reap_idle(&self) {
        let evicted: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock();
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.client_count() == 0 && s.idle_for() > self.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            expired
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect()
        };
        for session in evicted {
            info!("Reaping idle session {}", session.device_id);
            session.capture.stop();
        }
    }

    /// Enumerate capture devices via the OS adapter
    pub fn list_devices(&self) -> Vec<String> {
        device::list_devices()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Spawn the reaper task. It holds only a weak handle, so it exits
    /// once the registry is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            reaper_loop(registry).await;
        })
    }
}

async fn reaper_loop(registry: Weak<SessionRegistry>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(registry) = registry.upgrade() else {
            debug!("Session registry dropped, reaper exiting");
            return;
        };
        // Capture teardown joins a thread; keep it off the async workers.
        let _ = tokio::task::spawn_blocking(move || registry.reap_idle()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(timeout: Duration) -> Arc<SessionRegistry> {
        SessionRegistry::new(timeout)
    }

    #[test]
    fn test_get_or_create_locks_first_comer_params() {
        let registry = registry(Duration::from_secs(10));
        let first = StreamParams {
            codec: crate::stream::params::Codec::H264,
            ..StreamParams::default()
        };
        let a = registry.get_or_create("video0", first.clone());
        // Second requester asks for different params; the session keeps
        // the first-comer lock.
        let b = registry.get_or_create("video0", StreamParams::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.params().codec, crate::stream::params::Codec::H264);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_release_if_idle_respects_attached_clients() {
        let registry = registry(Duration::from_secs(10));
        let session = registry.get_or_create("video0", StreamParams::default());
        session.attach();

        registry.release_if_idle("video0");
        assert_eq!(registry.session_count(), 1);

        session.detach();
        registry.release_if_idle("video0");
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_reaper_evicts_only_idle_sessions() {
        // Zero threshold: any elapsed idle time is past it.
        let registry = registry(Duration::ZERO);
        let busy = registry.get_or_create("video0", StreamParams::default());
        busy.attach();
        registry.get_or_create("video1", StreamParams::default());

        std::thread::sleep(Duration::from_millis(5));
        registry.reap_idle();

        assert!(registry.find("video0").is_some());
        assert!(registry.find("video1").is_none());
        busy.detach();
    }

    #[test]
    fn test_reaper_spares_recently_touched_sessions() {
        let registry = registry(Duration::from_secs(3600));
        registry.get_or_create("video0", StreamParams::default());
        registry.reap_idle();
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_find_missing() {
        let registry = registry(Duration::from_secs(10));
        assert!(registry.find("video9").is_none());
    }

    #[tokio::test]
    async fn test_reaper_exits_when_registry_dropped() {
        let registry = registry(Duration::from_secs(10));
        let handle = registry.spawn_reaper();
        drop(registry);
        // First tick fires immediately, upgrade fails, task returns.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper should exit")
            .expect("reaper should not panic");
    }
}
