//! RAII client attachment

use std::sync::Arc;

use super::registry::SessionRegistry;
use super::session::Session;

/// Holds one client's attachment to a session. Construction increments
/// the client count; dropping decrements it and releases the session if
/// no clients remain. The drop is the single exit path shared by clean
/// disconnects, mid-stream errors and panics, so the count can never
/// leak.
pub struct ClientGuard {
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
}

impl ClientGuard {
    pub fn new(session: Arc<Session>, registry: Arc<SessionRegistry>) -> Self {
        session.attach();
        Self { session, registry }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.session.detach();
        self.registry.release_if_idle(&self.session.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::params::StreamParams;
    use std::time::Duration;

    #[test]
    fn test_guard_detaches_and_releases() {
        let registry = SessionRegistry::new(Duration::from_secs(10));
        let session = registry.get_or_create("video0", StreamParams::default());

        {
            let _guard = ClientGuard::new(session.clone(), registry.clone());
            assert_eq!(session.client_count(), 1);
            // A second client on the same session.
            let _second = ClientGuard::new(session.clone(), registry.clone());
            assert_eq!(session.client_count(), 2);
        }

        assert_eq!(session.client_count(), 0);
        // Last guard out released the idle session.
        assert!(registry.find("video0").is_none());
    }

    #[test]
    fn test_guard_runs_on_panic() {
        let registry = SessionRegistry::new(Duration::from_secs(10));
        let session = registry.get_or_create("video0", StreamParams::default());

        let registry_clone = registry.clone();
        let session_clone = session.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = ClientGuard::new(session_clone, registry_clone);
            panic!("responder blew up");
        }));
        assert!(result.is_err());
        assert_eq!(session.client_count(), 0);
        assert!(registry.find("video0").is_none());
    }
}
