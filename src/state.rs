//! Application-wide state shared across handlers

use std::sync::Arc;

use crate::session::SessionRegistry;
use crate::stream::params::Codec;

/// Shared handler state: the session registry plus the few settings
/// handlers need at request time.
pub struct AppState {
    /// Per-device session registry
    pub sessions: Arc<SessionRegistry>,
    /// Codec applied when a request names none
    pub default_codec: Codec,
}

impl AppState {
    pub fn new(sessions: Arc<SessionRegistry>, default_codec: Codec) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            default_codec,
        })
    }
}
