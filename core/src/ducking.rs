//! Transient audio-focus reduction around playback.

use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque grant returned by the platform focus subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FocusHandle(pub u64);

/// Platform audio-focus collaborator, scoped to speech/accessibility usage
#[cfg_attr(test, mockall::automock)]
pub trait AudioFocus: Send + Sync {
    fn request_transient_duck(&self) -> Result<FocusHandle>;

    fn release_duck(&self, handle: FocusHandle) -> Result<()>;
}

/// Focus collaborator for hosts without a mixer to duck
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudioFocus;

impl AudioFocus for NoopAudioFocus {
    fn request_transient_duck(&self) -> Result<FocusHandle> {
        Ok(FocusHandle(0))
    }

    fn release_duck(&self, _handle: FocusHandle) -> Result<()> {
        Ok(())
    }
}

pub struct DuckingSession {
    focus: Arc<dyn AudioFocus>,
    handle: Option<FocusHandle>,
}

impl DuckingSession {
    pub fn new(focus: Arc<dyn AudioFocus>) -> Self {
        Self {
            focus,
            handle: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Request ducking for the upcoming utterance. No-op when `enabled` is false
    /// or a grant is already held.
    pub fn activate(&mut self, enabled: bool) {
        if !enabled || self.handle.is_some() {
            return;
        }
        match self.focus.request_transient_duck() {
            Ok(handle) => {
                debug!(target: "ducking", ?handle, "Audio focus granted");
                self.handle = Some(handle);
            }
            Err(e) => warn!(target: "ducking", error = %e, "Audio focus request failed"),
        }
    }

    /// Release the grant if one is held. Safe to call repeatedly.
    pub fn deactivate(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.focus.release_duck(handle) {
            Ok(()) => debug!(target: "ducking", ?handle, "Audio focus released"),
            Err(e) => warn!(target: "ducking", error = %e, "Audio focus release failed"),
        }
    }
}
