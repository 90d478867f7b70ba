//! Audio focus through user-supplied shell commands.
//!
//! Env:
//! - TTS_DUCK_CMD: run when speech starts (e.g. `pactl set-sink-volume @DEFAULT_SINK@ 40%`)
//! - TTS_UNDUCK_CMD: run when speech ends

use cadence_core::{AudioFocus, FocusHandle, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
pub struct CommandAudioFocus {
    duck_cmd: Option<String>,
    unduck_cmd: Option<String>,
    next_handle: AtomicU64,
}

impl CommandAudioFocus {
    pub fn new(duck_cmd: Option<String>, unduck_cmd: Option<String>) -> Self {
        Self {
            duck_cmd,
            unduck_cmd,
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|s| !s.trim().is_empty());
        Self::new(var("TTS_DUCK_CMD"), var("TTS_UNDUCK_CMD"))
    }

    fn run(cmd: Option<&str>) -> Result<()> {
        let Some(cmd) = cmd else {
            return Ok(());
        };
        debug!(target: "audio_focus", command = cmd, "Running focus command");
        // Not awaited; tokio reaps the child in the background
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .spawn()?;
        Ok(())
    }
}

impl AudioFocus for CommandAudioFocus {
    fn request_transient_duck(&self) -> Result<FocusHandle> {
        Self::run(self.duck_cmd.as_deref())?;
        Ok(FocusHandle(self.next_handle.fetch_add(1, Ordering::Relaxed)))
    }

    fn release_duck(&self, _handle: FocusHandle) -> Result<()> {
        Self::run(self.unduck_cmd.as_deref())
    }
}
