//! Synthesis engine capability.
//!
//! The engine speaks one utterance at a time. `speak` and `stop` only submit
//! work; completion is observed later through [`EngineEvent`]s delivered on the
//! channel handed over at `initialize`. Parameters set through the setters are
//! captured when an utterance is submitted, so changing them never alters one
//! that is already playing.

use crate::{Result, SpeechError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How a submission interacts with utterances already queued at the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeakMode {
    /// Queue behind whatever the engine already has pending
    Append,
    /// Discard anything queued or playing, then speak
    Flush,
}

/// Lifecycle callbacks emitted by an engine, keyed by utterance id
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    Started { id: String },
    /// `start..end` is a char span relative to the submitted text
    Progress { id: String, start: usize, end: usize },
    Done { id: String },
    Error { id: String, message: String },
    Stopped { id: String, interrupted: bool },
}

impl EngineEvent {
    pub fn id(&self) -> &str {
        match self {
            EngineEvent::Started { id }
            | EngineEvent::Progress { id, .. }
            | EngineEvent::Done { id }
            | EngineEvent::Error { id, .. }
            | EngineEvent::Stopped { id, .. } => id,
        }
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub locale: String,
    /// 0-500, higher is better
    pub quality: u32,
    /// 0-500, higher is slower
    pub latency: u32,
    pub network_required: bool,
    pub not_installed: bool,
}

impl Voice {
    /// Locale prefix match: `en` matches `en-US` and `en_GB`, `en-us` matches `en_US`.
    pub fn matches_language(&self, filter: &str) -> bool {
        let want = normalize_locale(filter);
        if want.is_empty() {
            return true;
        }
        let have = normalize_locale(&self.locale);
        have == want || have.starts_with(&format!("{}-", want))
    }
}

fn normalize_locale(tag: &str) -> String {
    tag.trim().replace('_', "-").to_lowercase()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub label: String,
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Connect to (or spawn) the engine. Returns once it is ready to accept utterances.
    async fn initialize(&self, preference: Option<&str>, events: EngineEventSender) -> Result<()>;

    async fn speak(&self, text: &str, mode: SpeakMode, id: &str) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    fn is_ready(&self) -> bool;

    fn is_speaking(&self) -> bool;

    fn supports_pause(&self) -> bool {
        true
    }

    async fn list_voices(&self) -> Result<Vec<Voice>>;

    async fn list_engines(&self) -> Result<Vec<EngineInfo>>;

    fn default_engine_name(&self) -> String;

    async fn set_language(&self, locale: &str) -> Result<()>;

    async fn set_pitch(&self, pitch: f32) -> Result<()>;

    async fn set_rate(&self, rate: f32) -> Result<()>;

    async fn set_volume(&self, volume: f32) -> Result<()>;

    async fn set_voice(&self, voice_id: &str) -> Result<()>;

    /// Longest text, in chars, a single utterance may carry
    fn max_input_length(&self) -> usize;

    async fn open_voice_installer(&self) -> Result<()> {
        Err(SpeechError::ExternalActivityUnavailable(
            "engine has no voice installer".to_string(),
        ))
    }
}
