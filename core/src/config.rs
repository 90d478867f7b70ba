//! Global speech options and service tuning.
//!
//! `SpeechConfig` is the complete set of options the engine is driven with.
//! `SpeechOptions` is a patch: every field optional, clamped field by field
//! before it is merged, so a bad value in one field never blocks the others.

use crate::applier::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const RATE_MIN: f32 = 0.1;
pub const RATE_MAX: f32 = 2.0;
pub const PITCH_MIN: f32 = 0.1;
pub const PITCH_MAX: f32 = 2.0;
pub const VOLUME_MIN: f32 = 0.0;
pub const VOLUME_MAX: f32 = 1.0;

/// Fully resolved speech options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub ducking: bool,
    /// BCP-47 style locale tag, e.g. `en-US`
    pub language: String,
    pub voice: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            ducking: false,
            language: "en-US".to_string(),
            voice: None,
        }
    }
}

/// Option patch accepted from callers (global `configure` or per-utterance override)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechOptions {
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
    pub ducking: Option<bool>,
    pub language: Option<String>,
    /// An empty string clears a previously selected voice.
    pub voice: Option<String>,
}

impl SpeechOptions {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl SpeechConfig {
    /// Overlay `patch` on a copy of `self`.
    pub fn merged(&self, patch: &SpeechOptions) -> SpeechConfig {
        let mut next = self.clone();
        if let Some(v) = clamp_field("rate", patch.rate, RATE_MIN, RATE_MAX) {
            next.rate = v;
        }
        if let Some(v) = clamp_field("pitch", patch.pitch, PITCH_MIN, PITCH_MAX) {
            next.pitch = v;
        }
        if let Some(v) = clamp_field("volume", patch.volume, VOLUME_MIN, VOLUME_MAX) {
            next.volume = v;
        }
        if let Some(d) = patch.ducking {
            next.ducking = d;
        }
        if let Some(lang) = patch.language.as_deref().map(str::trim) {
            if lang.is_empty() {
                warn!(target: "config", "Ignoring empty language tag");
            } else {
                next.language = lang.to_string();
            }
        }
        if let Some(voice) = patch.voice.as_deref().map(str::trim) {
            next.voice = if voice.is_empty() {
                None
            } else {
                Some(voice.to_string())
            };
        }
        next
    }
}

fn clamp_field(name: &'static str, value: Option<f32>, min: f32, max: f32) -> Option<f32> {
    let v = value?;
    if !v.is_finite() {
        warn!(target: "config", field = name, value = %v, "Ignoring non-finite option value");
        return None;
    }
    Some(v.clamp(min, max))
}

/// Holds the current global options; mutated only through validated merges.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    defaults: SpeechConfig,
    current: SpeechConfig,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(SpeechConfig::default())
    }
}

impl ConfigStore {
    pub fn new(defaults: SpeechConfig) -> Self {
        Self {
            current: defaults.clone(),
            defaults,
        }
    }

    pub fn current(&self) -> &SpeechConfig {
        &self.current
    }

    /// Merge a patch into the global options and return the result
    pub fn merge(&mut self, patch: &SpeechOptions) -> SpeechConfig {
        self.current = self.current.merged(patch);
        self.current.clone()
    }

    /// Restore the startup defaults
    pub fn reset(&mut self) -> SpeechConfig {
        self.current = self.defaults.clone();
        self.current.clone()
    }

    /// Global options with per-utterance overrides applied; the store is untouched.
    pub fn effective(&self, overrides: Option<&SpeechOptions>) -> SpeechConfig {
        match overrides {
            Some(patch) => self.current.merged(patch),
            None => self.current.clone(),
        }
    }
}

/// Service tuning, read from the environment with defaults
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Engine name passed to `SpeechEngine::initialize`
    pub engine_preference: Option<String>,
    /// Options the store starts from (and `reset_to_defaults` returns to)
    pub defaults: SpeechConfig,
    /// Grace-period retry for pushing global options after startup / queue drain
    pub global_apply: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let ms = |key: &str, fallback: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(fallback)
        };
        let global_apply = RetryPolicy {
            initial_delay: Duration::from_millis(ms("CADENCE_APPLY_INITIAL_DELAY_MS", 500)),
            max_retries: std::env::var("CADENCE_APPLY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(5),
            retry_delay: Duration::from_millis(ms("CADENCE_APPLY_RETRY_DELAY_MS", 250)),
        };

        let mut defaults = SpeechConfig::default();
        if let Some(lang) = std::env::var("CADENCE_LANGUAGE")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            defaults.language = lang.trim().to_string();
        }

        Self {
            engine_preference: std::env::var("CADENCE_ENGINE")
                .ok()
                .filter(|s| !s.is_empty()),
            defaults,
            global_apply,
        }
    }
}
