use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cadence_audio::CliEngineConfig;
use cadence_core::ServiceConfig;

/// High-level configuration for the speech console
#[derive(Clone, Debug)]
pub struct SpeechConsoleConfig {
    pub service: ServiceConfig,
    pub engine: CliEngineConfig,
    pub focus: FocusConfig,
    /// Event names printed to stdout (empty = all)
    pub events: Vec<String>,
}

/// Shell commands run around speech to duck other audio
#[derive(Clone, Debug)]
pub struct FocusConfig {
    pub duck_cmd: Option<String>,
    pub unduck_cmd: Option<String>,
}

impl Default for FocusConfig {
    fn default() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|s| !s.trim().is_empty());
        Self {
            duck_cmd: var("TTS_DUCK_CMD"),
            unduck_cmd: var("TTS_UNDUCK_CMD"),
        }
    }
}

impl Default for SpeechConsoleConfig {
    fn default() -> Self {
        // Module defaults already consider env vars
        Self {
            service: ServiceConfig::default(),
            engine: CliEngineConfig::default(),
            focus: FocusConfig::default(),
            events: std::env::var("SPEECH_CONSOLE_EVENTS")
                .map(|s| {
                    s.split(',')
                        .map(|e| e.trim().to_string())
                        .filter(|e| !e.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

impl SpeechConsoleConfig {
    /// Load configuration from a TOML file (path via SPEECH_CONSOLE_CONFIG or ./speech_console.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("SPEECH_CONSOLE_CONFIG")
            .unwrap_or_else(|_| "speech_console.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "speech_console", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target: "speech_console", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "speech_console", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml(s: &str, base: Self) -> Result<Self, toml::de::Error> {
        Ok(toml::from_str::<SpeechConsoleToml>(s)?.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SpeechConsoleToml {
    pub events: Option<Vec<String>>,
    pub speech: Option<SpeechToml>,
    pub engine: Option<EngineToml>,
    pub apply: Option<ApplyToml>,
    pub focus: Option<FocusToml>,
}

impl SpeechConsoleToml {
    fn overlay(self, mut base: SpeechConsoleConfig) -> SpeechConsoleConfig {
        if let Some(e) = self.events {
            base.events = e;
        }
        if let Some(s) = self.speech {
            s.apply(&mut base.service);
        }
        if let Some(e) = self.engine {
            e.apply(&mut base);
        }
        if let Some(a) = self.apply {
            a.apply(&mut base.service);
        }
        if let Some(f) = self.focus {
            f.apply(&mut base.focus);
        }
        base
    }
}

/// Global speech defaults; out-of-range values are clamped when merged
#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SpeechToml {
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
    pub ducking: Option<bool>,
    pub language: Option<String>,
    pub voice: Option<String>,
}

impl SpeechToml {
    fn apply(self, cfg: &mut ServiceConfig) {
        let patch = cadence_core::SpeechOptions {
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
            ducking: self.ducking,
            language: self.language,
            voice: self.voice,
        };
        cfg.defaults = cfg.defaults.merged(&patch);
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct EngineToml {
    pub preference: Option<String>,
    pub player: Option<String>,
    pub temp_dir: Option<PathBuf>,
    pub sample_rate: Option<u32>,
    pub max_input_chars: Option<usize>,
    pub piper_bin: Option<PathBuf>,
    pub piper_voice: Option<PathBuf>,
    pub piper_voice_dir: Option<PathBuf>,
    pub espeak_bin: Option<PathBuf>,
    pub voice_installer: Option<String>,
}

impl EngineToml {
    fn apply(self, base: &mut SpeechConsoleConfig) {
        if let Some(v) = self.preference {
            base.service.engine_preference = Some(v);
        }
        let engine = &mut base.engine;
        if let Some(v) = self.player {
            engine.player = Some(v);
        }
        if let Some(v) = self.temp_dir {
            engine.temp_dir = v;
        }
        if let Some(v) = self.sample_rate {
            engine.sample_rate = v;
        }
        if let Some(v) = self.max_input_chars {
            engine.max_input_chars = v;
        }
        if let Some(v) = self.piper_bin {
            engine.piper_bin = Some(v);
        }
        if let Some(v) = self.piper_voice {
            engine.piper_voice = Some(v);
        }
        if let Some(v) = self.piper_voice_dir {
            engine.piper_voice_dir = Some(v);
        }
        if let Some(v) = self.espeak_bin {
            engine.espeak_bin = Some(v);
        }
        if let Some(v) = self.voice_installer {
            engine.voice_installer = Some(v);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ApplyToml {
    pub initial_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl ApplyToml {
    fn apply(self, cfg: &mut ServiceConfig) {
        if let Some(v) = self.initial_delay_ms {
            cfg.global_apply.initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.max_retries {
            cfg.global_apply.max_retries = v;
        }
        if let Some(v) = self.retry_delay_ms {
            cfg.global_apply.retry_delay = Duration::from_millis(v);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct FocusToml {
    pub duck_cmd: Option<String>,
    pub unduck_cmd: Option<String>,
}

impl FocusToml {
    fn apply(self, cfg: &mut FocusConfig) {
        if let Some(v) = self.duck_cmd {
            cfg.duck_cmd = Some(v);
        }
        if let Some(v) = self.unduck_cmd {
            cfg.unduck_cmd = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SpeechConsoleConfig {
        SpeechConsoleConfig {
            service: ServiceConfig::default(),
            engine: CliEngineConfig::console(),
            focus: FocusConfig {
                duck_cmd: None,
                unduck_cmd: None,
            },
            events: Vec::new(),
        }
    }

    #[test]
    fn test_overlay_sections() {
        let toml = r#"
events = ["onStart", "onFinish"]

[speech]
rate = 1.5
pitch = 9.0
language = "de-DE"

[engine]
preference = "espeak-ng"
max_input_chars = 120

[apply]
max_retries = 2
retry_delay_ms = 100
"#;
        let cfg = SpeechConsoleConfig::from_toml(toml, base()).unwrap();
        assert_eq!(cfg.events, vec!["onStart", "onFinish"]);
        assert_eq!(cfg.service.defaults.rate, 1.5);
        assert_eq!(cfg.service.defaults.pitch, 2.0);
        assert_eq!(cfg.service.defaults.language, "de-DE");
        assert_eq!(cfg.service.engine_preference.as_deref(), Some("espeak-ng"));
        assert_eq!(cfg.engine.max_input_chars, 120);
        assert_eq!(cfg.service.global_apply.max_retries, 2);
        assert_eq!(
            cfg.service.global_apply.retry_delay,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_empty_toml_keeps_base() {
        let cfg = SpeechConsoleConfig::from_toml("", base()).unwrap();
        assert!(cfg.events.is_empty());
        assert_eq!(cfg.engine.max_input_chars, 4_000);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(SpeechConsoleConfig::from_toml("speech = 3", base()).is_err());
    }
}
