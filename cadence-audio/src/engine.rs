//! Speech engine backed by local command-line synthesizers.
//!
//! Graceful degradation, best first:
//! - Piper (higher quality, requires a voice model)
//! - espeak-ng (widely available)
//! - console: no synthesizer, the text is logged and reported as spoken
//!
//! Env overrides:
//! - PIPER_BIN, PIPER_VOICE, PIPER_VOICE_DIR
//! - ESPEAK_BIN
//! - TTS_TEMP_DIR, TTS_PLAYER, TTS_SAMPLE_RATE
//! - TTS_VOICE_INSTALLER, TTS_MAX_INPUT_CHARS
//!
//! Utterances are played one at a time by a worker task. Each is synthesized
//! to a temporary WAV and handed to aplay/paplay/ffplay; `stop` and flush-mode
//! submissions bump a cancel generation that kills the running player and
//! discards anything queued before it.

use crate::progress::{schedule, word_spans};
use crate::synth::{
    get_from_env_or_path, get_from_path, player_command, resolve_piper_model, scale_pcm16,
    select_player, synth_with_espeak, synth_with_piper, wav_duration, VoiceParams,
};
use crate::voices::{parse_espeak_voices, scan_piper_voices};
use async_trait::async_trait;
use cadence_core::utils::gen_id;
use cadence_core::{
    EngineEvent, EngineEventSender, EngineInfo, Result, SpeakMode, SpeechEngine, SpeechError,
    Voice,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{self, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Serialize)]
pub struct CliEngineConfig {
    pub temp_dir: PathBuf,
    pub sample_rate: u32,
    pub piper_bin: Option<PathBuf>,
    pub piper_voice: Option<PathBuf>,
    pub piper_voice_dir: Option<PathBuf>,
    pub espeak_bin: Option<PathBuf>,
    /// Preferred player binary (aplay, paplay, ffplay)
    pub player: Option<String>,
    /// Shell command that opens a voice-data installer
    pub voice_installer: Option<String>,
    pub max_input_chars: usize,
}

impl Default for CliEngineConfig {
    fn default() -> Self {
        let temp_dir = std::env::var("TTS_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        let sample_rate = std::env::var("TTS_SAMPLE_RATE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(16_000);
        let max_input_chars = std::env::var("TTS_MAX_INPUT_CHARS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(4_000);

        let piper_bin = get_from_env_or_path("PIPER_BIN", "piper");
        let piper_voice = std::env::var("PIPER_VOICE").ok().map(PathBuf::from);
        let piper_voice_dir = std::env::var("PIPER_VOICE_DIR").ok().map(PathBuf::from);
        let espeak_bin =
            get_from_env_or_path("ESPEAK_BIN", "espeak-ng").or_else(|| get_from_path("espeak"));

        Self {
            temp_dir,
            sample_rate,
            piper_bin,
            piper_voice,
            piper_voice_dir,
            espeak_bin,
            player: std::env::var("TTS_PLAYER").ok().filter(|s| !s.is_empty()),
            voice_installer: std::env::var("TTS_VOICE_INSTALLER")
                .ok()
                .filter(|s| !s.is_empty()),
            max_input_chars,
        }
    }
}

impl CliEngineConfig {
    /// No synthesizers at all; utterances are only logged.
    pub fn console() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            sample_rate: 16_000,
            piper_bin: None,
            piper_voice: None,
            piper_voice_dir: None,
            espeak_bin: None,
            player: None,
            voice_installer: None,
            max_input_chars: 4_000,
        }
    }

    /// Engines usable with this configuration, best first
    pub fn available_engines(&self) -> Vec<EngineKind> {
        let mut engines = Vec::new();
        if self.piper_bin.is_some() && (self.piper_voice.is_some() || self.piper_voice_dir.is_some())
        {
            engines.push(EngineKind::Piper);
        }
        if self.espeak_bin.is_some() {
            engines.push(EngineKind::Espeak);
        }
        engines.push(EngineKind::Console);
        engines
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EngineKind {
    Piper,
    Espeak,
    Console,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Piper => "piper",
            EngineKind::Espeak => "espeak-ng",
            EngineKind::Console => "none",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EngineKind::Piper => "Piper",
            EngineKind::Espeak => "eSpeak NG",
            EngineKind::Console => "Console (no audio)",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "piper" => Some(EngineKind::Piper),
            "espeak-ng" | "espeak" => Some(EngineKind::Espeak),
            "none" | "console" => Some(EngineKind::Console),
            _ => None,
        }
    }
}

struct Job {
    id: String,
    text: String,
    params: VoiceParams,
    generation: u64,
}

struct Worker {
    jobs: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

pub struct CliSpeechEngine {
    cfg: CliEngineConfig,
    kind: std::sync::RwLock<EngineKind>,
    params: Mutex<VoiceParams>,
    ready: AtomicBool,
    speaking: Arc<AtomicBool>,
    cancel: watch::Sender<u64>,
    worker: Mutex<Option<Worker>>,
}

impl CliSpeechEngine {
    pub fn new(cfg: Option<CliEngineConfig>) -> Self {
        let cfg = cfg.unwrap_or_default();
        // Log detected engines once
        if let Some(ref p) = cfg.piper_bin {
            info!(target: "cli_engine", bin = ?p, "Detected Piper binary");
        }
        if let Some(ref e) = cfg.espeak_bin {
            info!(target: "cli_engine", bin = ?e, "Detected espeak-ng binary");
        }
        let initial = cfg
            .available_engines()
            .first()
            .copied()
            .unwrap_or(EngineKind::Console);
        let (cancel, _) = watch::channel(0u64);
        Self {
            cfg,
            kind: std::sync::RwLock::new(initial),
            params: Mutex::new(VoiceParams::default()),
            ready: AtomicBool::new(false),
            speaking: Arc::new(AtomicBool::new(false)),
            cancel,
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CliEngineConfig {
        &self.cfg
    }

    pub fn kind(&self) -> EngineKind {
        match self.kind.read() {
            Ok(kind) => *kind,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_kind(&self, kind: EngineKind) {
        match self.kind.write() {
            Ok(mut guard) => *guard = kind,
            Err(poisoned) => *poisoned.into_inner() = kind,
        }
    }

    fn bump_generation(&self) {
        self.cancel.send_modify(|g| *g = g.wrapping_add(1));
    }

    async fn stop_worker(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            drop(worker.jobs);
            worker.handle.abort();
        }
        self.speaking.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechEngine for CliSpeechEngine {
    async fn initialize(&self, preference: Option<&str>, events: EngineEventSender) -> Result<()> {
        let available = self.cfg.available_engines();
        let kind = match preference {
            Some(name) => EngineKind::from_name(name)
                .filter(|k| available.contains(k))
                .ok_or_else(|| {
                    SpeechError::EngineUnavailable(format!("engine '{}' is not installed", name))
                })?,
            None => available.first().copied().unwrap_or(EngineKind::Console),
        };

        self.bump_generation();
        self.stop_worker().await;
        self.set_kind(kind);

        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            cfg: self.cfg.clone(),
            kind,
            events,
            speaking: Arc::clone(&self.speaking),
            cancel: self.cancel.subscribe(),
        };
        let handle = tokio::spawn(run_worker(ctx, rx));
        *self.worker.lock().await = Some(Worker { jobs: tx, handle });
        self.ready.store(true, Ordering::SeqCst);
        info!(target: "cli_engine", engine = kind.name(), "Speech engine ready");
        Ok(())
    }

    async fn speak(&self, text: &str, mode: SpeakMode, id: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(SpeechError::EngineUnavailable(
                "engine not initialized".to_string(),
            ));
        }
        if mode == SpeakMode::Flush {
            self.bump_generation();
        }
        let job = Job {
            id: id.to_string(),
            text: text.to_string(),
            params: self.params.lock().await.clone(),
            generation: *self.cancel.borrow(),
        };
        let worker = self.worker.lock().await;
        let worker = worker
            .as_ref()
            .ok_or_else(|| SpeechError::EngineUnavailable("speech worker not running".into()))?;
        worker
            .jobs
            .send(job)
            .map_err(|_| SpeechError::Engine("speech worker stopped".to_string()))
    }

    async fn stop(&self) -> Result<()> {
        self.bump_generation();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        self.bump_generation();
        self.stop_worker().await;
        info!(target: "cli_engine", "Speech engine shut down");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        match self.kind() {
            EngineKind::Espeak => {
                let Some(bin) = self.cfg.espeak_bin.as_ref() else {
                    return Ok(Vec::new());
                };
                let output = tokio::process::Command::new(bin)
                    .arg("--voices")
                    .output()
                    .await?;
                Ok(parse_espeak_voices(&String::from_utf8_lossy(&output.stdout)))
            }
            EngineKind::Piper => {
                let mut voices = match self.cfg.piper_voice_dir.as_deref() {
                    Some(dir) => scan_piper_voices(dir)?,
                    None => Vec::new(),
                };
                if let Some(model) = self.cfg.piper_voice.as_deref() {
                    if let Some(stem) = model.file_stem().and_then(|s| s.to_str()) {
                        if !voices.iter().any(|v| v.id == stem) {
                            voices.push(Voice {
                                id: stem.to_string(),
                                name: stem.to_string(),
                                locale: crate::voices::piper_locale(stem),
                                quality: 400,
                                latency: 300,
                                network_required: false,
                                not_installed: false,
                            });
                        }
                    }
                }
                Ok(voices)
            }
            EngineKind::Console => Ok(vec![Voice {
                id: "console".to_string(),
                name: "Console".to_string(),
                locale: self.params.lock().await.language.clone(),
                quality: 100,
                latency: 100,
                network_required: false,
                not_installed: false,
            }]),
        }
    }

    async fn list_engines(&self) -> Result<Vec<EngineInfo>> {
        Ok(self
            .cfg
            .available_engines()
            .into_iter()
            .map(|k| EngineInfo {
                name: k.name().to_string(),
                label: k.label().to_string(),
            })
            .collect())
    }

    fn default_engine_name(&self) -> String {
        self.kind().name().to_string()
    }

    async fn set_language(&self, locale: &str) -> Result<()> {
        let locale = locale.trim();
        if locale.is_empty() {
            return Err(SpeechError::Engine("empty language tag".to_string()));
        }
        self.params.lock().await.language = locale.to_string();
        Ok(())
    }

    async fn set_pitch(&self, pitch: f32) -> Result<()> {
        self.params.lock().await.pitch = pitch;
        Ok(())
    }

    async fn set_rate(&self, rate: f32) -> Result<()> {
        self.params.lock().await.rate = rate;
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        self.params.lock().await.volume = volume;
        Ok(())
    }

    async fn set_voice(&self, voice_id: &str) -> Result<()> {
        if self.kind() != EngineKind::Console {
            let voices = self.list_voices().await?;
            if !voices.iter().any(|v| v.id == voice_id) {
                return Err(SpeechError::Engine(format!("unknown voice '{}'", voice_id)));
            }
        }
        self.params.lock().await.voice = Some(voice_id.to_string());
        Ok(())
    }

    fn max_input_length(&self) -> usize {
        self.cfg.max_input_chars
    }

    async fn open_voice_installer(&self) -> Result<()> {
        let Some(cmd) = self.cfg.voice_installer.as_deref() else {
            return Err(SpeechError::ExternalActivityUnavailable(
                "no voice installer configured (TTS_VOICE_INSTALLER)".to_string(),
            ));
        };
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .spawn()
            .map_err(|e| SpeechError::ExternalActivityUnavailable(e.to_string()))?;
        info!(target: "cli_engine", command = cmd, "Launched voice installer");
        Ok(())
    }
}

enum Outcome {
    Finished,
    Interrupted,
    Failed(String),
}

struct WorkerContext {
    cfg: CliEngineConfig,
    kind: EngineKind,
    events: EngineEventSender,
    speaking: Arc<AtomicBool>,
    cancel: watch::Receiver<u64>,
}

impl WorkerContext {
    fn emit(&self, event: EngineEvent) {
        // The service may already be gone
        let _ = self.events.send(event);
    }
}

async fn run_worker(mut ctx: WorkerContext, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let current = *ctx.cancel.borrow_and_update();
        if job.generation != current {
            debug!(target: "cli_engine", id = %job.id, "Discarding flushed utterance");
            ctx.emit(EngineEvent::Stopped {
                id: job.id,
                interrupted: false,
            });
            continue;
        }

        ctx.speaking.store(true, Ordering::SeqCst);
        let outcome = play(&mut ctx, &job).await;
        ctx.speaking.store(false, Ordering::SeqCst);

        let event = match outcome {
            Outcome::Finished => EngineEvent::Done { id: job.id },
            Outcome::Interrupted => EngineEvent::Stopped {
                id: job.id,
                interrupted: true,
            },
            Outcome::Failed(message) => {
                warn!(target: "cli_engine", id = %job.id, %message, "Utterance failed");
                EngineEvent::Error {
                    id: job.id,
                    message,
                }
            }
        };
        ctx.emit(event);
    }
    debug!(target: "cli_engine", "Speech worker exiting");
}

async fn play(ctx: &mut WorkerContext, job: &Job) -> Outcome {
    if ctx.kind == EngineKind::Console {
        info!(target: "cli_engine", id = %job.id, text = %job.text, "No TTS engine, printing only");
        ctx.emit(EngineEvent::Started { id: job.id.clone() });
        for (start, end) in word_spans(&job.text) {
            ctx.emit(EngineEvent::Progress {
                id: job.id.clone(),
                start,
                end,
            });
        }
        return Outcome::Finished;
    }

    let wav_path = ctx.cfg.temp_dir.join(format!("cadence_{}.wav", gen_id()));
    let outcome = synthesize_and_play(ctx, job, &wav_path).await;
    if let Err(e) = tokio::fs::remove_file(&wav_path).await {
        debug!(target: "cli_engine", error = %e, path = ?wav_path, "Temp WAV not removed");
    }
    outcome
}

async fn synthesize_and_play(ctx: &mut WorkerContext, job: &Job, wav_path: &Path) -> Outcome {
    let synth = {
        let cfg = ctx.cfg.clone();
        let kind = ctx.kind;
        let params = job.params.clone();
        let text = job.text.clone();
        let path = wav_path.to_path_buf();
        task::spawn_blocking(move || synthesize(&cfg, kind, &params, &text, &path))
    };
    let synthesized = tokio::select! {
        res = synth => res,
        _ = ctx.cancel.changed() => return Outcome::Interrupted,
    };
    match synthesized {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Outcome::Failed(e.to_string()),
        Err(e) => return Outcome::Failed(format!("synthesis task failed: {}", e)),
    }

    let mut audio = match tokio::fs::read(wav_path).await {
        Ok(bytes) => bytes,
        Err(e) => return Outcome::Failed(format!("synthesized audio unreadable: {}", e)),
    };
    // Piper has no amplitude flag
    if ctx.kind == EngineKind::Piper && (job.params.volume - 1.0).abs() > f32::EPSILON {
        scale_pcm16(&mut audio, job.params.volume);
        if let Err(e) = tokio::fs::write(wav_path, &audio).await {
            warn!(target: "cli_engine", error = %e, "Failed to scale volume for WAV");
        }
    }
    let marks = schedule(&job.text, wav_duration(&audio).unwrap_or_default());

    let Some(player) = select_player(ctx.cfg.player.as_deref()) else {
        info!(target: "cli_engine", path = ?wav_path, "No audio player found; skipping playback");
        ctx.emit(EngineEvent::Started { id: job.id.clone() });
        for (_, start, end) in marks {
            ctx.emit(EngineEvent::Progress {
                id: job.id.clone(),
                start,
                end,
            });
        }
        return Outcome::Finished;
    };

    let mut child = match player_command(&player, wav_path).spawn() {
        Ok(child) => child,
        Err(e) => return Outcome::Failed(format!("failed to start {:?}: {}", player, e)),
    };
    ctx.emit(EngineEvent::Started { id: job.id.clone() });

    let started = Instant::now();
    let mut marks = marks.into_iter().peekable();
    loop {
        let next_at = marks.peek().map(|(at, _, _)| started + *at);
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(s) if s.success() => Outcome::Finished,
                    Ok(s) => Outcome::Failed(format!("player exited with {}", s)),
                    Err(e) => Outcome::Failed(e.to_string()),
                };
            }
            _ = ctx.cancel.changed() => {
                if let Err(e) = child.kill().await {
                    warn!(target: "cli_engine", error = %e, "Failed to kill player");
                }
                return Outcome::Interrupted;
            }
            _ = sleep_until(next_at) => {
                if let Some((_, start, end)) = marks.next() {
                    ctx.emit(EngineEvent::Progress { id: job.id.clone(), start, end });
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn synthesize(
    cfg: &CliEngineConfig,
    kind: EngineKind,
    params: &VoiceParams,
    text: &str,
    out_wav: &Path,
) -> Result<()> {
    match kind {
        EngineKind::Piper => {
            let piper = cfg
                .piper_bin
                .as_deref()
                .ok_or_else(|| SpeechError::EngineUnavailable("Piper binary not found".into()))?;
            let model = resolve_piper_model(
                cfg.piper_voice.as_deref(),
                cfg.piper_voice_dir.as_deref(),
                params.voice.as_deref(),
            )
            .or_else(|| {
                let dir = cfg.piper_voice_dir.as_deref()?;
                let voices = scan_piper_voices(dir).ok()?;
                let voice = voices
                    .iter()
                    .find(|v| v.matches_language(&params.language))
                    .or_else(|| voices.first())?;
                Some(dir.join(format!("{}.onnx", voice.id)))
            })
            .ok_or_else(|| {
                SpeechError::Engine("Piper voice not found; set PIPER_VOICE or PIPER_VOICE_DIR".into())
            })?;
            synth_with_piper(piper, &model, params, cfg.sample_rate, text, out_wav)
        }
        EngineKind::Espeak => {
            let espeak = cfg
                .espeak_bin
                .as_deref()
                .ok_or_else(|| SpeechError::EngineUnavailable("espeak-ng not found".into()))?;
            synth_with_espeak(espeak, params, text, out_wav)
        }
        EngineKind::Console => Ok(()),
    }
}
