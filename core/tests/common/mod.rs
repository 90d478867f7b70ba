//! Shared fixtures for the service integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use cadence_core::{
    EngineEvent, EngineEventSender, EngineInfo, NoopAudioFocus, QoSLevel, Result, RetryPolicy,
    ServiceConfig, SpeakMode, SpeechConfig, SpeechEngine, SpeechError, SpeechEvent, SpeechService,
    Voice,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the service asked the engine to do, in order
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Initialize(Option<String>),
    Speak { id: String, text: String, mode: SpeakMode },
    Stop,
    Shutdown,
    Language(String),
    Voice(String),
    Rate(f32),
    Pitch(f32),
    Volume(f32),
}

/// Engine double: records calls and lets the test play the engine's callbacks.
pub struct ScriptedEngine {
    calls: Mutex<Vec<Call>>,
    events: Mutex<Option<EngineEventSender>>,
    current: Mutex<Option<String>>,
    ready: AtomicBool,
    pub fail_init: AtomicBool,
    pub init_delay: Mutex<Duration>,
    /// `set_language` fails this many more times
    pub language_failures: AtomicUsize,
    pub supports_pause: AtomicBool,
    pub max_input: AtomicUsize,
    pub init_count: AtomicUsize,
    initializing: AtomicUsize,
    /// Most `initialize` calls ever running at once
    pub max_concurrent_inits: AtomicUsize,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            current: Mutex::new(None),
            ready: AtomicBool::new(false),
            fail_init: AtomicBool::new(false),
            init_delay: Mutex::new(Duration::ZERO),
            language_failures: AtomicUsize::new(0),
            supports_pause: AtomicBool::new(true),
            max_input: AtomicUsize::new(4_000),
            init_count: AtomicUsize::new(0),
            initializing: AtomicUsize::new(0),
            max_concurrent_inits: AtomicUsize::new(0),
        }
    }
}

impl ScriptedEngine {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// `(id, text, mode)` of every submission
    pub fn spoken(&self) -> Vec<(String, String, SpeakMode)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Speak { id, text, mode } => Some((id, text, mode)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn emit(&self, event: EngineEvent) {
        if let EngineEvent::Done { id } | EngineEvent::Error { id, .. } = &event {
            let mut current = self.current.lock().unwrap();
            if current.as_deref() == Some(id.as_str()) {
                *current = None;
            }
        }
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    async fn initialize(&self, preference: Option<&str>, events: EngineEventSender) -> Result<()> {
        self.record(Call::Initialize(preference.map(str::to_string)));
        self.init_count.fetch_add(1, Ordering::SeqCst);
        let running = self.initializing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_inits.fetch_max(running, Ordering::SeqCst);
        let delay = *self.init_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.initializing.fetch_sub(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(SpeechError::Engine("no synthesizer".into()));
        }
        *self.events.lock().unwrap() = Some(events);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn speak(&self, text: &str, mode: SpeakMode, id: &str) -> Result<()> {
        self.record(Call::Speak {
            id: id.to_string(),
            text: text.to_string(),
            mode,
        });
        *self.current.lock().unwrap() = Some(id.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(Call::Stop);
        let current = self.current.lock().unwrap().take();
        if let Some(id) = current {
            self.emit(EngineEvent::Stopped {
                id,
                interrupted: true,
            });
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.record(Call::Shutdown);
        self.ready.store(false, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_speaking(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    fn supports_pause(&self) -> bool {
        self.supports_pause.load(Ordering::SeqCst)
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        Ok(["en-US", "en_GB", "fr-FR", "eo"]
            .iter()
            .map(|locale| Voice {
                id: format!("voice-{}", locale),
                name: locale.to_string(),
                locale: locale.to_string(),
                quality: 300,
                latency: 300,
                network_required: false,
                not_installed: false,
            })
            .collect())
    }

    async fn list_engines(&self) -> Result<Vec<EngineInfo>> {
        Ok(vec![
            EngineInfo {
                name: "scripted".into(),
                label: "Scripted".into(),
            },
            EngineInfo {
                name: "backup".into(),
                label: "Backup".into(),
            },
        ])
    }

    fn default_engine_name(&self) -> String {
        "scripted".to_string()
    }

    async fn set_language(&self, locale: &str) -> Result<()> {
        self.record(Call::Language(locale.to_string()));
        let remaining = self.language_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.language_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SpeechError::Engine("language not ready".into()));
        }
        Ok(())
    }

    async fn set_pitch(&self, pitch: f32) -> Result<()> {
        self.record(Call::Pitch(pitch));
        Ok(())
    }

    async fn set_rate(&self, rate: f32) -> Result<()> {
        self.record(Call::Rate(rate));
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        self.record(Call::Volume(volume));
        Ok(())
    }

    async fn set_voice(&self, voice_id: &str) -> Result<()> {
        self.record(Call::Voice(voice_id.to_string()));
        Ok(())
    }

    fn max_input_length(&self) -> usize {
        self.max_input.load(Ordering::SeqCst)
    }
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        engine_preference: None,
        defaults: SpeechConfig::default(),
        global_apply: RetryPolicy {
            initial_delay: Duration::from_millis(500),
            max_retries: 5,
            retry_delay: Duration::from_millis(250),
        },
    }
}

/// Route service logs to the test output; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub engine: Arc<ScriptedEngine>,
    pub service: SpeechService,
    pub events: mpsc::Receiver<SpeechEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engine(ScriptedEngine::default())
    }

    pub fn with_engine(engine: ScriptedEngine) -> Self {
        init_tracing();
        let engine = Arc::new(engine);
        let service = SpeechService::new(
            Arc::clone(&engine) as Arc<dyn SpeechEngine>,
            Arc::new(NoopAudioFocus),
            test_config(),
        );
        let (_, events) = service.subscribe(vec![], QoSLevel::Batched);
        Self {
            engine,
            service,
            events,
        }
    }

    pub async fn started() -> Self {
        let h = Self::new();
        h.service.start().await.unwrap();
        h
    }

    pub async fn next_event(&mut self) -> SpeechEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for speech event")
            .expect("event bus closed")
    }

    /// Assert nothing else is published for a short while
    pub async fn expect_quiet(&mut self) {
        let res = tokio::time::timeout(Duration::from_millis(100), self.events.recv()).await;
        assert!(res.is_err(), "unexpected event {:?}", res);
    }
}
