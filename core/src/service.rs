//! Caller-facing speech service.
//!
//! One `tokio::sync::Mutex` guards the queue, the global options, the ducking
//! session and the applier state. Caller operations, engine callbacks (through
//! the dispatcher task) and the deferred global apply all take that lock. The
//! effects of a transition are carried out before it is released; its events
//! are handed, in order, to a forwarder task that publishes them on the bus
//! outside the lock, so a slow subscriber never holds up `stop()`.

use crate::applier::{ApplyTarget, OptionApplier};
use crate::config::{ConfigStore, ServiceConfig, SpeechConfig, SpeechOptions};
use crate::ducking::{AudioFocus, DuckingSession};
use crate::engine::{EngineEvent, EngineEventReceiver, EngineInfo, SpeechEngine, Voice};
use crate::event::{EventBus, QoSLevel, SpeechEvent};
use crate::gate::{Admission, BoxFuture, InitStatus, PendingCallGate};
use crate::queue::{Effect, QueueSnapshot, QueueState, Transition};
use crate::utils::gen_id;
use crate::{Result, SpeechError, ENGINE_INIT_FAILED};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State shared by every execution context
struct Core {
    queue: QueueState,
    config: ConfigStore,
    ducking: DuckingSession,
    applier: OptionApplier,
}

impl ApplyTarget for Core {
    fn applier(&mut self) -> &mut OptionApplier {
        &mut self.applier
    }

    fn global_config(&self) -> SpeechConfig {
        self.config.current().clone()
    }
}

struct Inner {
    engine: Arc<dyn SpeechEngine>,
    core: Arc<Mutex<Core>>,
    gate: PendingCallGate<Arc<Inner>>,
    bus: Arc<EventBus>,
    // Ordered hand-off to the bus forwarder
    outbox: mpsc::UnboundedSender<SpeechEvent>,
    cfg: ServiceConfig,
    preference: Mutex<Option<String>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Queued text-to-speech over a single engine
#[derive(Clone)]
pub struct SpeechService {
    inner: Arc<Inner>,
}

impl SpeechService {
    /// Must be called inside a tokio runtime: spawns the event forwarder.
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        focus: Arc<dyn AudioFocus>,
        cfg: ServiceConfig,
    ) -> Self {
        let core = Core {
            queue: QueueState::new(),
            config: ConfigStore::new(cfg.defaults.clone()),
            ducking: DuckingSession::new(focus),
            applier: OptionApplier::new(Arc::clone(&engine)),
        };
        let bus = Arc::new(EventBus::new());
        let (outbox, mut pending) = mpsc::unbounded_channel::<SpeechEvent>();
        let forward_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                forward_bus.publish(event).await;
            }
            debug!(target: "speech_service", "Event forwarder stopped");
        });
        Self {
            inner: Arc::new(Inner {
                engine,
                core: Arc::new(Mutex::new(core)),
                gate: PendingCallGate::new(),
                bus,
                outbox,
                preference: Mutex::new(cfg.engine_preference.clone()),
                cfg,
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.bus)
    }

    pub fn subscribe(
        &self,
        event_names: Vec<String>,
        qos: QoSLevel,
    ) -> (String, mpsc::Receiver<SpeechEvent>) {
        self.inner.bus.subscribe(event_names, qos)
    }

    /// Initialize the engine now instead of on the first call
    pub async fn start(&self) -> Result<()> {
        if self.inner.gate.status().await == InitStatus::Ready {
            return Ok(());
        }
        if !self.inner.gate.begin().await {
            debug!(target: "speech_service", "Initialization already in progress");
            return Ok(());
        }
        let preference = self.inner.preference.lock().await.clone();
        self.inner.initialize(preference).await
    }

    pub async fn init_status(&self) -> InitStatus {
        self.inner.gate.status().await
    }

    async fn dispatch<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner>) -> BoxFuture<Result<T>> + Send + 'static,
    {
        match self.inner.gate.admit(op).await {
            Admission::RunNow(op) => op(Arc::clone(&self.inner)).await,
            Admission::Rejected(reason) => {
                debug!(target: "speech_service", %reason, "Rejecting call, engine unavailable");
                Err(SpeechError::EngineUnavailable(ENGINE_INIT_FAILED.to_string()))
            }
            Admission::Queued { reply, start_init } => {
                if start_init {
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let preference = inner.preference.lock().await.clone();
                        // failures reach callers through the gate
                        let _ = inner.initialize(preference).await;
                    });
                }
                reply.await.unwrap_or_else(|_| {
                    Err(SpeechError::EngineUnavailable(
                        "call dropped before the engine was ready".to_string(),
                    ))
                })
            }
        }
    }

    /// Merge an option patch into the global options and push it to the engine
    pub async fn configure(&self, options: SpeechOptions) -> Result<SpeechConfig> {
        self.dispatch(|inner| Box::pin(async move { inner.configure(Some(options)).await }))
            .await
    }

    pub async fn reset_to_defaults(&self) -> Result<SpeechConfig> {
        self.dispatch(|inner| Box::pin(async move { inner.configure(None).await }))
            .await
    }

    pub async fn list_voices(&self, language: Option<&str>) -> Result<Vec<Voice>> {
        let language = language.map(str::to_string);
        self.dispatch(|inner| {
            Box::pin(async move {
                let mut voices = inner.engine.list_voices().await?;
                if let Some(filter) = language.as_deref() {
                    voices.retain(|v| v.matches_language(filter));
                }
                Ok(voices)
            })
        })
        .await
    }

    pub async fn is_speaking(&self) -> Result<bool> {
        self.dispatch(|inner| {
            Box::pin(async move {
                let core = inner.core.lock().await;
                Ok(inner.engine.is_speaking() || core.queue.has_speaking_item())
            })
        })
        .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.dispatch(|inner| Box::pin(async move { inner.stop().await }))
            .await
    }

    /// `Ok(false)` when there is nothing to pause or the engine cannot pause
    pub async fn pause(&self) -> Result<bool> {
        self.dispatch(|inner| Box::pin(async move { inner.pause().await }))
            .await
    }

    /// `Ok(false)` when nothing is paused or the engine cannot pause
    pub async fn resume(&self) -> Result<bool> {
        self.dispatch(|inner| Box::pin(async move { inner.resume().await }))
            .await
    }

    /// Queue `text` with the global options; returns the utterance id
    pub async fn speak(&self, text: &str) -> Result<String> {
        self.enqueue(text, None).await
    }

    /// Queue `text` with per-utterance overrides; returns the utterance id
    pub async fn speak_with_options(&self, text: &str, options: SpeechOptions) -> Result<String> {
        self.enqueue(text, Some(options)).await
    }

    async fn enqueue(&self, text: &str, options: Option<SpeechOptions>) -> Result<String> {
        if text.trim().is_empty() {
            return Err(SpeechError::Validation("text is required".to_string()));
        }
        let chars = text.chars().count();
        let max = self.inner.engine.max_input_length();
        if chars > max {
            return Err(SpeechError::Validation(format!(
                "text is {} chars, engine accepts at most {}",
                chars, max
            )));
        }
        let text = text.to_string();
        self.dispatch(|inner| Box::pin(async move { inner.enqueue(text, options).await }))
            .await
    }

    pub async fn list_engines(&self) -> Result<Vec<EngineInfo>> {
        self.dispatch(|inner| Box::pin(async move { inner.engine.list_engines().await }))
            .await
    }

    pub fn default_engine_name(&self) -> String {
        self.inner.engine.default_engine_name()
    }

    /// Tear the engine down and bring it back up as `name`. All queued
    /// utterances are discarded.
    #[tracing::instrument(skip(self))]
    pub async fn set_engine(&self, name: &str) -> Result<()> {
        let inner = &self.inner;
        // Only one initialization at a time; let a running one finish first
        while !inner.gate.begin().await {
            debug!(target: "speech_service", "Waiting for running initialization");
            inner.gate.settled().await;
        }
        inner.teardown().await;
        *inner.preference.lock().await = Some(name.to_string());
        inner.initialize(Some(name.to_string())).await
    }

    pub async fn open_voice_installer(&self) -> Result<()> {
        self.dispatch(|inner| Box::pin(async move { inner.engine.open_voice_installer().await }))
            .await
    }

    pub async fn queue_snapshot(&self) -> QueueSnapshot {
        self.inner.core.lock().await.queue.snapshot()
    }

    /// Current global options
    pub async fn current_config(&self) -> SpeechConfig {
        self.inner.core.lock().await.config.current().clone()
    }

    /// Stop everything and release the engine. The next call starts it again.
    pub async fn shutdown(&self) {
        info!(target: "speech_service", "Shutting down speech service");
        self.inner.teardown().await;
        if let Some(handle) = self.inner.dispatcher.lock().await.take() {
            handle.abort();
        }
        self.inner.gate.reset().await;
    }
}

impl Inner {
    async fn initialize(self: &Arc<Self>, preference: Option<String>) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.engine.initialize(preference.as_deref(), tx).await {
            Ok(()) => {
                info!(
                    target: "speech_service",
                    engine = %self.engine.default_engine_name(),
                    "Engine initialized"
                );
                self.spawn_dispatcher(rx).await;
                {
                    let mut core = self.core.lock().await;
                    core.applier
                        .schedule_global_apply(&self.core, self.cfg.global_apply);
                }
                self.gate.complete(Arc::clone(self), Ok(())).await;
                Ok(())
            }
            Err(e) => {
                warn!(target: "speech_service", error = %e, ?preference, "Engine initialization failed");
                self.gate.complete(Arc::clone(self), Err(e.to_string())).await;
                Err(SpeechError::EngineUnavailable(ENGINE_INIT_FAILED.to_string()))
            }
        }
    }

    async fn spawn_dispatcher(self: &Arc<Self>, mut rx: EngineEventReceiver) {
        // Weak: the loop ends once the service is dropped
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_engine_event(event).await;
            }
            debug!(target: "speech_service", "Engine event stream closed");
        });
        if let Some(previous) = self.dispatcher.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn handle_engine_event(&self, event: EngineEvent) {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let transition = match event {
            EngineEvent::Started { id } => core.queue.on_started(&id),
            EngineEvent::Progress { id, start, end } => core.queue.on_progress(&id, start, end),
            EngineEvent::Done { id } => core.queue.on_finished(&id, &core.config),
            EngineEvent::Error { id, message } => {
                warn!(target: "speech_service", %id, %message, "Engine reported utterance error");
                core.queue.on_errored(&id, &core.config)
            }
            EngineEvent::Stopped { id, interrupted } => {
                core.queue.on_engine_stopped(&id, interrupted, &core.config)
            }
        };
        self.commit(core, transition).await;
    }

    /// Carry out a transition's effects, then queue its events for publishing.
    /// By the time a host sees `onFinish` the next utterance has already been
    /// submitted.
    async fn commit(&self, core: &mut Core, transition: Transition) {
        let mut pending = VecDeque::from([transition]);
        while let Some(t) = pending.pop_front() {
            for effect in t.effects {
                match effect {
                    Effect::ApplyOptions(cfg) => {
                        core.applier.apply_now(&cfg).await;
                    }
                    Effect::AcquireDuck { enabled } => core.ducking.activate(enabled),
                    Effect::ReleaseDuck => core.ducking.deactivate(),
                    Effect::Speak { id, text, mode } => {
                        if let Err(e) = self.engine.speak(&text, mode, &id).await {
                            warn!(target: "speech_service", %id, error = %e, "Engine refused utterance");
                            pending.push_back(core.queue.on_errored(&id, &core.config));
                        }
                    }
                    Effect::StopEngine => {
                        if let Err(e) = self.engine.stop().await {
                            warn!(target: "speech_service", error = %e, "Engine stop failed");
                        }
                    }
                    Effect::ScheduleGlobalApply => {
                        core.applier
                            .schedule_global_apply(&self.core, self.cfg.global_apply);
                    }
                }
            }
            for event in t.events {
                self.publish(event);
            }
        }
    }

    fn publish(&self, event: SpeechEvent) {
        if let Err(e) = self.outbox.send(event) {
            debug!(target: "speech_service", event = e.0.name(), "Event forwarder gone, dropping event");
        }
    }

    async fn enqueue(&self, text: String, options: Option<SpeechOptions>) -> Result<String> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let id = gen_id();
        let transition = core.queue.enqueue(id.clone(), text, options, &core.config);
        self.commit(core, transition).await;
        debug!(target: "speech_service", %id, queued = core.queue.len(), "Utterance queued");
        Ok(id)
    }

    /// `None` resets to defaults
    async fn configure(&self, options: Option<SpeechOptions>) -> Result<SpeechConfig> {
        let mut core = self.core.lock().await;
        let cfg = match options {
            Some(patch) => core.config.merge(&patch),
            None => core.config.reset(),
        };
        core.applier.cancel_pending();
        core.applier.apply_now(&cfg).await;
        Ok(cfg)
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let transition = core.queue.stop(self.engine.is_speaking());
        self.commit(core, transition).await;
        Ok(())
    }

    async fn pause(&self) -> Result<bool> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let (paused, transition) = core.queue.pause(self.engine.supports_pause());
        self.commit(core, transition).await;
        Ok(paused)
    }

    async fn resume(&self) -> Result<bool> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let (resumed, transition) = core
            .queue
            .resume(self.engine.supports_pause(), &core.config);
        self.commit(core, transition).await;
        Ok(resumed)
    }

    /// Discard queue state and shut the engine down
    async fn teardown(&self) {
        {
            let mut guard = self.core.lock().await;
            let core = &mut *guard;
            let transition = core.queue.stop(self.engine.is_speaking());
            for event in transition.events {
                self.publish(event);
            }
            core.ducking.deactivate();
            core.applier.cancel_pending();
        }
        if let Err(e) = self.engine.shutdown().await {
            warn!(target: "speech_service", error = %e, "Engine shutdown failed");
        }
    }
}
