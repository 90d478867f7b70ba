//! Pushes speech options into the engine.
//!
//! Every field is applied on its own: an engine that rejects a locale still gets
//! the rate and pitch. Right after startup some engines report ready but refuse
//! language/voice changes for a while, so restoring the global options runs as
//! a bounded retry task rather than a single attempt.

use crate::config::SpeechConfig;
use crate::engine::SpeechEngine;
use crate::{Result, SpeechError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Timing of the deferred global apply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_retries: 5,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Outcome of one `apply_now` pass
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<&'static str>,
    /// One `SpeechError::ConfigApply` per rejected field
    pub failed: Vec<SpeechError>,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fields the engine rejected, in apply order
    pub fn failed_fields(&self) -> Vec<&'static str> {
        self.failed
            .iter()
            .filter_map(|e| match e {
                SpeechError::ConfigApply { field, .. } => Some(*field),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, field: &'static str, result: Result<()>) {
        match result {
            Ok(()) => self.applied.push(field),
            Err(e) => {
                let failure = SpeechError::ConfigApply {
                    field,
                    message: e.to_string(),
                };
                warn!(target: "option_applier", error = %failure, "Engine rejected option");
                self.failed.push(failure);
            }
        }
    }
}

/// Owner of an [`OptionApplier`] behind the shared lock
pub trait ApplyTarget: Send + 'static {
    fn applier(&mut self) -> &mut OptionApplier;

    fn global_config(&self) -> SpeechConfig;
}

pub struct OptionApplier {
    engine: Arc<dyn SpeechEngine>,
    pending: bool,
    generation: u64,
}

impl OptionApplier {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            pending: false,
            generation: 0,
        }
    }

    /// A deferred global apply is scheduled and has not succeeded yet
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Drop any scheduled global apply (global options were just pushed explicitly)
    pub fn cancel_pending(&mut self) {
        if self.pending {
            debug!(target: "option_applier", "Cancelling deferred global apply");
        }
        self.pending = false;
        self.generation += 1;
    }

    /// Push each option independently; failures are logged and reported, never raised.
    pub async fn apply_now(&self, config: &SpeechConfig) -> ApplyReport {
        let engine = self.engine.as_ref();
        let mut report = ApplyReport::default();
        report.record("language", engine.set_language(&config.language).await);
        if let Some(voice) = config.voice.as_deref() {
            report.record("voice", engine.set_voice(voice).await);
        }
        report.record("rate", engine.set_rate(config.rate).await);
        report.record("pitch", engine.set_pitch(config.pitch).await);
        report.record("volume", engine.set_volume(config.volume).await);
        debug!(
            target: "option_applier",
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Applied options"
        );
        report
    }

    /// Apply the owner's global options after `initial_delay`, retrying every
    /// `retry_delay` while the engine is not ready or rejects a field, at most
    /// `max_retries` times. A later schedule or `cancel_pending` supersedes this one.
    pub fn schedule_global_apply<S: ApplyTarget>(
        &mut self,
        shared: &Arc<Mutex<S>>,
        policy: RetryPolicy,
    ) -> JoinHandle<()> {
        self.pending = true;
        self.generation += 1;
        let generation = self.generation;
        let shared = Arc::clone(shared);

        tokio::spawn(async move {
            tokio::time::sleep(policy.initial_delay).await;
            let mut retries_left = policy.max_retries;
            loop {
                {
                    let mut target = shared.lock().await;
                    let global = target.global_config();
                    let applier = target.applier();
                    if !applier.pending || applier.generation != generation {
                        return;
                    }
                    if applier.engine.is_ready() {
                        if applier.apply_now(&global).await.is_complete() {
                            applier.pending = false;
                            debug!(target: "option_applier", "Global options restored");
                            return;
                        }
                    } else {
                        debug!(target: "option_applier", "Engine not ready for global options");
                    }
                    if retries_left == 0 {
                        applier.pending = false;
                        debug!(target: "option_applier", "Giving up on deferred global apply");
                        return;
                    }
                }
                retries_left -= 1;
                tokio::time::sleep(policy.retry_delay).await;
            }
        })
    }
}
