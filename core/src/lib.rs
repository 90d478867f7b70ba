// Cadence Core Library
// Queued text-to-speech coordination runtime

pub mod applier;
pub mod config;
pub mod ducking;
pub mod engine;
pub mod event;
pub mod gate;
pub mod queue;
pub mod service;
pub mod utils;

// Export core types
pub use applier::{ApplyReport, OptionApplier, RetryPolicy};
pub use config::{ConfigStore, ServiceConfig, SpeechConfig, SpeechOptions};
pub use ducking::{AudioFocus, DuckingSession, FocusHandle, NoopAudioFocus};
pub use engine::{EngineEvent, EngineEventSender, EngineInfo, SpeakMode, SpeechEngine, Voice};
pub use event::{EventBus, EventBusStats, QoSLevel, SpeechEvent};
pub use gate::{InitStatus, PendingCallGate};
pub use queue::{Effect, ItemStatus, QueueSnapshot, QueueState, SpeechItem, Transition};
pub use service::SpeechService;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Failed to apply {field}: {message}")]
    ConfigApply { field: &'static str, message: String },

    #[error("External activity unavailable: {0}")]
    ExternalActivityUnavailable(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpeechError>;

/// Reason reported to every call buffered behind a failed engine start.
pub const ENGINE_INIT_FAILED: &str = "engine failed to initialize";
