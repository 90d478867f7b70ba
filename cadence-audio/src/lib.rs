// Audio backends for the Cadence speech service

pub mod engine;
pub mod focus;
pub mod progress;
pub mod synth;
pub mod voices;

pub use engine::{CliEngineConfig, CliSpeechEngine};
pub use focus::CommandAudioFocus;
