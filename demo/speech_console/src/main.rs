mod commands;
mod config;

use cadence_audio::{CliSpeechEngine, CommandAudioFocus};
use cadence_core::{QoSLevel, SpeechService};
use commands::Command;
use config::SpeechConsoleConfig;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays machine-readable
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,cadence_core=info,speech_console=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(target: "speech_console", "Starting speech console");

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = SpeechConsoleConfig::load();

    let engine = Arc::new(CliSpeechEngine::new(Some(cfg.engine.clone())));
    let focus = Arc::new(CommandAudioFocus::new(
        cfg.focus.duck_cmd.clone(),
        cfg.focus.unduck_cmd.clone(),
    ));
    let service = SpeechService::new(engine, focus, cfg.service.clone());

    // Events → stdout as JSON lines
    let (_sub_id, mut events) = service.subscribe(cfg.events.clone(), QoSLevel::Batched);
    let printer = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            match serde_json::to_string(&ev) {
                Ok(line) => println!("{}", line),
                Err(e) => error!(target: "speech_console", error = %e, "Failed to encode event"),
            }
        }
    });

    if let Err(e) = service.start().await {
        error!(target: "speech_console", error = %e, "Engine failed to start; calls will be rejected");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => {
                info!(target: "speech_console", "Ctrl+C received");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match commands::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                reply(json!({ "error": message }));
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        handle(&service, command).await;
    }

    service.shutdown().await;
    service.events().shutdown();
    printer.abort();
    info!(target: "speech_console", "Speech console stopped");
    Ok(())
}

fn reply(value: serde_json::Value) {
    println!("{}", value);
}

async fn handle(service: &SpeechService, command: Command) {
    let result = match command {
        Command::Say(text) => service.speak(&text).await.map(|id| json!({ "id": id })),
        Command::SayWith(options, text) => service
            .speak_with_options(&text, options)
            .await
            .map(|id| json!({ "id": id })),
        Command::Pause => service.pause().await.map(|ok| json!({ "paused": ok })),
        Command::Resume => service.resume().await.map(|ok| json!({ "resumed": ok })),
        Command::Stop => service.stop().await.map(|_| json!({ "stopped": true })),
        Command::Config(options) => service
            .configure(options)
            .await
            .map(|cfg| json!({ "config": cfg })),
        Command::Reset => service
            .reset_to_defaults()
            .await
            .map(|cfg| json!({ "config": cfg })),
        Command::Voices(language) => service
            .list_voices(language.as_deref())
            .await
            .map(|voices| json!({ "voices": voices })),
        Command::Engines => service.list_engines().await.map(|engines| {
            json!({ "engines": engines, "default": service.default_engine_name() })
        }),
        Command::Engine(name) => service
            .set_engine(&name)
            .await
            .map(|_| json!({ "engine": service.default_engine_name() })),
        Command::Speaking => service
            .is_speaking()
            .await
            .map(|speaking| json!({ "speaking": speaking })),
        Command::Install => service
            .open_voice_installer()
            .await
            .map(|_| json!({ "installer": "launched" })),
        Command::Status => Ok(json!({
            "init": service.init_status().await,
            "engine": service.default_engine_name(),
            "config": service.current_config().await,
            "queue": service.queue_snapshot().await,
        })),
        Command::Help => {
            eprintln!("{}", commands::HELP);
            return;
        }
        Command::Quit => return,
    };
    match result {
        Ok(value) => reply(value),
        Err(e) => reply(json!({ "error": e.to_string() })),
    }
}
