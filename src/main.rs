//! voice-command-rs: wake-word gated voice assistant service.
//!
//! Listens continuously, transcribes speech, and forwards phrases that
//! start with the wake prefix to a remote chat endpoint; the reply is
//! spoken back, then listening resumes.

mod api;
mod capture;
mod chat;
mod config;
mod controller;
mod notifier;
mod panel;
mod recognizer;
mod speech;
mod transcriber;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::speech::Synthesizer;

#[derive(Parser, Debug)]
#[command(name = "voice-command-rs", about = "Wake-word gated voice assistant")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User name to start listening for immediately
    #[arg(short, long)]
    name: Option<String>,

    /// Disable spoken replies
    #[arg(long)]
    no_speech: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,whisper_rs=info")
    } else {
        EnvFilter::new("info,whisper_rs=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("voice-command-rs starting");

    let config = config::Config::load(args.config.as_deref());
    info!(
        "Wake prefix '{}', chat endpoint {}",
        config.wake.prefix, config.chat.url
    );

    // No microphone or no model means no recognition capability at all,
    // so fail loudly here instead of wiring a controller that can't work.
    let cap = capture::UtteranceCapture::new(config.audio.clone(), &config.silence);
    let _stream = cap.open_stream()?;

    info!("Loading Whisper model...");
    let transcriber = tokio::task::spawn_blocking({
        let whisper_config = config.whisper.clone();
        move || transcriber::WhisperTranscriber::load(&whisper_config)
    })
    .await??;

    let (rec_tx, rec_rx) = mpsc::channel(16);
    let recognizer = recognizer::WhisperRecognizer::spawn(
        cap,
        transcriber,
        config.silence.clone(),
        config.audio.dump_wav,
        rec_tx,
    );

    let (done_tx, done_rx) = mpsc::channel(4);
    let synthesizer: Arc<dyn Synthesizer> = if args.no_speech || !config.speech.enabled {
        info!("Spoken replies disabled");
        Arc::new(speech::NullSynthesizer::new(done_tx))
    } else {
        Arc::new(speech::HttpSynthesizer::new(config.speech.clone(), done_tx))
    };

    let chat = Arc::new(chat::ChatClient::new(config.chat.clone())?);
    let panel = panel::TerminalPanel::new(notifier::Notifier::new(config.feedback.notifications));

    let controller = controller::VoiceCommandController::new(
        &config,
        Box::new(recognizer),
        rec_rx,
        synthesizer,
        done_rx,
        chat,
        Box::new(panel),
    );
    let events_tx = controller.events_tx();

    if config.api.enabled {
        let state = api::ControlApiState {
            events_tx: events_tx.clone(),
            status: controller.status(),
        };
        api::start_control_api(state, config.api.port).await;
    }

    if let Some(name) = args.name {
        events_tx
            .send(controller::ControllerEvent::StartPressed { name })
            .await?;
    } else {
        info!("Waiting for POST /start to begin listening");
    }

    controller.run().await;

    Ok(())
}
