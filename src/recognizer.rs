//! Recognition collaborator: trait, event vocabulary, and the Whisper
//! backend.
//!
//! The controller only sees `Recognizer` + `RecognizerEvent`; the real
//! backend drives capture + Whisper in a long-lived session task. One
//! session covers one utterance: Result (if any), then End. The controller
//! restarts sessions to keep listening, so a session that ends on silence
//! just produces End and waits to be started again.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::capture::UtteranceCapture;
use crate::config::SilenceConfig;
use crate::transcriber::WhisperTranscriber;

/// Error kinds in the vocabulary the controller maps to user messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Microphone access denied.
    NotAllowed,
    /// Recognition service refused access.
    ServiceNotAllowed,
    /// Network failure inside a remote recognition backend.
    Network,
    /// Anything else, with a diagnostic.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// A finalized phrase. Partial results are never surfaced.
    Result(String),
    Error(RecognitionErrorKind),
    /// The session ended, for any reason.
    End,
}

/// A speech-recognition session source. start() and stop() are
/// fire-and-forget; everything comes back through the event channel.
pub trait Recognizer: Send {
    fn start(&self);
    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCmd {
    Start,
    Stop,
}

/// Whisper-backed recognizer: arms capture, waits for one segmented
/// utterance, transcribes it off the runtime, and emits events.
pub struct WhisperRecognizer {
    cmd_tx: mpsc::Sender<SessionCmd>,
}

impl WhisperRecognizer {
    /// The capture stream must already be open (see `main`); this only
    /// spawns the session task.
    pub fn spawn(
        capture: UtteranceCapture,
        transcriber: WhisperTranscriber,
        silence: SilenceConfig,
        dump_wav: bool,
        events_tx: mpsc::Sender<RecognizerEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        tokio::spawn(session_loop(
            capture,
            transcriber,
            silence,
            dump_wav,
            cmd_rx,
            events_tx,
        ));
        Self { cmd_tx }
    }
}

impl Recognizer for WhisperRecognizer {
    fn start(&self) {
        if self.cmd_tx.try_send(SessionCmd::Start).is_err() {
            warn!("Recognizer command channel full or closed, start dropped");
        }
    }

    fn stop(&self) {
        if self.cmd_tx.try_send(SessionCmd::Stop).is_err() {
            warn!("Recognizer command channel full or closed, stop dropped");
        }
    }
}

async fn session_loop(
    capture: UtteranceCapture,
    transcriber: WhisperTranscriber,
    silence: SilenceConfig,
    dump_wav: bool,
    mut cmd_rx: mpsc::Receiver<SessionCmd>,
    events_tx: mpsc::Sender<RecognizerEvent>,
) {
    let session_timeout = std::time::Duration::from_secs_f64(silence.session_timeout);

    loop {
        // Wait for a Start; a Stop while idle is a no-op.
        match cmd_rx.recv().await {
            Some(SessionCmd::Start) => {}
            Some(SessionCmd::Stop) => continue,
            None => break,
        }

        capture.begin();
        debug!("Recognition session started");

        let started = tokio::time::Instant::now();
        let mut poll = tokio::time::interval(std::time::Duration::from_millis(50));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let samples = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Stop) | None => {
                        capture.end();
                        break None;
                    }
                    // Duplicate Start while a session is active: no-op,
                    // the controller guards this with its listening flag.
                    Some(SessionCmd::Start) => {}
                },
                _ = poll.tick() => {
                    if let Some(samples) = capture.take_utterance() {
                        capture.end();
                        break Some(samples);
                    }
                    // No speech at all for the whole window: the engine
                    // gives up, like a browser session ending on silence.
                    if !capture.in_speech() && started.elapsed() >= session_timeout {
                        debug!("Session timed out without speech");
                        capture.end();
                        break None;
                    }
                }
            }
        };

        if let Some(samples) = samples {
            if dump_wav {
                capture.save_debug_wav(&samples);
            }

            let transcriber = transcriber.clone();
            let result =
                tokio::task::spawn_blocking(move || transcriber.transcribe(&samples)).await;

            match result {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    let _ = events_tx.send(RecognizerEvent::Result(text)).await;
                }
                Ok(Ok(_)) => debug!("Empty transcription, dropping"),
                Ok(Err(e)) => {
                    let _ = events_tx
                        .send(RecognizerEvent::Error(RecognitionErrorKind::Other(e)))
                        .await;
                }
                Err(e) => {
                    let _ = events_tx
                        .send(RecognizerEvent::Error(RecognitionErrorKind::Other(
                            format!("transcription task failed: {e}"),
                        )))
                        .await;
                }
            }
        }

        // Every session ends with End, whatever happened inside it.
        if events_tx.send(RecognizerEvent::End).await.is_err() {
            break;
        }
    }
}
