//! Speech playback collaborator.
//!
//! Only one utterance is ever in flight: speaking cancels whatever was
//! playing. Playback runs on a dedicated thread that owns the rodio
//! output stream (it is not Send), polling the sink the way the rest of
//! the pack does. A `()` on the done channel means playback finished
//! naturally; cancelled playback stays silent and lets the canceller
//! decide what happens next.

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamBuilder, Sink};
use std::io::Cursor;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SpeechConfig;

/// Speech synthesis collaborator as the controller sees it.
pub trait Synthesizer: Send + Sync {
    /// Synthesize and play `text`, cancelling any prior utterance.
    fn speak(&self, text: &str);
    /// Cancel all playback immediately.
    fn cancel(&self);
}

enum PlaybackCmd {
    Play {
        samples: Vec<f32>,
        channels: u16,
        sample_rate: u32,
    },
    Cancel,
}

/// Remote-TTS synthesizer: POSTs text to a synthesis endpoint, expects
/// WAV bytes back, and plays them locally.
pub struct HttpSynthesizer {
    config: SpeechConfig,
    client: reqwest::Client,
    playback_tx: mpsc::Sender<PlaybackCmd>,
    done_tx: mpsc::Sender<()>,
}

impl HttpSynthesizer {
    pub fn new(config: SpeechConfig, done_tx: mpsc::Sender<()>) -> Self {
        let (playback_tx, playback_rx) = mpsc::channel(8);
        std::thread::spawn({
            let done_tx = done_tx.clone();
            move || playback_thread(playback_rx, done_tx)
        });

        Self {
            config,
            client: reqwest::Client::new(),
            playback_tx,
            done_tx,
        }
    }
}

impl Synthesizer for HttpSynthesizer {
    fn speak(&self, text: &str) {
        let text = text.to_string();
        let client = self.client.clone();
        let config = self.config.clone();
        let playback_tx = self.playback_tx.clone();
        let done_tx = self.done_tx.clone();

        // Fire-and-forget; a synthesis failure is downgraded to an
        // immediate "ended" so the listening loop never wedges in Speaking.
        tokio::spawn(async move {
            match fetch_audio(&client, &config, &text)
                .await
                .and_then(|bytes| decode_wav(&bytes))
            {
                Ok((samples, channels, sample_rate)) => {
                    let _ = playback_tx
                        .send(PlaybackCmd::Play {
                            samples,
                            channels,
                            sample_rate,
                        })
                        .await;
                }
                Err(e) => {
                    warn!("Speech synthesis failed: {e}");
                    let _ = done_tx.send(()).await;
                }
            }
        });
    }

    fn cancel(&self) {
        if self.playback_tx.try_send(PlaybackCmd::Cancel).is_err() {
            debug!("Playback channel full or closed, cancel dropped");
        }
    }
}

async fn fetch_audio(
    client: &reqwest::Client,
    config: &SpeechConfig,
    text: &str,
) -> Result<Vec<u8>, String> {
    let body = serde_json::json!({
        "text": text,
        "voice": config.voice,
        "speed": config.speed,
        "language": config.language,
    });

    let resp = client
        .post(&config.url)
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("TTS request failed: {e}"))?;

    if !resp.status().is_success() {
        return Err(format!("TTS endpoint returned status {}", resp.status()));
    }

    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| format!("Failed to read TTS body: {e}"))
}

/// No-op synthesizer for `--no-speech`: reports the end of "playback"
/// immediately so the listening loop still cycles.
pub struct NullSynthesizer {
    done_tx: mpsc::Sender<()>,
}

impl NullSynthesizer {
    pub fn new(done_tx: mpsc::Sender<()>) -> Self {
        Self { done_tx }
    }
}

impl Synthesizer for NullSynthesizer {
    fn speak(&self, text: &str) {
        debug!("Speech disabled, skipping: {text}");
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let _ = done_tx.send(()).await;
        });
    }

    fn cancel(&self) {}
}

/// Decode a WAV body into f32 samples plus format.
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u16, u32), String> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| format!("TTS returned invalid WAV: {e}"))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(Result::ok)
                .map(|s| s as f32 / max)
                .collect()
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .collect(),
    };

    Ok((samples, spec.channels, spec.sample_rate))
}

/// Owns the rodio output stream; plays one utterance at a time, polling
/// the sink for completion and for cancellation commands.
fn playback_thread(mut rx: mpsc::Receiver<PlaybackCmd>, done_tx: mpsc::Sender<()>) {
    let stream = match OutputStreamBuilder::open_default_stream() {
        Ok(s) => s,
        Err(e) => {
            warn!("No audio output, speech disabled: {e}");
            // Keep draining so speak() still resolves into "ended".
            while let Some(cmd) = rx.blocking_recv() {
                if matches!(cmd, PlaybackCmd::Play { .. }) {
                    let _ = done_tx.blocking_send(());
                }
            }
            return;
        }
    };

    let mut pending: Option<PlaybackCmd> = None;

    loop {
        let cmd = match pending.take() {
            Some(cmd) => cmd,
            None => match rx.blocking_recv() {
                Some(cmd) => cmd,
                None => return,
            },
        };

        let PlaybackCmd::Play {
            samples,
            channels,
            sample_rate,
        } = cmd
        else {
            // Cancel with nothing playing
            continue;
        };

        let sink = Sink::connect_new(stream.mixer());
        sink.append(SamplesBuffer::new(channels, sample_rate, samples));
        debug!("Playback started");

        let mut cancelled = false;
        while !sink.empty() {
            match rx.try_recv() {
                Ok(PlaybackCmd::Cancel) => {
                    sink.stop();
                    cancelled = true;
                    break;
                }
                Ok(play @ PlaybackCmd::Play { .. }) => {
                    // New utterance supersedes the current one
                    sink.stop();
                    cancelled = true;
                    pending = Some(play);
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }

        if !cancelled {
            debug!("Playback finished");
            let _ = done_tx.blocking_send(());
        }
    }
}
