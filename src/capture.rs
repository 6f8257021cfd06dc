//! Microphone capture with utterance segmentation.
//!
//! Keeps the cpal input stream open for the whole process lifetime.
//! While a session is armed, the audio callback accumulates speech and
//! finalizes one utterance once enough trailing silence follows it
//! (continuous mode, final results only — no partial transcripts).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, SilenceConfig};

/// Segmentation limits converted from seconds to sample counts, so the
/// logic is deterministic and testable without a clock.
#[derive(Debug, Clone, Copy)]
struct SegmentLimits {
    threshold: f32,
    trailing_silence: usize,
    min_speech: usize,
    max_utterance: usize,
}

impl SegmentLimits {
    fn from_config(silence: &SilenceConfig, sample_rate: u32) -> Self {
        let per_sec = sample_rate as f64;
        Self {
            threshold: silence.threshold,
            trailing_silence: (silence.duration * per_sec) as usize,
            min_speech: (silence.min_speech_duration * per_sec) as usize,
            max_utterance: (silence.max_utterance_duration * per_sec) as usize,
        }
    }
}

struct CaptureInner {
    armed: bool,
    in_speech: bool,
    buffer: Vec<f32>,
    silence_samples: usize,
    finished: Option<Vec<f32>>,
}

/// Shared between the audio callback thread and the session task.
///
/// Clones share one segmenter. The cpal `Stream` is deliberately NOT held
/// here: it is `!Send`, so `open_stream` hands it back to the caller, who
/// keeps it alive on the main task for the process lifetime.
#[derive(Clone)]
pub struct UtteranceCapture {
    config: AudioConfig,
    limits: SegmentLimits,
    inner: Arc<Mutex<CaptureInner>>,
}

impl UtteranceCapture {
    pub fn new(audio: AudioConfig, silence: &SilenceConfig) -> Self {
        let limits = SegmentLimits::from_config(silence, audio.sample_rate);
        let inner = Arc::new(Mutex::new(CaptureInner {
            armed: false,
            in_speech: false,
            buffer: Vec::new(),
            silence_samples: 0,
            finished: None,
        }));

        Self {
            config: audio,
            limits,
            inner,
        }
    }

    /// Open the audio stream and return its handle. Call once at startup;
    /// failure here means the platform has no usable recognition input.
    /// Dropping the returned `Stream` kills capture.
    pub fn open_stream(&self) -> Result<Stream, String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or("No input audio device available")?;

        info!(
            "Using audio device: {}",
            device.name().unwrap_or("unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.chunk_size),
        };

        let inner = Arc::clone(&self.inner);
        let limits = self.limits;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mut inner = inner.lock().unwrap();
                    segment_chunk(&mut inner, data, &limits);
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None, // timeout
            )
            .map_err(|e| format!("Failed to build input stream: {e}"))?;

        stream
            .play()
            .map_err(|e| format!("Failed to start audio stream: {e}"))?;
        info!("Audio stream opened (always-on capture)");

        Ok(stream)
    }

    /// Arm capture for one utterance.
    pub fn begin(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.armed = true;
        inner.in_speech = false;
        inner.buffer.clear();
        inner.silence_samples = 0;
        inner.finished = None;
        debug!("Capture armed");
    }

    /// Disarm capture, discarding any partial buffer.
    pub fn end(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.armed = false;
        inner.in_speech = false;
        inner.buffer.clear();
        inner.silence_samples = 0;
    }

    /// Take the finalized utterance, if one is ready.
    pub fn take_utterance(&self) -> Option<Vec<f32>> {
        self.inner.lock().unwrap().finished.take()
    }

    /// Whether speech has started in the current session.
    pub fn in_speech(&self) -> bool {
        self.inner.lock().unwrap().in_speech
    }

    /// Save utterance samples to a WAV file for debugging.
    pub fn save_debug_wav(&self, samples: &[f32]) {
        let path = std::path::PathBuf::from(&self.config.dump_path);
        let spec = hound::WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        match hound::WavWriter::create(&path, spec) {
            Ok(mut writer) => {
                for &sample in samples {
                    // f32 [-1, 1] → i16
                    let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    if writer.write_sample(s).is_err() {
                        break;
                    }
                }
                if writer.finalize().is_ok() {
                    info!("Saved utterance WAV to {}", path.display());
                }
            }
            Err(e) => {
                warn!("Failed to save WAV: {e}");
            }
        }
    }
}

/// Feed one audio chunk through the segmenter.
///
/// Speech starts when a chunk crosses the RMS threshold; the utterance is
/// finalized after `trailing_silence` quiet samples, or at the hard cap.
/// Too-short captures are dropped and the session keeps waiting.
fn segment_chunk(inner: &mut CaptureInner, data: &[f32], limits: &SegmentLimits) {
    if !inner.armed || inner.finished.is_some() {
        return;
    }

    let loud = rms_energy(data) >= limits.threshold;

    if !inner.in_speech {
        if loud {
            inner.in_speech = true;
            inner.buffer.extend_from_slice(data);
            inner.silence_samples = 0;
        }
        return;
    }

    inner.buffer.extend_from_slice(data);

    if loud {
        inner.silence_samples = 0;
    } else {
        inner.silence_samples += data.len();
    }

    if inner.buffer.len() >= limits.max_utterance {
        debug!("Utterance hit max duration, finalizing");
        finalize(inner);
        return;
    }

    if inner.silence_samples >= limits.trailing_silence {
        let speech_len = inner.buffer.len().saturating_sub(inner.silence_samples);
        if speech_len >= limits.min_speech {
            finalize(inner);
        } else {
            // Noise blip, not speech. Reset and keep waiting.
            debug!("Discarding {speech_len}-sample blip");
            inner.in_speech = false;
            inner.buffer.clear();
            inner.silence_samples = 0;
        }
    }
}

fn finalize(inner: &mut CaptureInner) {
    inner.finished = Some(std::mem::take(&mut inner.buffer));
    inner.in_speech = false;
    inner.silence_samples = 0;
    inner.armed = false;
}

/// Calculate RMS energy of audio samples.
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
