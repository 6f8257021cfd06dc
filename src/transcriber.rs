//! Whisper ASR transcription using whisper-rs (whisper.cpp bindings).
//!
//! Loads a GGML model once at startup, then transcribes f32 audio
//! samples (16kHz mono) to text on demand. The spoken language is fixed
//! per deployment (default Spanish, matching the front-end this replaces).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::WhisperConfig;

/// Thread-safe wrapper around WhisperContext.
/// WhisperContext is Send+Sync, so we wrap it in Arc for sharing.
#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl WhisperTranscriber {
    /// Load the Whisper GGML model.
    pub fn load(config: &WhisperConfig) -> Result<Self, String> {
        let model_path = Self::find_model(&config.model)?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let params = WhisperContextParameters::default();
        let path_str = model_path
            .to_str()
            .ok_or_else(|| format!("Non-UTF8 model path: {}", model_path.display()))?;
        let ctx = WhisperContext::new_with_params(path_str, params)
            .map_err(|e| format!("Failed to load Whisper model: {e}"))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            language: config.language.clone(),
        })
    }

    /// Transcribe audio samples (f32, 16kHz, mono) to text.
    pub fn transcribe(&self, samples: &[f32]) -> Result<String, String> {
        let t0 = Instant::now();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| format!("Failed to create whisper state: {e}"))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| format!("Whisper inference failed: {e}"))?;

        let n_segments = state.full_n_segments();

        let mut text = String::new();
        for i in 0..n_segments {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str_lossy() {
                    let trimmed = segment_text.trim();
                    if !trimmed.is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(trimmed);
                    }
                }
            }
        }

        let latency_ms = t0.elapsed().as_secs_f64() * 1000.0;
        let audio_s = samples.len() as f64 / 16000.0;
        info!(
            "Transcribed {audio_s:.1}s audio in {latency_ms:.0}ms: \"{}\"",
            truncate_preview(&text, 80)
        );

        Ok(text)
    }

    /// Find the GGML model file.
    fn find_model(model_name: &str) -> Result<PathBuf, String> {
        // Direct path to an existing file wins
        let direct = PathBuf::from(model_name);
        if direct.exists() && direct.extension().is_some() {
            return Ok(direct);
        }

        let filenames = [
            format!("ggml-{}.bin", model_name.replace('/', "-")),
            "ggml-base.bin".to_string(),
            "ggml-small.bin".to_string(),
            "ggml-large-v3-turbo.bin".to_string(),
        ];

        let search_dirs: Vec<PathBuf> = [
            std::env::current_dir().ok(),
            dirs::home_dir().map(|h| h.join(".cache/whisper")),
            dirs::home_dir().map(|h| h.join(".config/voice-command")),
        ]
        .into_iter()
        .flatten()
        .collect();

        for dir in &search_dirs {
            for filename in &filenames {
                let path = dir.join(filename);
                if path.exists() {
                    return Ok(path);
                }
            }
        }

        Err(format!(
            "Whisper GGML model not found. Download with:\n  \
             wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.bin\n\
             Searched in: {search_dirs:?}"
        ))
    }
}

fn truncate_preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i <= max)
            .last()
            .map_or(0, |(i, _)| i);
        format!("{}...", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(truncate_preview("hola", 80), "hola");
        let long = "x".repeat(100);
        assert!(truncate_preview(&long, 80).ends_with("..."));
    }
}
