//! Configuration management for voice-command-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! sane defaults so the service runs with no config file at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Literal prefix an utterance must begin with to be dispatched.
    /// Compared case-insensitively (both sides upper-cased).
    pub prefix: String,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            prefix: "ALEXA".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: u32,
    /// Dump the last captured utterance as WAV for debugging.
    pub dump_wav: bool,
    pub dump_path: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            dump_wav: false,
            dump_path: "/tmp/voice-command-last.wav".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    /// RMS energy below which a chunk counts as silence.
    pub threshold: f32,
    /// Trailing silence that finalizes an utterance, in seconds.
    pub duration: f64,
    /// Captures shorter than this are discarded as noise, in seconds.
    pub min_speech_duration: f64,
    /// Hard cap on a single utterance, in seconds.
    pub max_utterance_duration: f64,
    /// A session with no speech at all ends after this many seconds.
    pub session_timeout: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            duration: 1.2,
            min_speech_duration: 0.4,
            max_utterance_duration: 15.0,
            session_timeout: 8.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub model: String,
    /// Spoken language passed to Whisper (fixed per deployment).
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "base".into(),
            language: "es".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Remote chat endpoint receiving {"message", "name"}.
    pub url: String,
    pub timeout_secs: u64,
    /// Shown and spoken when the response carries no reply.
    pub fallback_reply: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: "https://18.232.168.76/api-gpt-php/endpoints/chat.php".into(),
            timeout_secs: 30,
            fallback_reply: "No se recibió respuesta.".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Remote TTS endpoint returning WAV bytes.
    pub url: String,
    pub voice: String,
    pub speed: f32,
    pub language: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://127.0.0.1:8880/synthesize".into(),
            voice: "ef_dora".into(),
            speed: 1.0,
            language: "es".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Delay before restarting recognition after an error. Fixed, no backoff.
    pub delay_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self { delay_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8765,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wake: WakeConfig,
    pub audio: AudioConfig,
    pub silence: SilenceConfig,
    pub whisper: WhisperConfig,
    pub chat: ChatConfig,
    pub speech: SpeechConfig,
    pub restart: RestartConfig,
    pub api: ApiConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/voice-command/config.yaml
    /// 3. /etc/voice-command/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/voice-command/config.yaml")),
                Some(PathBuf::from("/etc/voice-command/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_observed_widget() {
        let config = Config::default();
        assert_eq!(config.wake.prefix, "ALEXA");
        assert_eq!(config.restart.delay_ms, 1000);
        assert_eq!(config.chat.fallback_reply, "No se recibió respuesta.");
        assert_eq!(config.whisper.language, "es");
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = "wake:\n  prefix: JARVIS\nchat:\n  url: http://localhost:9999/chat\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.wake.prefix, "JARVIS");
        assert_eq!(config.chat.url, "http://localhost:9999/chat");
        assert_eq!(config.chat.timeout_secs, 30);
        assert_eq!(config.restart.delay_ms, 1000);
    }
}
