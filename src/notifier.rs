//! Desktop notifications via notify-rust (D-Bus).
//!
//! Used for the blocking-alert conditions only (missing name, disabled
//! platform), so alerts reach the user even when the terminal is buried.

use notify_rust::{Notification, Urgency};
use tracing::{debug, warn};

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn alert(&self, text: &str) {
        if !self.enabled {
            return;
        }

        debug!("Alert notification: {text}");

        if let Err(e) = Notification::new()
            .summary("Asistente de voz")
            .body(text)
            .icon("audio-input-microphone")
            .urgency(Urgency::Critical)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
