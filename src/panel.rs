//! The user-facing surface of the controller.
//!
//! Models the widget this service replaces: a start/stop button with a
//! label, an accumulating transcript region, a status/error line that is
//! overwritten on every event, and a blocking alert. The terminal
//! implementation prints the regions and raises alerts as desktop
//! notifications; tests substitute a recording implementation.

use crate::notifier::Notifier;

pub trait FrontPanel: Send {
    /// Reflect the start/stop affordance: enabled state and label.
    fn set_button(&self, enabled: bool, label: &str);
    /// Overwrite the transcript region.
    fn show_transcript(&self, text: &str);
    /// Append a line (warning annotation or assistant reply) to the
    /// transcript region.
    fn append_transcript(&self, text: &str);
    /// Overwrite the status/error region.
    fn show_status(&self, text: &str);
    /// Blocking alert: something the user must see before proceeding.
    fn alert(&self, text: &str);
}

pub struct TerminalPanel {
    notifier: Notifier,
}

impl TerminalPanel {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

impl FrontPanel for TerminalPanel {
    fn set_button(&self, enabled: bool, label: &str) {
        let hint = if enabled { "pulsa /start" } else { "activo" };
        println!("[{label}] ({hint})");
    }

    fn show_transcript(&self, text: &str) {
        println!("{text}");
    }

    fn append_transcript(&self, text: &str) {
        println!("  {text}");
    }

    fn show_status(&self, text: &str) {
        if !text.is_empty() {
            println!("{text}");
        }
    }

    fn alert(&self, text: &str) {
        println!("{text}");
        self.notifier.alert(text);
    }
}
