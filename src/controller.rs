//! Voice command controller: the interactive loop.
//!
//! IDLE → LISTENING → DISPATCHING → SPEAKING → LISTENING
//!
//! One task owns all state and consumes three channels: controller
//! commands (start/stop/dispatch results/restart timer), recognizer
//! events, and playback-end notifications. Collaborators never touch the
//! flags directly; every auto-restart decision is made here, against the
//! flags as they are when the event is handled, so a manual stop during
//! any in-flight work wins.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::{ChatClient, ChatError};
use crate::config::Config;
use crate::panel::FrontPanel;
use crate::recognizer::{RecognitionErrorKind, Recognizer, RecognizerEvent};
use crate::speech::Synthesizer;

pub const IDLE_LABEL: &str = "🎙️ Iniciar Reconocimiento";
pub const LISTENING_LABEL: &str = "🎤 Escuchando...";
pub const LISTENING_PLACEHOLDER: &str = "Escuchando...";

pub const MSG_NAME_REQUIRED: &str = "⚠ Ingresar un nombre";
pub const MSG_MIC_DENIED: &str = "❌ Permiso denegado para usar el micrófono.";
pub const MSG_RECOGNITION_NETWORK: &str = "❌ Error de red al usar el reconocimiento.";
pub const MSG_RECOGNITION_FAILED: &str = "❌ Error en el reconocimiento de voz.";
pub const MSG_API_UNREACHABLE: &str = "No se pudo conectar con la API.";
pub const MSG_RESUMED: &str = "🎤 El reconocimiento se detuvo. Esperando tu voz nuevamente...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Listening,
    Dispatching,
    Speaking,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Listening => write!(f, "LISTENING"),
            Self::Dispatching => write!(f, "DISPATCHING"),
            Self::Speaking => write!(f, "SPEAKING"),
        }
    }
}

/// Commands and completions delivered to the controller task.
#[derive(Debug)]
pub enum ControllerEvent {
    StartPressed { name: String },
    StopPressed,
    ReplyReady(Result<String, ChatError>),
    RestartElapsed,
}

/// What the control API reports about the controller.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: ControllerState,
    pub listening: bool,
    pub name: String,
}

pub struct VoiceCommandController {
    wake_prefix: String,
    restart_delay: std::time::Duration,

    state: ControllerState,
    listening: bool,
    manually_stopped: bool,
    /// A delayed restart is in flight; session-end events must not race
    /// it into an extra restart.
    restart_pending: bool,
    user_name: String,

    recognizer: Box<dyn Recognizer>,
    recognizer_rx: mpsc::Receiver<RecognizerEvent>,
    synthesizer: Arc<dyn Synthesizer>,
    speech_rx: mpsc::Receiver<()>,
    chat: Arc<ChatClient>,
    panel: Box<dyn FrontPanel>,

    events_tx: mpsc::Sender<ControllerEvent>,
    events_rx: mpsc::Receiver<ControllerEvent>,
    status: Arc<Mutex<StatusSnapshot>>,
}

impl VoiceCommandController {
    pub fn new(
        config: &Config,
        recognizer: Box<dyn Recognizer>,
        recognizer_rx: mpsc::Receiver<RecognizerEvent>,
        synthesizer: Arc<dyn Synthesizer>,
        speech_rx: mpsc::Receiver<()>,
        chat: Arc<ChatClient>,
        panel: Box<dyn FrontPanel>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        let status = Arc::new(Mutex::new(StatusSnapshot {
            state: ControllerState::Idle,
            listening: false,
            name: String::new(),
        }));

        Self {
            wake_prefix: config.wake.prefix.trim().to_uppercase(),
            restart_delay: std::time::Duration::from_millis(config.restart.delay_ms),
            state: ControllerState::Idle,
            listening: false,
            manually_stopped: false,
            restart_pending: false,
            user_name: String::new(),
            recognizer,
            recognizer_rx,
            synthesizer,
            speech_rx,
            chat,
            panel,
            events_tx,
            events_rx,
            status,
        }
    }

    /// Sender for control commands (used by the API and by `main`).
    pub fn events_tx(&self) -> mpsc::Sender<ControllerEvent> {
        self.events_tx.clone()
    }

    /// Shared snapshot for the /status endpoint.
    pub fn status(&self) -> Arc<Mutex<StatusSnapshot>> {
        Arc::clone(&self.status)
    }

    pub async fn run(mut self) {
        info!("Controller ready (wake prefix: '{}')", self.wake_prefix);
        loop {
            tokio::select! {
                ev = self.events_rx.recv() => match ev {
                    Some(ControllerEvent::StartPressed { name }) => self.on_start(name),
                    Some(ControllerEvent::StopPressed) => self.on_stop(),
                    Some(ControllerEvent::ReplyReady(result)) => self.on_reply(result),
                    Some(ControllerEvent::RestartElapsed) => self.on_restart_elapsed(),
                    None => break,
                },
                ev = self.recognizer_rx.recv() => match ev {
                    Some(RecognizerEvent::Result(text)) => self.on_result(&text),
                    Some(RecognizerEvent::Error(kind)) => self.on_recognition_error(&kind),
                    Some(RecognizerEvent::End) => self.on_recognition_end(),
                    None => break,
                },
                ended = self.speech_rx.recv() => match ended {
                    Some(()) => self.on_speech_ended(),
                    None => break,
                },
            }
        }
        debug!("Controller loop ended");
    }

    fn on_start(&mut self, name: String) {
        let name = name.trim().to_string();
        if name.is_empty() {
            warn!("Start requested without a user name");
            self.panel.alert(MSG_NAME_REQUIRED);
            return;
        }
        if self.listening {
            debug!("Already listening, start ignored");
            return;
        }

        self.user_name = name;
        self.listening = true;
        self.manually_stopped = false;
        self.restart_pending = false;
        self.panel.set_button(false, LISTENING_LABEL);
        self.panel.show_status("");
        self.panel.show_transcript(LISTENING_PLACEHOLDER);
        self.set_state(ControllerState::Listening);
        self.recognizer.start();
        info!("State: IDLE → LISTENING (user: {})", self.user_name);
    }

    fn on_stop(&mut self) {
        self.manually_stopped = true;
        self.listening = false;
        self.recognizer.stop();
        self.synthesizer.cancel();
        self.reset_idle();
        info!("Manual stop, State → IDLE");
    }

    fn on_result(&mut self, text: &str) {
        if !self.listening {
            debug!("Result after stop, ignored: {text}");
            return;
        }

        let phrase = text.trim().to_uppercase();
        info!("Phrase recognized: {phrase}");
        self.panel
            .show_transcript(&format!("🗣️ Frase detectada: {phrase}"));

        if phrase.starts_with(&self.wake_prefix) {
            self.set_state(ControllerState::Dispatching);
            info!("State: LISTENING → DISPATCHING");

            let chat = Arc::clone(&self.chat);
            // Re-read the identifier at dispatch time
            let name = self.user_name.clone();
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                let result = chat.send(&phrase, &name).await;
                let _ = events_tx.send(ControllerEvent::ReplyReady(result)).await;
            });
        } else {
            self.panel
                .append_transcript(&format!("Debes comenzar con '{}'.", self.wake_prefix));
        }
    }

    fn on_recognition_error(&mut self, kind: &RecognitionErrorKind) {
        warn!("Recognition error: {kind:?}");
        self.panel.show_status(error_message(kind));

        if self.manually_stopped {
            self.listening = false;
            self.reset_idle();
            return;
        }

        // Stop the broken session, then restart once after a fixed delay.
        // The timer is fire-and-forget; the handler re-checks the flags.
        self.recognizer.stop();
        self.restart_pending = true;
        let events_tx = self.events_tx.clone();
        let delay = self.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(ControllerEvent::RestartElapsed).await;
        });
    }

    fn on_recognition_end(&mut self) {
        if self.manually_stopped || !self.listening {
            debug!("Session ended while stopped");
            return;
        }
        if self.restart_pending {
            debug!("Session ended, delayed restart already scheduled");
            return;
        }
        if matches!(
            self.state,
            ControllerState::Dispatching | ControllerState::Speaking
        ) {
            // Listening pauses while the assistant answers; the
            // playback-end handler owns the next restart.
            debug!("Session ended during dispatch/playback");
            return;
        }

        self.panel.show_status(MSG_RESUMED);
        self.recognizer.start();
        debug!("Recognition resumed");
    }

    fn on_reply(&mut self, result: Result<String, ChatError>) {
        match result {
            Ok(reply) => {
                info!("Assistant reply: {reply}");
                self.panel.append_transcript(&format!("🤖 {reply}"));
                // Single playback channel: cancel before speaking
                self.synthesizer.cancel();
                self.synthesizer.speak(&reply);
                if self.listening && !self.manually_stopped {
                    self.set_state(ControllerState::Speaking);
                    info!("State: DISPATCHING → SPEAKING");
                }
            }
            Err(e) => {
                warn!("Dispatch failed: {e}");
                self.panel.show_status(MSG_API_UNREACHABLE);
                // Unlike recognition errors, dispatch failures are not
                // retried: back to idle until the user starts again.
                self.listening = false;
                self.reset_idle();
                info!("State → IDLE (dispatch failure)");
            }
        }
    }

    fn on_speech_ended(&mut self) {
        if self.listening && !self.manually_stopped {
            self.set_state(ControllerState::Listening);
            self.recognizer.start();
            info!("State: SPEAKING → LISTENING");
        } else {
            debug!("Playback ended while stopped");
        }
    }

    fn on_restart_elapsed(&mut self) {
        self.restart_pending = false;
        if self.manually_stopped || !self.listening {
            debug!("Restart window elapsed after stop, staying idle");
            return;
        }
        self.set_state(ControllerState::Listening);
        self.recognizer.start();
        info!("Recognition restarted after error");
    }

    fn reset_idle(&mut self) {
        self.panel.set_button(true, IDLE_LABEL);
        self.set_state(ControllerState::Idle);
    }

    fn set_state(&mut self, state: ControllerState) {
        self.state = state;
        let mut snapshot = self.status.lock().unwrap();
        snapshot.state = state;
        snapshot.listening = self.listening;
        snapshot.name = self.user_name.clone();
    }
}

fn error_message(kind: &RecognitionErrorKind) -> &'static str {
    match kind {
        RecognitionErrorKind::NotAllowed | RecognitionErrorKind::ServiceNotAllowed => {
            MSG_MIC_DENIED
        }
        RecognitionErrorKind::Network => MSG_RECOGNITION_NETWORK,
        RecognitionErrorKind::Other(_) => MSG_RECOGNITION_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecognizerProbe {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    struct MockRecognizer(Arc<RecognizerProbe>);

    impl Recognizer for MockRecognizer {
        fn start(&self) {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn stop(&self) {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct SynthProbe {
        spoken: Mutex<Vec<String>>,
        cancels: AtomicUsize,
    }

    struct MockSynthesizer(Arc<SynthProbe>);

    impl Synthesizer for MockSynthesizer {
        fn speak(&self, text: &str) {
            self.0.spoken.lock().unwrap().push(text.to_string());
        }
        fn cancel(&self) {
            self.0.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct PanelLog(Mutex<Vec<String>>);

    impl PanelLog {
        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
        fn contains(&self, line: &str) -> bool {
            self.lines().iter().any(|l| l == line)
        }
        fn last_button(&self) -> Option<String> {
            self.lines()
                .into_iter()
                .rev()
                .find(|l| l.starts_with("button:"))
        }
    }

    struct MockPanel(Arc<PanelLog>);

    impl FrontPanel for MockPanel {
        fn set_button(&self, enabled: bool, label: &str) {
            self.0 .0.lock().unwrap().push(format!("button:{enabled}:{label}"));
        }
        fn show_transcript(&self, text: &str) {
            self.0 .0.lock().unwrap().push(format!("transcript:{text}"));
        }
        fn append_transcript(&self, text: &str) {
            self.0 .0.lock().unwrap().push(format!("append:{text}"));
        }
        fn show_status(&self, text: &str) {
            self.0 .0.lock().unwrap().push(format!("status:{text}"));
        }
        fn alert(&self, text: &str) {
            self.0 .0.lock().unwrap().push(format!("alert:{text}"));
        }
    }

    struct Harness {
        events_tx: mpsc::Sender<ControllerEvent>,
        rec_tx: mpsc::Sender<RecognizerEvent>,
        speech_tx: mpsc::Sender<()>,
        status: Arc<Mutex<StatusSnapshot>>,
        recognizer: Arc<RecognizerProbe>,
        synth: Arc<SynthProbe>,
        panel: Arc<PanelLog>,
    }

    impl Harness {
        async fn start(&self, name: &str) {
            self.events_tx
                .send(ControllerEvent::StartPressed {
                    name: name.to_string(),
                })
                .await
                .unwrap();
        }

        async fn stop(&self) {
            self.events_tx.send(ControllerEvent::StopPressed).await.unwrap();
        }

        fn snapshot(&self) -> StatusSnapshot {
            self.status.lock().unwrap().clone()
        }
    }

    fn spawn_controller(chat_url: &str) -> Harness {
        let mut config = Config::default();
        config.chat.url = chat_url.to_string();
        config.chat.timeout_secs = 2;

        let (rec_tx, rec_rx) = mpsc::channel(16);
        let (speech_tx, speech_rx) = mpsc::channel(16);
        let recognizer = Arc::new(RecognizerProbe::default());
        let synth = Arc::new(SynthProbe::default());
        let panel = Arc::new(PanelLog::default());

        let controller = VoiceCommandController::new(
            &config,
            Box::new(MockRecognizer(Arc::clone(&recognizer))),
            rec_rx,
            Arc::new(MockSynthesizer(Arc::clone(&synth))),
            speech_rx,
            Arc::new(ChatClient::new(config.chat.clone()).unwrap()),
            Box::new(MockPanel(Arc::clone(&panel))),
        );
        let events_tx = controller.events_tx();
        let status = controller.status();
        tokio::spawn(controller.run());

        Harness {
            events_tx,
            rec_tx,
            speech_tx,
            status,
            recognizer,
            synth,
            panel,
        }
    }

    /// Let the controller drain its channels.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    /// Chat endpoint stand-in counting the requests it serves.
    async fn chat_stub(reply: serde_json::Value) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = (Arc::clone(&hits), reply);

        let app = Router::new()
            .route(
                "/chat",
                post(
                    |axum::extract::State((hits, reply)): axum::extract::State<(
                        Arc<AtomicUsize>,
                        serde_json::Value,
                    )>,
                     Json(_body): Json<serde_json::Value>| async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Json(reply)
                    },
                ),
            )
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/chat"), hits)
    }

    const UNREACHABLE: &str = "http://127.0.0.1:1/chat";

    #[tokio::test(start_paused = true)]
    async fn start_requires_a_name() {
        let h = spawn_controller(UNREACHABLE);

        h.start("   ").await;
        settle().await;

        assert!(h.panel.contains(&format!("alert:{MSG_NAME_REQUIRED}")));
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 0);
        assert!(!h.snapshot().listening);
        assert_eq!(h.snapshot().state, ControllerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_listening_is_idempotent() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.start("Ana").await;
        settle().await;

        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
        assert!(h.snapshot().listening);
        assert_eq!(h.snapshot().state, ControllerState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn non_matching_phrase_gets_warning_and_no_dispatch() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.rec_tx
            .send(RecognizerEvent::Result("hola alexa".into()))
            .await
            .unwrap();
        settle().await;

        assert!(h.panel.contains("transcript:🗣️ Frase detectada: HOLA ALEXA"));
        assert!(h.panel.contains("append:Debes comenzar con 'ALEXA'."));
        // Still listening; nothing was dispatched or spoken
        assert_eq!(h.snapshot().state, ControllerState::Listening);
        assert!(h.synth.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn matching_phrase_dispatches_and_speaks_reply() {
        let (url, hits) = chat_stub(serde_json::json!({"data": {"reply": "Listo"}})).await;
        let h = spawn_controller(&url);

        h.start("Ana").await;
        h.rec_tx
            .send(RecognizerEvent::Result("  alexa enciende la luz  ".into()))
            .await
            .unwrap();
        // Session ends right after the result; must not restart mid-dispatch
        h.rec_tx.send(RecognizerEvent::End).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(h.panel.contains("transcript:🗣️ Frase detectada: ALEXA ENCIENDE LA LUZ"));
        assert!(h.panel.contains("append:🤖 Listo"));
        assert_eq!(h.synth.spoken.lock().unwrap().as_slice(), ["Listo"]);
        assert_eq!(h.snapshot().state, ControllerState::Speaking);
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);

        // Playback end resumes listening
        h.speech_tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.snapshot().state, ControllerState::Listening);
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatch_failure_resets_to_idle_without_restart() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.rec_tx
            .send(RecognizerEvent::Result("ALEXA HOLA".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(h.panel.contains(&format!("status:{MSG_API_UNREACHABLE}")));
        let snapshot = h.snapshot();
        assert_eq!(snapshot.state, ControllerState::Idle);
        assert!(!snapshot.listening);
        assert_eq!(
            h.panel.last_button().unwrap(),
            format!("button:true:{IDLE_LABEL}")
        );

        // A late session-end must not revive the loop
        h.rec_tx.send(RecognizerEvent::End).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recognition_error_restarts_exactly_once_after_delay() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.rec_tx
            .send(RecognizerEvent::Error(RecognitionErrorKind::NotAllowed))
            .await
            .unwrap();
        // The stopped session still reports End; it must not restart early
        h.rec_tx.send(RecognizerEvent::End).await.unwrap();
        settle().await;

        assert!(h.panel.contains(&format!("status:{MSG_MIC_DENIED}")));
        assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
        assert_eq!(h.snapshot().state, ControllerState::Listening);

        // Exactly one restart per error
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_shows_network_message() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.rec_tx
            .send(RecognizerEvent::Error(RecognitionErrorKind::Network))
            .await
            .unwrap();
        settle().await;

        assert!(h.panel.contains(&format!("status:{MSG_RECOGNITION_NETWORK}")));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_during_restart_window_stays_idle() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.rec_tx
            .send(RecognizerEvent::Error(RecognitionErrorKind::Other(
                "boom".into(),
            )))
            .await
            .unwrap();
        settle().await;
        assert!(h.panel.contains(&format!("status:{MSG_RECOGNITION_FAILED}")));

        // Stop while the 1s restart timer is pending
        h.stop().await;
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
        let snapshot = h.snapshot();
        assert_eq!(snapshot.state, ControllerState::Idle);
        assert!(!snapshot.listening);
        assert_eq!(
            h.panel.last_button().unwrap(),
            format!("button:true:{IDLE_LABEL}")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_end_while_listening_resumes_immediately() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.rec_tx.send(RecognizerEvent::End).await.unwrap();
        settle().await;

        assert!(h.panel.contains(&format!("status:{MSG_RESUMED}")));
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_suppresses_end_restart() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.stop().await;
        h.rec_tx.send(RecognizerEvent::End).await.unwrap();
        settle().await;

        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.snapshot().state, ControllerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_allows_fresh_session() {
        let h = spawn_controller(UNREACHABLE);

        h.start("Ana").await;
        h.stop().await;
        h.start("Eva").await;
        settle().await;

        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
        let snapshot = h.snapshot();
        assert!(snapshot.listening);
        assert_eq!(snapshot.name, "Eva");
    }
}
