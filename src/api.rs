//! HTTP control surface for the controller.
//!
//! Remote stand-in for the widget's button and name input: POST /start
//! with a name, POST /stop, GET /status. Validation of the name itself is
//! the controller's job; the API only refuses requests it cannot even
//! forward.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::controller::{ControllerEvent, StatusSnapshot};

#[derive(Clone)]
pub struct ControlApiState {
    pub events_tx: mpsc::Sender<ControllerEvent>,
    pub status: Arc<Mutex<StatusSnapshot>>,
}

#[derive(Deserialize)]
struct StartRequest {
    #[serde(default)]
    name: String,
}

#[derive(Serialize)]
struct StatusResponse {
    state: String,
    listening: bool,
    name: String,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

/// Build the axum router.
pub fn router(state: ControlApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/start", post(handle_start))
        .route("/stop", post(handle_stop))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_control_api(state: ControlApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ControlApiState>) -> Json<StatusResponse> {
    let snapshot = state.status.lock().unwrap().clone();
    Json(StatusResponse {
        state: snapshot.state.to_string(),
        listening: snapshot.listening,
        name: snapshot.name,
    })
}

async fn handle_start(
    State(state): State<ControlApiState>,
    Json(req): Json<StartRequest>,
) -> Json<SimpleResponse> {
    info!("HTTP /start (name: '{}')", req.name);
    match state
        .events_tx
        .send(ControllerEvent::StartPressed { name: req.name })
        .await
    {
        Ok(()) => Json(SimpleResponse::ok("requested")),
        Err(e) => Json(SimpleResponse::err(format!("controller gone: {e}"))),
    }
}

async fn handle_stop(State(state): State<ControlApiState>) -> Json<SimpleResponse> {
    info!("HTTP /stop");
    match state.events_tx.send(ControllerEvent::StopPressed).await {
        Ok(()) => Json(SimpleResponse::ok("stopped")),
        Err(e) => Json(SimpleResponse::err(format!("controller gone: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerState;
    use pretty_assertions::assert_eq;

    fn test_state() -> (ControlApiState, mpsc::Receiver<ControllerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(8);
        let status = Arc::new(Mutex::new(StatusSnapshot {
            state: ControllerState::Idle,
            listening: false,
            name: String::new(),
        }));
        (ControlApiState { events_tx, status }, events_rx)
    }

    async fn serve(state: ControlApiState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn start_forwards_name_to_controller() {
        let (state, mut events_rx) = test_state();
        let base = serve(state).await;

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .post(format!("{base}/start"))
            .json(&serde_json::json!({"name": "Ana"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["status"], "requested");

        match events_rx.recv().await.unwrap() {
            ControllerEvent::StartPressed { name } => assert_eq!(name, "Ana"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_forwards_to_controller() {
        let (state, mut events_rx) = test_state();
        let base = serve(state).await;

        reqwest::Client::new()
            .post(format!("{base}/stop"))
            .send()
            .await
            .unwrap();

        assert!(matches!(
            events_rx.recv().await.unwrap(),
            ControllerEvent::StopPressed
        ));
    }

    #[tokio::test]
    async fn status_reports_snapshot() {
        let (state, _events_rx) = test_state();
        {
            let mut snapshot = state.status.lock().unwrap();
            snapshot.state = ControllerState::Listening;
            snapshot.listening = true;
            snapshot.name = "Ana".into();
        }
        let base = serve(state).await;

        let resp: serde_json::Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["state"], "LISTENING");
        assert_eq!(resp["listening"], true);
        assert_eq!(resp["name"], "Ana");
    }
}
