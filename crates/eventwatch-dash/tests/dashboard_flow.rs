//! End-to-end tests of the dashboard core against a mock detection service.
//!
//! The mock serves `/status`, `/events`, `/events/:id`, `/video`, `/start`,
//! `/stop` and a server-sent-event push stream on `/push`.  Tests drive it by editing the
//! shared mock state and by publishing raw push messages.
//!
//! Run with: cargo test --test dashboard_flow

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use eventwatch_dash::api::{ApiClient, ApiError};
use eventwatch_dash::control;
use eventwatch_dash::core::{DashboardCore, DashboardEvent, OperatorCommand};
use eventwatch_dash::media::ResolvedMedia;
use eventwatch_dash::mode::ServiceMode;
use eventwatch_dash::view::{DashboardUpdate, DashboardView, ViewState};
use eventwatch_proto::config::Config;
use eventwatch_proto::protocol::{EventRule, SessionConfig};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

const CAMERA: &str = "rtsp://camera/1";

// ── mock backend ──────────────────────────────────────────────────────────────

struct MockState {
    active: bool,
    /// Newest first, as the real service orders them.
    events: Vec<Value>,
    /// Last body received on `POST /start`.
    started_with: Option<Value>,
}

#[derive(Clone)]
struct Mock {
    state: Arc<Mutex<MockState>>,
    pushes: broadcast::Sender<String>,
    /// Ends every open push stream.
    hangups: broadcast::Sender<()>,
    connects: Arc<AtomicUsize>,
}

impl Mock {
    fn set_active(&self, active: bool) {
        self.state.lock().unwrap().active = active;
    }

    /// Store an event (newest first) and publish it on the push stream.
    fn store_and_push(&self, record: Value) {
        self.state.lock().unwrap().events.insert(0, record.clone());
        let _ = self.pushes.send(record.to_string());
    }

    fn push_raw(&self, data: &str) {
        let _ = self.pushes.send(data.to_string());
    }

    fn subscribers(&self) -> usize {
        self.pushes.receiver_count()
    }

    fn hang_up(&self) {
        let _ = self.hangups.send(());
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

fn record(id: i64, clip: &str) -> Value {
    json!({
        "event_id": id,
        "event_timestamp": "2024-05-01T12:00:00+00:00",
        "event_code": "P1",
        "event_description": format!("person #{id}"),
        "event_video_url": clip,
        "event_detection_explanation_by_ai": "a person entered the frame",
    })
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": { "error_code": "NOT_FOUND", "message": message } })),
    )
        .into_response()
}

async fn status(State(mock): State<Mock>) -> Json<Value> {
    let active = mock.state.lock().unwrap().active;
    if active {
        Json(json!({
            "service_active": true,
            "queue_info": { "video_chunks_queue_size": 0, "event_detection_queue_size": 0 },
            "stream_url": CAMERA,
        }))
    } else {
        Json(json!({ "service_active": false, "queue_info": {} }))
    }
}

async fn events(
    State(mock): State<Mock>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(100);
    let events: Vec<Value> = mock
        .state
        .lock()
        .unwrap()
        .events
        .iter()
        .take(limit)
        .cloned()
        .collect();
    Json(json!({ "events": events }))
}

async fn event_by_id(State(mock): State<Mock>, Path(id): Path<i64>) -> Response {
    let found = mock
        .state
        .lock()
        .unwrap()
        .events
        .iter()
        .find(|e| e["event_id"] == json!(id))
        .cloned();
    match found {
        Some(e) => Json(e).into_response(),
        None => not_found(format!("Event {} not found", id)),
    }
}

async fn video(Query(params): Query<HashMap<String, String>>) -> Response {
    let path = params.get("filepath").cloned().unwrap_or_default();
    if path.starts_with("slow") {
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    if path.starts_with("missing") {
        return not_found(format!("Video file at path {} not found", path));
    }
    (StatusCode::OK, "clip").into_response()
}

async fn start_session(State(mock): State<Mock>, Json(body): Json<Value>) -> Response {
    let mut state = mock.state.lock().unwrap();
    if state.active {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "detail": { "error_code": "ALREADY_RUNNING", "message": "Service is already running" }
            })),
        )
            .into_response();
    }
    state.active = true;
    state.started_with = Some(body);
    Json(json!({ "status": "Services started successfully" })).into_response()
}

async fn stop(State(mock): State<Mock>) -> Json<Value> {
    mock.set_active(false);
    Json(json!({ "status": "Services stopped successfully" }))
}

async fn push_stream(State(mock): State<Mock>) -> Response {
    mock.connects.fetch_add(1, Ordering::SeqCst);
    let rx = mock.pushes.subscribe();
    let hangup = mock.hangups.subscribe();
    let stream = futures_util::stream::unfold((rx, hangup), |(mut rx, mut hangup)| async move {
        loop {
            tokio::select! {
                _ = hangup.recv() => return None,
                msg = rx.recv() => match msg {
                    Ok(msg) => {
                        let frame = format!("data: {}\n\n", msg);
                        return Some((Ok::<String, std::io::Error>(frame), (rx, hangup)));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    });
    axum::http::Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn start_mock(active: bool, initial: Vec<Value>) -> (Mock, String) {
    let (pushes, _) = broadcast::channel(64);
    let (hangups, _) = broadcast::channel(4);
    let mock = Mock {
        state: Arc::new(Mutex::new(MockState {
            active,
            events: initial,
            started_with: None,
        })),
        pushes,
        hangups,
        connects: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/status", get(status))
        .route("/events", get(events))
        .route("/events/:id", get(event_by_id))
        .route("/video", get(video))
        .route("/start", post(start_session))
        .route("/stop", post(stop))
        .route("/push", get(push_stream))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (mock, format!("http://{}", addr))
}

// ── dashboard harness ─────────────────────────────────────────────────────────

struct Dashboard {
    view: DashboardView,
    api: ApiClient,
    event_tx: mpsc::Sender<DashboardEvent>,
    updates: broadcast::Receiver<DashboardUpdate>,
    core_task: tokio::task::JoinHandle<()>,
}

impl Dashboard {
    async fn start(base_url: &str, auto_refresh: bool) -> Self {
        Self::start_with(base_url, |config| config.dashboard.auto_refresh = auto_refresh).await
    }

    async fn start_with<F>(base_url: &str, tweak: F) -> Self
    where
        F: FnOnce(&mut Config),
    {
        let mut config = Config::default();
        config.backend.base_url = base_url.to_string();
        config.backend.request_timeout_secs = 5;
        config.polling.interval_secs = 1;
        config.stream.path = "/push".to_string();
        config.stream.max_backoff_secs = 1;
        tweak(&mut config);

        let api = ApiClient::new(base_url, Duration::from_secs(5)).unwrap();
        let (broadcast_tx, updates) = broadcast::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        let core = DashboardCore::new(config, api.clone(), broadcast_tx, event_tx.clone());
        let view = core.view();
        let core_task = tokio::spawn(async move {
            core.run(event_rx).await.unwrap();
        });
        Self {
            view,
            api,
            event_tx,
            updates,
            core_task,
        }
    }

    async fn operator(&self, cmd: OperatorCommand) {
        self.event_tx
            .send(DashboardEvent::Operator(cmd))
            .await
            .unwrap();
    }

    async fn wait_for<F>(&self, what: &str, cond: F) -> ViewState
    where
        F: Fn(&ViewState) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(6);
        loop {
            let state = self.view.get().await;
            if cond(&state) {
                return state;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {}: {:?}", what, state);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn shutdown(self) {
        self.event_tx.send(DashboardEvent::Shutdown).await.unwrap();
        self.core_task.await.unwrap();
    }
}

fn ids(state: &ViewState) -> Vec<i64> {
    state.events.iter().map(|e| e.id).collect()
}

async fn wait_for_subscriber(mock: &Mock) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(6);
    while mock.subscribers() == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "push stream never connected"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn poll_then_duplicate_push_keeps_single_entry() {
    let (mock, base) = start_mock(true, vec![record(5, "e5.mp4"), record(4, "e4.mp4")]).await;
    let dash = Dashboard::start(&base, true).await;

    let state = dash.wait_for("first snapshot", |s| ids(s) == vec![5, 4]).await;
    assert_eq!(state.mode, ServiceMode::ActiveLive);
    assert_eq!(state.media, ResolvedMedia::LiveImage(CAMERA.to_string()));

    wait_for_subscriber(&mock).await;
    mock.push_raw(&record(5, "e5.mp4").to_string());
    mock.push_raw("{ not an event");
    mock.store_and_push(record(6, "e6.mp4"));

    let state = dash.wait_for("pushed event", |s| s.events.len() == 3).await;
    assert_eq!(ids(&state), vec![6, 5, 4]);

    dash.shutdown().await;
}

#[tokio::test]
async fn stale_clip_resolution_is_discarded() {
    let (_mock, base) = start_mock(
        true,
        vec![record(2, "missing.mp4"), record(1, "slow.mp4")],
    )
    .await;
    let dash = Dashboard::start(&base, true).await;
    let state = dash.wait_for("snapshot", |s| s.events.len() == 2).await;

    let x = state.event(1).cloned().unwrap();
    let y = state.event(2).cloned().unwrap();
    dash.operator(OperatorCommand::Select(Some(x))).await;
    dash.operator(OperatorCommand::Select(Some(y))).await;

    let state = dash
        .wait_for("clip error for y", |s| {
            matches!(s.media, ResolvedMedia::ClipError(_))
        })
        .await;
    assert_eq!(state.selected, Some(2));

    // x's slow resolution completes in the meantime and must not win
    tokio::time::sleep(Duration::from_millis(800)).await;
    let state = dash.view.get().await;
    assert_eq!(state.selected, Some(2));
    match &state.media {
        ResolvedMedia::ClipError(msg) => assert!(msg.contains("404"), "{}", msg),
        other => panic!("expected clip error, got {:?}", other),
    }

    dash.shutdown().await;
}

#[tokio::test]
async fn select_then_deselect_shows_clip_then_live() {
    let (_mock, base) = start_mock(true, vec![record(3, "chunks/3.mp4")]).await;
    let dash = Dashboard::start(&base, true).await;
    let state = dash.wait_for("snapshot", |s| s.events.len() == 1).await;

    dash.operator(OperatorCommand::Select(state.event(3).cloned()))
        .await;
    let state = dash
        .wait_for("clip", |s| matches!(s.media, ResolvedMedia::PlayingClip(_)))
        .await;
    match &state.media {
        ResolvedMedia::PlayingClip(url) => {
            assert!(url.starts_with(&format!("{}/video?filepath=", base)), "{}", url);
            assert!(url.contains("chunks%2F3.mp4"), "{}", url);
        }
        other => panic!("unexpected media {:?}", other),
    }

    dash.operator(OperatorCommand::Select(None)).await;
    let state = dash
        .wait_for("live image", |s| matches!(s.media, ResolvedMedia::LiveImage(_)))
        .await;
    assert_eq!(state.selected, None);

    dash.shutdown().await;
}

#[tokio::test]
async fn paused_dashboard_ignores_new_events_until_resumed() {
    let (mock, base) = start_mock(true, vec![record(1, "e1.mp4")]).await;
    let dash = Dashboard::start(&base, true).await;
    dash.wait_for("snapshot", |s| s.events.len() == 1).await;
    wait_for_subscriber(&mock).await;

    dash.operator(OperatorCommand::ToggleAutoRefresh).await;
    dash.wait_for("paused", |s| s.mode == ServiceMode::ActivePaused)
        .await;

    mock.store_and_push(record(2, "e2.mp4"));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(ids(&dash.view.get().await), vec![1]);

    dash.operator(OperatorCommand::ToggleAutoRefresh).await;
    let state = dash.wait_for("resumed poll", |s| s.events.len() == 2).await;
    assert_eq!(state.mode, ServiceMode::ActiveLive);
    assert_eq!(ids(&state), vec![2, 1]);

    dash.shutdown().await;
}

#[tokio::test]
async fn service_stop_goes_inactive_and_freezes_log() {
    let (mock, base) = start_mock(true, vec![record(1, "e1.mp4")]).await;
    let mut dash = Dashboard::start(&base, true).await;
    dash.wait_for("snapshot", |s| s.events.len() == 1).await;
    wait_for_subscriber(&mock).await;

    mock.set_active(false);
    let state = dash
        .wait_for("inactive", |s| s.mode == ServiceMode::Inactive)
        .await;
    let frozen = ids(&state);

    mock.store_and_push(record(2, "e2.mp4"));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let state = dash.view.get().await;
    assert_eq!(ids(&state), frozen);
    assert_eq!(state.mode, ServiceMode::Inactive);

    let mut left = false;
    while let Ok(update) = dash.updates.try_recv() {
        if update == DashboardUpdate::LeaveDashboard {
            left = true;
        }
    }
    assert!(left, "LeaveDashboard was not broadcast");

    dash.shutdown().await;
}

#[tokio::test]
async fn stop_command_reaches_service() {
    let (_mock, base) = start_mock(true, vec![]).await;
    let dash = Dashboard::start(&base, true).await;
    dash.wait_for("live", |s| s.mode == ServiceMode::ActiveLive)
        .await;

    dash.operator(OperatorCommand::StopService).await;
    dash.wait_for("inactive after stop", |s| s.mode == ServiceMode::Inactive)
        .await;

    dash.shutdown().await;
}

#[tokio::test]
async fn auto_refresh_off_starts_paused() {
    let (_mock, base) = start_mock(true, vec![record(1, "e1.mp4")]).await;
    let dash = Dashboard::start(&base, false).await;
    dash.wait_for("paused", |s| s.mode == ServiceMode::ActivePaused)
        .await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(dash.view.get().await.events.is_empty());
    dash.shutdown().await;
}

#[tokio::test]
async fn control_api_selects_remote_event() {
    let (_mock, base) = start_mock(true, vec![record(7, "e7.mp4")]).await;
    let dash = Dashboard::start(&base, false).await;
    dash.wait_for("paused", |s| s.mode == ServiceMode::ActivePaused)
        .await;

    let app = control::router(dash.view.clone(), dash.api.clone(), dash.event_tx.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = reqwest::Client::new();

    // event 7 is not in the (paused, empty) log, so it is fetched by id
    let resp = client
        .post(format!("http://{}/api/select/7", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    dash.wait_for("clip", |s| {
        s.selected == Some(7) && matches!(s.media, ResolvedMedia::PlayingClip(_))
    })
    .await;

    let resp = client
        .post(format!("http://{}/api/select/99", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let state: Value = client
        .get(format!("http://{}/api/state", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["mode"], "active_paused");
    assert_eq!(state["selected"], 7);
    assert_eq!(state["media"]["kind"], "playing_clip");

    assert_eq!(
        dash.view.event(7).await,
        None,
        "selection does not insert into the log"
    );
    dash.shutdown().await;
}

#[tokio::test]
async fn push_stream_reconnects_after_server_close() {
    let (mock, base) = start_mock(true, vec![record(1, "e1.mp4")]).await;
    // one poll at activation, then only pushes change the log
    let dash = Dashboard::start_with(&base, |config| config.polling.interval_secs = 60).await;
    dash.wait_for("snapshot", |s| ids(s) == vec![1]).await;
    wait_for_subscriber(&mock).await;

    mock.push_raw(&record(2, "e2.mp4").to_string());
    dash.wait_for("first push", |s| ids(s) == vec![2, 1]).await;

    mock.hang_up();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(6);
    while mock.connects() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "stream never reconnected");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    wait_for_subscriber(&mock).await;

    mock.push_raw(&record(3, "e3.mp4").to_string());
    let state = dash.wait_for("push after reconnect", |s| s.events.len() == 3).await;
    assert_eq!(ids(&state), vec![3, 2, 1]);
    assert_eq!(state.mode, ServiceMode::ActiveLive);

    dash.shutdown().await;
}

#[tokio::test]
async fn start_posts_session_config() {
    let (mock, base) = start_mock(false, vec![]).await;
    let api = ApiClient::new(&base, Duration::from_secs(5)).unwrap();
    let session = SessionConfig {
        model: "gemini-2.0-flash".to_string(),
        rtsp_url: CAMERA.to_string(),
        chunk_duration: 5,
        context: "front door".to_string(),
        events: vec![EventRule {
            event_code: "P1".to_string(),
            event_description: "person".to_string(),
            detection_guidelines: "any person in frame".to_string(),
        }],
    };

    api.start(&session).await.unwrap();
    let body = mock.state.lock().unwrap().started_with.clone().unwrap();
    assert_eq!(body["model"], "gemini-2.0-flash");
    assert_eq!(body["rtsp_url"], CAMERA);
    assert_eq!(body["chunk_duration"], 5);
    assert_eq!(body["context"], "front door");
    assert_eq!(body["events"][0]["event_code"], "P1");
    assert_eq!(body["events"][0]["detection_guidelines"], "any person in frame");

    // a second start while running is refused with the server's message
    match api.start(&session).await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, reqwest::StatusCode::CONFLICT);
            assert_eq!(message, "Service is already running");
        }
        other => panic!("expected conflict, got {:?}", other.map(|_| ())),
    }
}
