use crate::api::ApiClient;
use crate::core::{lookup_event, DashboardEvent, OperatorCommand};
use crate::view::{DashboardView, ViewState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Clone)]
struct ControlState {
    view: DashboardView,
    api: ApiClient,
    event_tx: mpsc::Sender<DashboardEvent>,
}

pub fn router(view: DashboardView, api: ApiClient, event_tx: mpsc::Sender<DashboardEvent>) -> Router {
    let state = ControlState { view, api, event_tx };
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/select/:id", post(select_event))
        .route("/api/deselect", post(deselect))
        .route("/api/toggle", post(toggle))
        .route("/api/stop", post(stop_service))
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    view: DashboardView,
    api: ApiClient,
    event_tx: mpsc::Sender<DashboardEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(view, api, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind control API to {}: {}", addr, e);
                return;
            }
        };

        info!("Control API listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("Control API error: {}", e);
        }
    })
}

async fn send(state: &ControlState, cmd: OperatorCommand) -> StatusCode {
    if state
        .event_tx
        .send(DashboardEvent::Operator(cmd))
        .await
        .is_err()
    {
        error!("Control API: dashboard core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<ControlState>) -> Json<ViewState> {
    Json(state.view.get().await)
}

async fn select_event(State(state): State<ControlState>, Path(id): Path<i64>) -> StatusCode {
    info!("Control API: select event {}", id);
    match lookup_event(&state.view, &state.api, id).await {
        Ok(event) => send(&state, OperatorCommand::Select(Some(event))).await,
        Err(e) => {
            warn!("Control API: cannot select event {}: {}", id, e);
            StatusCode::NOT_FOUND
        }
    }
}

async fn deselect(State(state): State<ControlState>) -> StatusCode {
    info!("Control API: deselect");
    send(&state, OperatorCommand::Select(None)).await
}

async fn toggle(State(state): State<ControlState>) -> StatusCode {
    info!("Control API: toggle auto-refresh");
    send(&state, OperatorCommand::ToggleAutoRefresh).await
}

async fn stop_service(State(state): State<ControlState>) -> StatusCode {
    info!("Control API: stop service");
    send(&state, OperatorCommand::StopService).await
}
