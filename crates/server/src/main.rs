use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post, put},
    Json, Router,
};
use review_api::{
    add_comment, change_status, delete_comment, edit_comment, export_submission,
    get_submission, list_comments, my_latest_score, score_summary, set_flag, submit_score,
    update_notes, ReviewContext, ReviewError, ReviewUpdate, ScoringRoster,
};
use serde::Deserialize;
use shared::{
    domain::{AdminId, CommentEvent, EventId, ScorePayload, SubmissionId, SubmissionRecord},
    error::{ApiError, ErrorCode},
    protocol::{
        AddCommentRequest, ChangeStatusRequest, DeleteCommentRequest, EditCommentRequest,
        ListCommentsQuery, ServerEvent, SetFlagRequest, SubmitScoreRequest, UpdateNotesRequest,
    },
    scoring::ScoreSummary,
};
use storage::{open_backend, CommentLogStore, Subscription};
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_REQUEST_BYTES: usize = 64 * 1024;

type HttpResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct LatestScoreQuery {
    admin_id: String,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    submission_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let backend = open_backend(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open review database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let store = CommentLogStore::with_capacity(backend, settings.feed_capacity);
    let mut api = ReviewContext::new(store);
    if !settings.scoring_admins.is_empty() {
        info!(admins = settings.scoring_admins.len(), "scoring restricted to roster");
        api = api.with_policy(Arc::new(ScoringRoster::new(settings.scoring_admins)));
    }

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "review server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/submissions/:id", get(http_get_submission))
        .route("/submissions/:id/notes", put(http_update_notes))
        .route(
            "/submissions/:id/comments",
            get(http_list_comments).post(http_add_comment),
        )
        .route(
            "/submissions/:id/comments/:event_id",
            patch(http_edit_comment).delete(http_delete_comment),
        )
        .route("/submissions/:id/scores", post(http_submit_score))
        .route("/submissions/:id/scores/latest", get(http_latest_score))
        .route("/submissions/:id/scores/summary", get(http_score_summary))
        .route("/submissions/:id/status", post(http_change_status))
        .route("/submissions/:id/flag", post(http_set_flag))
        .route("/submissions/:id/export", get(http_export))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ReviewError) -> (StatusCode, Json<ApiError>) {
    let api: ApiError = err.into();
    (status_for(api.code), Json(api))
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.api.store.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::StorageUnavailable, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn http_get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> HttpResult<Json<SubmissionRecord>> {
    let record = get_submission(&state.api, SubmissionId(id))
        .await
        .map_err(http_error)?;
    Ok(Json(record))
}

async fn http_update_notes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateNotesRequest>,
) -> HttpResult<Json<SubmissionRecord>> {
    let record = update_notes(&state.api, SubmissionId(id), &req.admin, &req.notes)
        .await
        .map_err(http_error)?;
    Ok(Json(record))
}

async fn http_list_comments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(q): Query<ListCommentsQuery>,
) -> HttpResult<Json<Vec<CommentEvent>>> {
    let events = list_comments(&state.api, SubmissionId(id), q.filter)
        .await
        .map_err(http_error)?;
    Ok(Json(events))
}

async fn http_add_comment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AddCommentRequest>,
) -> HttpResult<(StatusCode, Json<CommentEvent>)> {
    let event = add_comment(&state.api, SubmissionId(id), req.admin, &req.content)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn http_edit_comment(
    State(state): State<Arc<AppState>>,
    Path((id, event_id)): Path<(i64, i64)>,
    Json(req): Json<EditCommentRequest>,
) -> HttpResult<Json<CommentEvent>> {
    let event = edit_comment(
        &state.api,
        SubmissionId(id),
        EventId(event_id),
        &req.admin,
        &req.content,
    )
    .await
    .map_err(http_error)?;
    Ok(Json(event))
}

async fn http_delete_comment(
    State(state): State<Arc<AppState>>,
    Path((id, event_id)): Path<(i64, i64)>,
    Json(req): Json<DeleteCommentRequest>,
) -> HttpResult<StatusCode> {
    delete_comment(&state.api, SubmissionId(id), EventId(event_id), &req.admin)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_submit_score(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<SubmitScoreRequest>,
) -> HttpResult<Json<ReviewUpdate>> {
    let update = submit_score(
        &state.api,
        SubmissionId(id),
        req.admin,
        req.scores,
        req.comment,
    )
    .await
    .map_err(http_error)?;
    Ok(Json(update))
}

async fn http_latest_score(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(q): Query<LatestScoreQuery>,
) -> HttpResult<Json<Option<ScorePayload>>> {
    let latest = my_latest_score(&state.api, SubmissionId(id), &AdminId::new(q.admin_id))
        .await
        .map_err(http_error)?;
    Ok(Json(latest))
}

async fn http_score_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> HttpResult<Json<ScoreSummary>> {
    let summary = score_summary(&state.api, SubmissionId(id))
        .await
        .map_err(http_error)?;
    Ok(Json(summary))
}

async fn http_change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ChangeStatusRequest>,
) -> HttpResult<Json<ReviewUpdate>> {
    let update = change_status(
        &state.api,
        SubmissionId(id),
        req.admin,
        req.new_status,
        req.reason,
    )
    .await
    .map_err(http_error)?;
    Ok(Json(update))
}

async fn http_set_flag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<SetFlagRequest>,
) -> HttpResult<Json<ReviewUpdate>> {
    let update = set_flag(
        &state.api,
        SubmissionId(id),
        req.admin,
        req.flagged,
        req.reason,
    )
    .await
    .map_err(http_error)?;
    Ok(Json(update))
}

async fn http_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> HttpResult<impl IntoResponse> {
    let export = export_submission(&state.api, SubmissionId(id))
        .await
        .map_err(http_error)?;
    let disposition = format!("attachment; filename=\"submission-{id}-review.json\"");
    let disposition = HeaderValue::from_str(&disposition).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(export)))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> HttpResult<impl IntoResponse> {
    let submission_id = SubmissionId(q.submission_id);
    get_submission(&state.api, submission_id)
        .await
        .map_err(http_error)?;
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, submission_id)))
}

/// Latest delivered comment set of a live subscription. A slow reader only
/// ever has the newest set pending; older ones are overwritten.
type SnapshotFeed = watch::Receiver<Option<Vec<CommentEvent>>>;

fn snapshot_feed(
    api: &ReviewContext,
    submission_id: SubmissionId,
) -> (Subscription, SnapshotFeed) {
    let (updates_tx, updates_rx) = watch::channel(None);
    let subscription = review_api::subscribe(api, submission_id, move |events| {
        updates_tx.send_replace(Some(events));
    });
    (subscription, updates_rx)
}

/// Streams a `CommentsSnapshot` frame for the newest delivery of a live subscription.
async fn ws_connection(
    state: Arc<AppState>,
    socket: axum::extract::ws::WebSocket,
    submission_id: SubmissionId,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let (subscription, mut updates_rx) = snapshot_feed(&state.api, submission_id);

    let mut send_task = tokio::spawn(async move {
        while updates_rx.changed().await.is_ok() {
            let Some(events) = updates_rx.borrow_and_update().clone() else {
                continue;
            };
            let frame = ServerEvent::CommentsSnapshot {
                submission_id,
                events,
            };
            let text = match serde_json::to_string(&frame) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });
    let mut recv_task =
        tokio::spawn(async move { while let Some(Ok(_msg)) = receiver.next().await {} });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    subscription.unsubscribe();
    debug!(%submission_id, "comment feed socket closed");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
