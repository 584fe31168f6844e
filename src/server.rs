use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use askama::Template;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::Database;
use crate::index::Indexer;
use crate::models::{
    AsyncSearchRequest, Category, CorrectionSubmission, IndexRequest, IndexResponse, IndexStatus,
    SearchOutcome, SearchRequest,
};
use crate::qdrant_store::QdrantStore;
use crate::search::SearchService;
use crate::stream::SessionRegistry;
use crate::tasks;

#[derive(Clone)]
struct AppState {
    config: AppConfig,
    db: Database,
    search: SearchService,
    indexer: Arc<Indexer>,
    qdrant: QdrantStore,
    sessions: Arc<SessionRegistry>,
    jobs: Arc<Mutex<HashMap<String, IndexStatus>>>,
}

pub async fn run_server(
    config: AppConfig,
    db: Database,
    search: SearchService,
    indexer: Arc<Indexer>,
    qdrant: QdrantStore,
    sessions: Arc<SessionRegistry>,
) -> Result<()> {
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let state = AppState {
        config: config.clone(),
        db,
        search,
        indexer,
        qdrant,
        sessions,
        jobs: Arc::new(Mutex::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/", get(index_page))
        .route("/api/search", post(search_handler))
        .route("/api/search/async", post(async_search_handler))
        .route("/api/index", post(start_index))
        .route("/api/index/:job_id", get(get_index_status))
        .route(
            "/api/categories/:category_id/corrections",
            post(moderate_correction),
        )
        .route("/api/categories/:category_id", delete(delete_category))
        .route("/ws/:session_id", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let categories = state.db.categories(None).await.map_err(ApiError::from)?;

    let template = IndexTemplate { categories };
    let body = template.render().map_err(ApiError::from)?;

    Ok(Html(body))
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchOutcome>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty".to_string()));
    }

    let outcome = state.search.answer(&request).await?;
    Ok(Json(outcome))
}

async fn async_search_handler(
    State(state): State<AppState>,
    Json(request): Json<AsyncSearchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.callback_url.trim().is_empty() {
        return Err(ApiError::bad_request(
            "callback_url must not be empty".to_string(),
        ));
    }

    tasks::schedule(
        state.search.clone(),
        state.config.callback.clone(),
        request,
    );

    Ok(Json(json!({ "status": "scheduled" })))
}

async fn start_index(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let job_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let initial = IndexStatus {
        job_id: job_id.clone(),
        status: "started".to_string(),
        stage: "queued".to_string(),
        message: None,
        documents: 0,
        corrections: 0,
        started_at: now,
        updated_at: now,
    };

    {
        let mut jobs = state
            .jobs
            .lock()
            .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))?;
        jobs.insert(job_id.clone(), initial.clone());
    }

    let state_for_task = state.clone();
    let job_id_for_task = job_id.clone();
    tokio::spawn(async move {
        update_job(&state_for_task, &job_id_for_task, |status| {
            status.status = "running".to_string();
            status.stage = "indexing".to_string();
        });

        match state_for_task.indexer.index(request.category_id).await {
            Ok(reports) => {
                let documents: usize = reports.iter().map(|r| r.documents).sum();
                let corrections: usize = reports.iter().map(|r| r.corrections).sum();
                let failed: Vec<String> = reports
                    .iter()
                    .flat_map(|r| r.failed_documents.iter().cloned())
                    .collect();

                update_job(&state_for_task, &job_id_for_task, |status| {
                    status.status = "completed".to_string();
                    status.stage = "done".to_string();
                    status.documents = documents as i64;
                    status.corrections = corrections as i64;
                    status.message = if failed.is_empty() {
                        None
                    } else {
                        Some(format!("failed documents: {}", failed.join(", ")))
                    };
                });
            }
            Err(err) => {
                tracing::error!("index job {} failed: {err:#}", job_id_for_task);
                update_job(&state_for_task, &job_id_for_task, |status| {
                    status.status = "failed".to_string();
                    status.stage = "error".to_string();
                    status.message = Some(format!("{err:#}"));
                });
            }
        }
    });

    Ok(Json(IndexResponse {
        job_id,
        status: "started".to_string(),
    }))
}

fn update_job(state: &AppState, job_id: &str, apply: impl FnOnce(&mut IndexStatus)) {
    if let Ok(mut jobs) = state.jobs.lock() {
        if let Some(status) = jobs.get_mut(job_id) {
            apply(status);
            status.updated_at = Utc::now();
        }
    }
}

async fn get_index_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<IndexStatus>, ApiError> {
    let status = state
        .jobs
        .lock()
        .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))?
        .get(&job_id)
        .cloned();

    match status {
        Some(status) => Ok(Json(status)),
        None => Err(ApiError::not_found(format!("index job not found: {job_id}"))),
    }
}

/// Moderation form semantics: `mark_as_deleted` removes the correction for
/// the submitted query; otherwise the correction is updated in place when
/// one exists and created when it does not.
async fn moderate_correction(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
    Json(submission): Json<CorrectionSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    if submission.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty".to_string()));
    }

    let category = state
        .db
        .category_by_id(category_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("category not found: {category_id}")))?;

    let existing = state
        .db
        .correction_by_query(category.id, &submission.query)
        .await?;

    if submission.mark_as_deleted {
        if let Some(correction) = existing {
            state.db.delete_correction(correction.id).await?;
        }
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "success", "message": "Correction deleted." })),
        ));
    }

    match existing {
        Some(correction) => {
            state
                .db
                .update_correction(correction.id, &submission.query, &submission.answer)
                .await?;
        }
        None => {
            state
                .db
                .insert_correction(category.id, &submission.query, &submission.answer)
                .await?;
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "message": "Correction saved successfully." })),
    ))
}

async fn delete_category(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.db.delete_category(category_id).await? {
        Some(category) => {
            state.qdrant.delete_collection(&category.slug).await;
            Ok(Json(json!({ "status": "success" })))
        }
        None => Err(ApiError::not_found(format!(
            "category not found: {category_id}"
        ))),
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_tokens(socket, state, session_id))
}

async fn stream_tokens(mut socket: WebSocket, state: AppState, session_id: String) {
    let mut tokens = state.sessions.register(&session_id);

    loop {
        tokio::select! {
            token = tokens.recv() => {
                let Some(token) = token else { break };
                let frame = json!({ "token": token }).to_string();
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.sessions.unregister(&session_id);
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    categories: Vec<Category>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl From<askama::Error> for ApiError {
    fn from(value: askama::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
