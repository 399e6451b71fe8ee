use crate::{
    app::{AppError, AppService},
    config::Language,
    semantic::{IndexStats, SearchError, SearchRequest, SearchResponse},
};
use anyhow::Context;
use axum::{
    async_trait,
    extract::{FromRequest, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<AppService>,
}

pub fn router(app: Arc<AppService>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/", get(index))
        .route("/ui", get(|| async { Redirect::permanent("/") }))
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/hindi/search", post(hindi_search))
        .route("/rebuild-index", post(rebuild_index))
        .route("/get-index-stats", get(index_stats))
        .route("/clear-embedding-cache", post(clear_embedding_cache))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(shared_state)
}

async fn start_app(app: AppService) -> anyhow::Result<()> {
    let bind_address = app.config().bind_address.clone();
    let app = Arc::new(app);

    {
        let app = app.clone();
        tokio::task::spawn_blocking(move || app.initialize_all())
            .await
            .context("service initialization panicked")?;
    }

    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    log::error!("failed to install signal handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        log::warn!("shutting down");
    }

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    log::info!("listening on {bind_address}");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

pub fn start_daemon(app: AppService) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(start_app(app))
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::LanguageNotConfigured(_) => StatusCode::NOT_FOUND,
            AppError::Search(SearchError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            AppError::Search(SearchError::IndexUnavailable(_) | SearchError::NoEmbeddings(_)) => {
                log::error!("{self:?}");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Search(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn bad_request(message: impl Into<String>) -> HttpError {
    HttpError(SearchError::InvalidRequest(message.into()).into())
}

fn parse_language(value: Option<&str>) -> Result<Language, HttpError> {
    match value {
        None => Ok(Language::default()),
        Some(v) if v.trim().is_empty() => Ok(Language::default()),
        Some(v) => v.parse().map_err(bad_request),
    }
}

fn default_result_count() -> usize {
    10
}

fn default_search_mode() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct SearchPayload {
    pub query: String,

    #[serde(default = "default_result_count")]
    pub result_count: usize,

    #[serde(default = "default_search_mode")]
    pub search_mode: String,

    #[serde(default)]
    pub show_metrics: bool,

    #[serde(default)]
    pub language: Option<String>,
}

impl From<SearchPayload> for SearchRequest {
    fn from(payload: SearchPayload) -> Self {
        SearchRequest {
            query: payload.query,
            result_count: payload.result_count,
            search_mode: payload.search_mode,
            show_metrics: payload.show_metrics,
        }
    }
}

/// Accepts both JSON and form-encoded search bodies.
#[async_trait]
impl<S> FromRequest<S> for SearchPayload
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(payload) = Form::<SearchPayload>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            Ok(payload)
        } else {
            let Json(payload) = Json::<SearchPayload>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            Ok(payload)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageQuery {
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<f64>,
}

async fn index(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "NIC code semantic search",
        "languages": state.app.languages(),
        "endpoints": [
            "POST /search",
            "POST /hindi/search",
            "POST /rebuild-index",
            "GET /get-index-stats",
            "POST /clear-embedding-cache",
            "GET /health",
        ],
    }))
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        message: "API is running".to_string(),
        time_taken: None,
    })
}

fn run_search(
    state: &SharedState,
    language: Language,
    payload: SearchPayload,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("search payload: {payload:?}");

    tokio::task::block_in_place(move || {
        let service = state.app.service(language)?;
        Ok(Json(service.search(&payload.into())?))
    })
}

async fn search(
    State(state): State<Arc<SharedState>>,
    payload: SearchPayload,
) -> Result<Json<SearchResponse>, HttpError> {
    let language = parse_language(payload.language.as_deref())?;
    run_search(&state, language, payload)
}

async fn hindi_search(
    State(state): State<Arc<SharedState>>,
    payload: SearchPayload,
) -> Result<Json<SearchResponse>, HttpError> {
    run_search(&state, Language::Hindi, payload)
}

async fn rebuild_index(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<StatusResponse>, HttpError> {
    let language = parse_language(query.language.as_deref())?;

    tokio::task::block_in_place(move || {
        let service = state.app.service(language)?;

        let started = Instant::now();
        let count = service.build_index(true)?;
        let elapsed = started.elapsed().as_secs_f64();

        Ok(Json(StatusResponse {
            status: "success",
            message: format!("{language} index rebuilt with {count} vectors"),
            time_taken: Some((elapsed * 100.0).round() / 100.0),
        }))
    })
}

async fn index_stats(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<IndexStats>, HttpError> {
    let language = parse_language(query.language.as_deref())?;

    tokio::task::block_in_place(move || {
        let service = state.app.service(language)?;
        Ok(Json(service.stats()?))
    })
}

async fn clear_embedding_cache(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<StatusResponse>, HttpError> {
    let language = parse_language(query.language.as_deref())?;

    tokio::task::block_in_place(move || {
        let service = state.app.service(language)?;
        service.clear_embedding_cache()?;

        Ok(Json(StatusResponse {
            status: "success",
            message: "Embedding cache cleared successfully".to_string(),
            time_taken: None,
        }))
    })
}
