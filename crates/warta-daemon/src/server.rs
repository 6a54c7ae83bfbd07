use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use warta_db::{Database, MediaStore, PostError};

mod forms;
mod posts;

/// Request body cap; must stay above the image size limit so oversized
/// uploads reach field validation instead of dying at the extractor.
const MAX_BODY_BYTES: usize = 3 * 1024 * 1024;

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let db = Database::connect(&config.db_url)
        .await
        .context("failed to open database")?;

    let media = MediaStore::new(config.storage_root.clone());
    let state = Arc::new(AppState { db, media });

    let app = build_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(addr = %config.listen_addr, "warta-daemon listening");
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/posts", get(posts::list_posts).post(posts::store_post))
        .route("/posts/create", get(posts::create_form))
        .route(
            "/posts/:id",
            get(posts::show_post)
                .put(posts::update_post)
                .patch(posts::update_post)
                .delete(posts::destroy_post),
        )
        .route("/posts/:id/edit", get(posts::edit_form))
        .nest_service("/storage/posts", ServeDir::new(state.media.public_dir()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub media: MediaStore,
}

#[derive(Debug, Clone)]
struct AppConfig {
    listen_addr: SocketAddr,
    db_url: String,
    storage_root: PathBuf,
}

impl AppConfig {
    fn from_env() -> Result<Self> {
        let listen_addr = env::var("WARTA_API_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid WARTA_API_ADDR")?;

        let db_url = env::var("WARTA_DB_DSN")
            .or_else(|_| env::var("DATABASE_URL"))
            .context("WARTA_DB_DSN or DATABASE_URL must be configured")?;

        let storage_root = env::var("WARTA_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./storage/public"));

        Ok(Self {
            listen_addr,
            db_url,
            storage_root,
        })
    }
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is healthy"))
)]
async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Prometheus metrics", content_type = "text/plain"))
)]
async fn metrics() -> impl IntoResponse {
    (StatusCode::OK, "# metrics placeholder\nwarta_daemon_up 1\n")
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    fields: Option<BTreeMap<String, Vec<String>>>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fields: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }

    fn storage<E: std::fmt::Display>(err: E) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("storage failure: {err}"),
        )
    }

    fn validation(errors: forms::ValidationErrors) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "validation failed".to_string(),
            fields: Some(errors.into_fields()),
        }
    }
}

impl From<PostError> for ApiError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::NotFound(id) => {
                ApiError::new(StatusCode::NOT_FOUND, format!("post {} not found", id))
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::bad_request(format!("malformed multipart request: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, message = %self.message, "api error");
        let body = Json(ErrorBody {
            error: self.message,
            fields: self.fields,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, Vec<String>>>,
}

pub mod docs {
    use super::*;

    #[derive(OpenApi)]
    #[openapi(
        info(title = "Warta Daemon API", version = "0.1.0"),
        paths(
            healthz,
            metrics,
            posts::list_posts,
            posts::create_form,
            posts::store_post,
            posts::show_post,
            posts::edit_form,
            posts::update_post,
            posts::destroy_post
        ),
        components(schemas(
            posts::PostResponse,
            posts::PostListResponse,
            posts::MessageResponse,
            posts::PostFormBody,
            forms::FormDescriptor,
            forms::FormField,
            forms::FormFieldKind,
            ErrorBody
        ))
    )]
    pub struct ApiDoc;
}
