//! HTTP boundary: routes, multipart extraction and wire payloads.

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode},
    response::{Html, IntoResponse},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Error;
use crate::fingerprint::{Algorithm, Fingerprints};
use crate::service::{ImageService, LinkOutcome, DEFAULT_THRESHOLD};

// headroom above the validator ceiling so an oversized file still reaches
// validation and gets its 413, rather than a truncated body read
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    service: Arc<ImageService>,
}

pub async fn serve(cfg: &Config, service: Arc<ImageService>) -> anyhow::Result<()> {
    let app = router(service, &cfg.cors_origins, cfg.limits.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    tracing::info!("imglink API listening on http://{}", cfg.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn router(service: Arc<ImageService>, cors_origins: &[String], max_upload: usize) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/api/link-image", post(link_image))
        .route("/api/scan-image", post(scan_image))
        .route("/api/stored-images", get(stored_images))
        .route("/api/stored-images/{id}", delete(delete_stored_image))
        .layer(DefaultBodyLimit::max(max_upload + MULTIPART_OVERHEAD))
        .layer(cors_layer(cors_origins))
        .with_state(AppState { service })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}

async fn landing() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>imglink</title>
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body>
    <h1>imglink</h1>
    <p>Link images to URLs, then scan an image to navigate to its linked URL.</p>
</body>
</html>
"#,
    )
}

#[derive(Serialize)]
struct LinkResponse {
    status: &'static str,
    message: String,
    image_id: Uuid,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hashes: Option<Fingerprints>,
}

async fn link_image(
    State(st): State<AppState>,
    mut parts: Multipart,
) -> Result<Json<LinkResponse>, ApiErr> {
    let mut url: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = parts.next_field().await.map_err(ApiErr::multipart)? {
        match field.name() {
            Some("url") => url = Some(field.text().await.map_err(ApiErr::multipart)?),
            Some("file") => {
                let filename = field.file_name().unwrap_or("unknown").to_string();
                let bytes = field.bytes().await.map_err(ApiErr::multipart)?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let url = url.ok_or(Error::MissingField("url"))?;
    let (filename, bytes) = file.ok_or(Error::MissingField("file"))?;

    match st.service.link(&bytes, &filename, &url).await? {
        LinkOutcome::Created { record } => Ok(Json(LinkResponse {
            status: "created",
            message: format!("Successfully linked {} to {}", record.filename, record.url),
            image_id: record.id,
            url: record.url.clone(),
            hashes: Some(record.fingerprints()),
        })),
        LinkOutcome::Updated { id, url } => Ok(Json(LinkResponse {
            status: "updated",
            message: format!("Updated URL for existing image: {filename}"),
            image_id: id,
            url,
            hashes: None,
        })),
    }
}

#[derive(Serialize)]
struct MatchInfo {
    id: Uuid,
    filename: String,
    url: String,
    distance: u32,
    similarity_percentage: u32,
    algorithm_used: Algorithm,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ScanResponse {
    status: &'static str,
    message: String,
    #[serde(rename = "match")]
    best_match: Option<MatchInfo>,
    redirect_url: Option<String>,
    total_stored_images: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold_used: Option<u32>,
}

async fn scan_image(
    State(st): State<AppState>,
    mut parts: Multipart,
) -> Result<Json<ScanResponse>, ApiErr> {
    let mut file: Option<Vec<u8>> = None;
    let mut threshold = DEFAULT_THRESHOLD;

    while let Some(field) = parts.next_field().await.map_err(ApiErr::multipart)? {
        match field.name() {
            Some("file") => file = Some(field.bytes().await.map_err(ApiErr::multipart)?.to_vec()),
            Some("threshold") => {
                let text = field.text().await.map_err(ApiErr::multipart)?;
                threshold = text.trim().parse().map_err(|_| {
                    ApiErr::unprocessable("threshold must be a non-negative integer")
                })?;
            }
            _ => {}
        }
    }

    let bytes = file.ok_or(Error::MissingField("file"))?;
    let report = st.service.scan(&bytes, threshold).await?;

    match report.best {
        Some(m) => Ok(Json(ScanResponse {
            status: "match_found",
            message: format!("Found matching image: {}", m.filename),
            redirect_url: Some(m.url.clone()),
            best_match: Some(MatchInfo {
                id: m.id,
                filename: m.filename,
                url: m.url,
                distance: m.distance,
                similarity_percentage: m.similarity,
                algorithm_used: m.algorithm,
                created_at: m.created_at,
            }),
            total_stored_images: report.total_candidates,
            threshold_used: None,
        })),
        None => Ok(Json(ScanResponse {
            status: "no_match",
            message: "No matching images found".into(),
            best_match: None,
            redirect_url: None,
            total_stored_images: report.total_candidates,
            threshold_used: Some(report.threshold),
        })),
    }
}

#[derive(Serialize)]
struct StoredImage {
    id: Uuid,
    filename: String,
    url: String,
    content_type: String,
    file_size: i64,
    image_size: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct StoredImagesResponse {
    total_images: usize,
    images: Vec<StoredImage>,
}

async fn stored_images(State(st): State<AppState>) -> Result<Json<StoredImagesResponse>, ApiErr> {
    let records = st.service.list().await?;
    let images: Vec<StoredImage> = records
        .into_iter()
        .map(|r| StoredImage {
            id: r.id,
            filename: r.filename,
            url: r.url,
            content_type: r.content_type,
            file_size: r.file_size,
            image_size: format!("{}x{}", r.width, r.height),
            created_at: r.created_at,
        })
        .collect();

    Ok(Json(StoredImagesResponse {
        total_images: images.len(),
        images,
    }))
}

#[derive(Serialize)]
struct DeleteResponse {
    message: String,
}

async fn delete_stored_image(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiErr> {
    // an id that is not even a UUID is just as unknown as an absent one
    let id = Uuid::parse_str(&id).map_err(|_| ApiErr::from(Error::NotFound))?;
    st.service.delete(id).await?;
    Ok(Json(DeleteResponse {
        message: "Image link deleted successfully".into(),
    }))
}

#[derive(Debug)]
struct ApiErr {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiErr {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", message)
    }

    // keeps the transport status of the underlying failure, so a body
    // blowing past the request limit still surfaces as 413
    fn multipart(e: MultipartError) -> Self {
        Self::new(
            e.status(),
            "bad_multipart",
            format!("malformed multipart body: {e}"),
        )
    }
}

impl From<Error> for ApiErr {
    fn from(e: Error) -> Self {
        match &e {
            Error::TooLarge { .. } => Self::new(StatusCode::PAYLOAD_TOO_LARGE, "too_large", e.to_string()),
            Error::UnsupportedType(_) | Error::InvalidImage(_) => {
                Self::new(StatusCode::BAD_REQUEST, "bad_image", e.to_string())
            }
            Error::MissingField(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "missing_field", e.to_string())
            }
            Error::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", "Image not found"),
            Error::Store(_) | Error::Internal(_) => {
                tracing::error!(error = %e, "internal error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code,
            }),
        )
            .into_response()
    }
}
