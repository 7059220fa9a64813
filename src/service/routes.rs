use crate::image_utils::image_io::decode_image_as_rgb8;
use crate::pipeline::model_provider::Recognizer;
use crate::pipeline::nearest_to_center::select_nearest;
use crate::service::api_error::ApiError;
use crate::service::display_names::DisplayNames;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, Method, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use image::RgbImage;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "beverage-vision";
pub const SHELF_SEARCH_PATH: &str = "/api/v1/product/search/ai";
pub const LOCATION_SEARCH_PATH: &str = "/api/v1/product/search/location/ai";

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub recognizer: Arc<dyn Recognizer>,
    pub display_names: Arc<DisplayNames>,
}

#[derive(Debug, Serialize)]
pub struct ShelfItem {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Serialize)]
pub struct ShelfSearchResponse {
    pub items: Vec<ShelfItem>,
}

#[derive(Debug, Serialize)]
pub struct LocationResponse {
    pub multiple: bool,
    pub items: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route(SHELF_SEARCH_PATH, post(shelf_search))
        .route(LOCATION_SEARCH_PATH, post(location_search))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Allows the listed origins with credentials. With no origins, any origin is
/// allowed without credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid cors origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return layer.allow_origin(Any).allow_headers(Any);
    }
    info!(origins = allowed.len(), "cors restricted to configured origins");
    layer
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_headers(AllowHeaders::mirror_request())
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "shelf_search": SHELF_SEARCH_PATH,
            "location_search": LOCATION_SEARCH_PATH,
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
    }))
}

/// Collects the raw bytes of every upload named `field_name`, checking that
/// each one claims to be an image.
async fn read_image_parts(
    multipart: &mut Multipart,
    field_name: &str,
    path: &str,
) -> Result<Vec<Bytes>, ApiError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(path, err.body_text()))?
    {
        if field.name() != Some(field_name) {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(ApiError::bad_request(
                path,
                format!("File must be an image. Got: {content_type}"),
            ));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(path, err.body_text()))?;
        uploads.push(bytes);
    }
    if uploads.is_empty() {
        return Err(ApiError::bad_request(path, format!("{field_name} is required")));
    }
    Ok(uploads)
}

fn decode_upload(bytes: &Bytes, path: &str) -> Result<RgbImage, ApiError> {
    decode_image_as_rgb8(bytes)
        .map_err(|err| ApiError::bad_request(path, format!("Could not decode image: {err}")))
}

/// Runs decoding and inference off the async executor.
async fn run_blocking<T, F>(path: &str, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(path, format!("Internal server error: {err}")))?
}

async fn shelf_search(
    State(state): State<AppState>,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<Json<ShelfSearchResponse>, ApiError> {
    let path = uri.path().to_string();
    let uploads = read_image_parts(&mut multipart, "shelf_images", &path).await?;
    let work_path = path.clone();
    let items = run_blocking(&path, move || {
        let mut items = Vec::new();
        for upload in &uploads {
            let image = decode_upload(upload, &work_path)?;
            let (detections, _) = state.recognizer.infer(&image).map_err(|err| {
                ApiError::internal(&work_path, format!("Internal server error: {err}"))
            })?;
            items.extend(detections.iter().map(|det| ShelfItem {
                name: state.display_names.resolve(&det.label).to_string(),
                x: det.x,
                y: det.y,
                w: det.w,
                h: det.h,
            }));
        }
        Ok(items)
    })
    .await?;
    Ok(Json(ShelfSearchResponse { items }))
}

async fn location_search(
    State(state): State<AppState>,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<Json<LocationResponse>, ApiError> {
    let path = uri.path().to_string();
    let mut uploads = read_image_parts(&mut multipart, "current_frame", &path).await?;
    let upload = uploads.swap_remove(0);
    let work_path = path.clone();
    let response = run_blocking(&path, move || {
        let image = decode_upload(&upload, &work_path)?;
        let (detections, frame) = state.recognizer.infer(&image).map_err(|err| {
            ApiError::internal(&work_path, format!("Internal server error: {err}"))
        })?;
        let (nearest, multiple) = select_nearest(&detections, frame);
        Ok(match nearest {
            Some(det) => LocationResponse {
                multiple,
                items: vec![state.display_names.resolve(&det.label).to_string()],
            },
            None => LocationResponse {
                multiple: false,
                items: Vec::new(),
            },
        })
    })
    .await?;
    Ok(Json(response))
}
