//! Brand image views
//!
//! Serves the integration's icons and logos without authentication, as a
//! fallback for when the public brands CDN is unreachable.

use std::io::ErrorKind;
use std::path::PathBuf;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{debug, error};

use crate::constants::DOMAIN;

/// Only these files are ever served
pub const BRAND_FILES: [&str; 8] = [
    "icon.png",
    "logo.png",
    "icon@2x.png",
    "logo@2x.png",
    "dark_icon.png",
    "dark_logo.png",
    "dark_icon@2x.png",
    "dark_logo@2x.png",
];

#[derive(Clone)]
pub struct BrandsState {
    pub static_dir: PathBuf,
}

/// `/api/brands/autobayt/:filename` and `/api/autobayt/:filename`
pub fn brands_router(static_dir: impl Into<PathBuf>) -> Router {
    let state = BrandsState {
        static_dir: static_dir.into(),
    };

    Router::new()
        .route(&format!("/api/brands/{}/:filename", DOMAIN), get(serve_brand))
        .route(&format!("/api/{}/:filename", DOMAIN), get(serve_static))
        .with_state(state)
}

async fn serve_brand(
    State(state): State<BrandsState>,
    Path(filename): Path<String>,
) -> Response {
    let candidates = [
        state.static_dir.join("brands").join(DOMAIN),
        state.static_dir.clone(),
    ];
    serve_file(&candidates, &filename).await
}

async fn serve_static(
    State(state): State<BrandsState>,
    Path(filename): Path<String>,
) -> Response {
    serve_file(&[state.static_dir.clone()], &filename).await
}

async fn serve_file(dirs: &[PathBuf], filename: &str) -> Response {
    if !BRAND_FILES.contains(&filename) {
        debug!("Brand file not allowed: {}", filename);
        return StatusCode::NOT_FOUND.into_response();
    }

    for dir in dirs {
        let path = dir.join(filename);
        match tokio::fs::read(&path).await {
            Ok(content) => {
                debug!("Serving brand file {} ({} bytes)", path.display(), content.len());
                return (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, "image/png"),
                        (header::CACHE_CONTROL, "public, max-age=3600"),
                        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                    ],
                    content,
                )
                    .into_response();
            }
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                error!("Error serving brand file {}: {}", filename, err);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    debug!("Brand file not found: {}", filename);
    StatusCode::NOT_FOUND.into_response()
}
