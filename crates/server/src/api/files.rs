//! Produced file download.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

use super::error::ApiError;
use crate::state::AppState;

/// A bare file name: no separators, no parent references, no NULs.
fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0'])
}

/// Stream a produced file from the output directory.
///
/// Content type is inferred from the extension. Range requests are honored.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    if !is_safe_file_name(&name) {
        debug!("Rejected file name {:?}", name);
        return Err(ApiError::bad_request(
            "invalid file name",
            "file name must not contain path separators or '..'",
        ));
    }

    let path = state.output_dir().join(&name);
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::not_found(format!("File not found: {}", name)));
    }

    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => Ok(response.map(Body::new).into_response()),
        Err(never) => match never {},
    }
}
