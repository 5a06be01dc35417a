use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::StoreError;

pub async fn put_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), AppError> {
    let key = format!("/s/{path}");
    state
        .store
        .set(&key, body.to_vec())
        .map_err(store_error_to_app)?;
    Ok((StatusCode::CREATED, "CREATED\n"))
}

pub async fn get_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Vec<u8>, AppError> {
    let key = format!("/s/{path}");
    state.store.get(&key).map_err(store_error_to_app)
}

fn store_error_to_app(err: StoreError) -> AppError {
    match err {
        StoreError::Empty => AppError::Validation("body is empty".into()),
        StoreError::TooLarge => AppError::Validation("body too large".into()),
        StoreError::NotFound => AppError::NotFound("no such path".into()),
    }
}
