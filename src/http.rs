use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};

use crate::{
    db::{DormStore, StoreError},
    dorm::{DormRecord, NewDorm},
};

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { .. } => ApiError::new(ErrorCode::Conflict, e.to_string()),
            e => {
                log::error!("Store error while serving request: {e}");
                ApiError::new(ErrorCode::Internal, e.to_string())
            }
        }
    }
}

pub fn build_router(store: Arc<dyn DormStore>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/dorms", get(list_dorms).post(create_dorm))
        .route("/dorms/:dorm_id", get(get_dorm))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_dorms(
    State(store): State<Arc<dyn DormStore>>,
) -> Result<Json<Vec<DormRecord>>, ApiError> {
    Ok(Json(store.list()?))
}

async fn get_dorm(
    State(store): State<Arc<dyn DormStore>>,
    Path(dorm_id): Path<String>,
) -> Result<Json<DormRecord>, ApiError> {
    store.find(&dorm_id)?.map(Json).ok_or_else(|| {
        ApiError::new(ErrorCode::NotFound, format!("dorm {dorm_id} not found"))
    })
}

async fn create_dorm(
    State(store): State<Arc<dyn DormStore>>,
    Json(new): Json<NewDorm>,
) -> Result<(StatusCode, Json<DormRecord>), ApiError> {
    let dorm = DormRecord::from(new);
    store.insert(&dorm)?;
    log::info!("Created dorm {}", dorm.dorm_id);
    Ok((StatusCode::CREATED, Json(dorm)))
}
