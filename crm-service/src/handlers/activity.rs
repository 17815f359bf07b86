use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::LimitQuery;
use crate::middleware::CurrentUser;
use crate::models::Activity;
use crate::startup::AppState;

const DEFAULT_ACTIVITY_LIMIT: i64 = 20;

pub async fn list_activity(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Activity>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    Ok(Json(state.store.list_activity(limit).await?))
}
