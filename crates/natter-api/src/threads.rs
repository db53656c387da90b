use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};

use natter_types::api::ListQuery;
use natter_types::models::Username;

use crate::auth::AppState;
use crate::middleware::AuthUser;

fn resolve(query: &ListQuery) -> Result<(u32, u32), StatusCode> {
    query.resolve().map_err(|e| {
        warn!("invalid list options: {}", e);
        StatusCode::BAD_REQUEST
    })
}

fn join_error(e: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn list_threads(
    State(state): State<AppState>,
    Extension(AuthUser(recipient)): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let (limit, offset) = resolve(&query)?;

    let db = state.db.clone();
    let who = recipient.clone();
    let threads = tokio::task::spawn_blocking(move || db.list_threads(&who, limit, offset))
        .await
        .map_err(join_error)?
        .map_err(|e| {
            error!("cannot list threads: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!(
        "listed threads for user {}, found {} threads",
        recipient,
        threads.len()
    );
    Ok(Json(threads))
}

pub async fn get_thread_messages(
    State(state): State<AppState>,
    Extension(AuthUser(recipient)): Extension<AuthUser>,
    Path(sender): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let (limit, offset) = resolve(&query)?;
    let sender = Username::from(sender);

    let db = state.db.clone();
    let (r, s) = (recipient.clone(), sender.clone());
    let messages =
        tokio::task::spawn_blocking(move || db.list_thread_messages(&r, &s, limit, offset))
            .await
            .map_err(join_error)?
            .map_err(|e| {
                error!("cannot list thread messages: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

    info!(
        "listed thread messages sent by {} to {}, found {} messages",
        sender,
        recipient,
        messages.len()
    );
    Ok(Json(messages))
}

pub async fn read_thread(
    State(state): State<AppState>,
    Extension(AuthUser(recipient)): Extension<AuthUser>,
    Path(sender): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let sender = Username::from(sender);

    let db = state.db.clone();
    let (r, s) = (recipient.clone(), sender.clone());
    let updated = tokio::task::spawn_blocking(move || db.mark_thread_read(&r, &s))
        .await
        .map_err(join_error)?
        .map_err(|e| {
            error!("cannot mark thread as read: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!(
        "marked thread sent by {} to {} as read ({} messages)",
        sender, recipient, updated
    );
    Ok("successfully marked thread as read")
}
