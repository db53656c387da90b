use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};

use natter_types::models::Username;

use crate::auth::{AppState, authenticate};

/// The caller's identity, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub Username);

/// Validate `Authorization: Basic` credentials and attach the caller.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let credentials = req
        .headers()
        .typed_get::<Authorization<Basic>>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let username = authenticate(&state.db, credentials.username(), credentials.password()).await?;

    req.extensions_mut().insert(AuthUser(username));
    Ok(next.run(req).await)
}
