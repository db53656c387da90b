use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::warn;

use crate::auth::AppState;
use crate::middleware::AuthUser;

/// Upgrade an authenticated request and hand the socket to the gateway,
/// then replay whatever arrived while the user was offline.
pub async fn connect(
    State(state): State<AppState>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    let failed_for = username.clone();

    ws.on_failed_upgrade(move |e| warn!("websocket upgrade for {} failed: {}", failed_for, e))
        .on_upgrade(move |socket| async move {
            let session = gateway.connect(username, socket).await;
            gateway.replay_unread(&session).await;
        })
}
