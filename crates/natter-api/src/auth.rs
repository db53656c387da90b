use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};

use natter_db::{Database, DbError};
use natter_gateway::Gateway;
use natter_types::api::RegisterRequest;
use natter_types::models::{User, Username};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub gateway: Gateway,
}

impl AppStateInner {
    /// Shared state over one database; the gateway persists through it too.
    pub fn new(db: Arc<Database>) -> AppState {
        let gateway = Gateway::new(db.clone());
        Arc::new(Self { db, gateway })
    }
}

/// Argon2id PHC string for `password`.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, StatusCode> {
    let Json(req) = payload.map_err(|e| {
        warn!("invalid register request: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    if req.username.is_empty() || req.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let username = req.username.clone();
    let created = tokio::task::spawn_blocking(move || {
        let password = hash_password(&req.password).map_err(|e| {
            error!("password hashing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

        db.create_user(&User {
            username: req.username,
            password,
        })
        .map_err(|e| match e {
            DbError::UserExists(_) => StatusCode::CONFLICT,
            e => {
                error!("cannot create user: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if let Err(status) = created {
        if status == StatusCode::CONFLICT {
            warn!("user {} already exists", username);
        }
        return Err(status);
    }

    info!("created new user {}", username);
    Ok((StatusCode::CREATED, "successfully created new user"))
}

/// Check basic-auth credentials against the stored hash.
pub async fn authenticate(
    db: &Arc<Database>,
    username: &str,
    password: &str,
) -> Result<Username, StatusCode> {
    let db = db.clone();
    let username = Username::from(username);
    let password = password.to_string();

    let result = tokio::task::spawn_blocking(move || {
        let user = db
            .find_user(&username)
            .map_err(|e| {
                error!("user lookup failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or_else(|| {
                warn!("unable to find user {}", username);
                StatusCode::UNAUTHORIZED
            })?;

        let parsed_hash =
            PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| {
                warn!("invalid password for user {}", username);
                StatusCode::UNAUTHORIZED
            })?;

        Ok(user.username)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if let Ok(username) = &result {
        info!("successfully authenticated user {}", username);
    }
    result
}
