//! HTTP surface of markshare: accounts, documents and votes.

pub mod auth;
pub mod error;
pub mod extract;
pub mod mail;
pub mod middleware;
pub mod password;
pub mod posts;
pub mod votes;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use markshare_db::Database;

use crate::error::ApiError;
use crate::mail::MailManager;

/// Largest accepted request body: a full-size document whose every byte is
/// escaped as `\u00XX`, plus room for the other fields.
pub const BODY_LIMIT: usize = 6 * posts::MAX_CONTENT_SIZE + 64 * 1024;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    /// Lifetime of issued session tokens.
    pub session_days: i64,
    pub mail: MailManager,
}

/// Builds the `/api` routes plus `/health`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route("/posts/public", get(posts::list_public_posts))
        .route(
            "/posts/{id}",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/posts/{id}/vote", post(votes::cast_vote))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Runs a database call off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    let result = tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))?;
    Ok(result?)
}
