use axum::{extract::State, response::Html};
use serde_json::json;

use crate::AppState;
use crate::auth::{OidcContext, UserClaims};
use crate::error::AppError;

/// Public landing page
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    state.views.render("index", &json!({}))
}

/// Protected page showing the signed-in user's claims
pub async fn dashboard(
    State(state): State<AppState>,
    ctx: OidcContext,
) -> Result<Html<String>, AppError> {
    let user = match ctx.user() {
        Some(user) if !user.is_empty() => user.clone(),
        // Rendering with an empty record keeps the page up but can hide a
        // broken session or token exchange
        _ => {
            tracing::warn!("dashboard rendered without user claims");
            UserClaims::default()
        }
    };

    state.views.render("dashboard", &json!({ "user": user }))
}
