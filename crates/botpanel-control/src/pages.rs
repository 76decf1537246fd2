use axum::{
    Json,
    extract::State,
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{auth::session_from_jar, state::AppState};

pub async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found", "path": uri.path() })),
    )
        .into_response()
}

async fn serve_page(state: &AppState, name: &str) -> Response {
    let path = state.settings.public_dir.join(name);
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "page not available");
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "Not found", "path": format!("/{name}") })),
            )
                .into_response()
        }
    }
}

pub async fn index(State(state): State<AppState>, jar: CookieJar) -> Response {
    if session_from_jar(&state.auth, &jar).is_none() {
        return Redirect::to("/login").into_response();
    }
    serve_page(&state, "index.html").await
}

pub async fn login(State(state): State<AppState>, jar: CookieJar) -> Response {
    if session_from_jar(&state.auth, &jar).is_some() {
        return Redirect::to("/").into_response();
    }
    serve_page(&state, "login.html").await
}
