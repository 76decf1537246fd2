use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    auth::session_from_jar,
    error::ApiError,
    request_meta::{RequestMeta, sanitize_request_id},
    state::AppState,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
];

/// Paths reachable without a session.
fn is_public_path(path: &str) -> bool {
    path == "/login"
        || path.starts_with("/css/")
        || path.starts_with("/js/")
        || path.starts_with("/api/auth/")
        || path == "/api/health"
        || path == "/favicon.ico"
}

// Outermost middleware: picks the request id the trace span and error bodies carry.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestMeta::new(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(v) = HeaderValue::from_str(&id) {
        res.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), v);
    }
    res
}

pub async fn security_headers(req: Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    for &(name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    res
}

/// Guard for `/api/*` routes: 401 JSON without a valid session cookie.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    match session_from_jar(&state.auth, &jar) {
        Some(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        None => {
            let meta = req
                .extensions()
                .get::<RequestMeta>()
                .cloned()
                .unwrap_or_else(|| RequestMeta::new(String::new()));
            ApiError::unauthorized(&meta, "Authentication required").into_response()
        }
    }
}

/// Guard for pages and static assets: unauthenticated browsers go to `/login`.
pub async fn require_page_session(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_public_path(&path) {
        return next.run(req).await;
    }
    let jar = CookieJar::from_headers(req.headers());
    if session_from_jar(&state.auth, &jar).is_some() {
        return next.run(req).await;
    }
    if path.starts_with("/api/") {
        let meta = req
            .extensions()
            .get::<RequestMeta>()
            .cloned()
            .unwrap_or_else(|| RequestMeta::new(String::new()));
        return ApiError::unauthorized(&meta, "Authentication required").into_response();
    }
    let mut res = Redirect::to("/login").into_response();
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res
}
