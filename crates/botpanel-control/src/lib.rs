pub mod api;
pub mod auth;
pub mod error;
pub mod pages;
pub mod request_meta;
pub mod security;
pub mod settings;
pub mod state;

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    handler::HandlerWithoutStateExt,
    http::Request,
    middleware,
    response::Response,
    routing::{delete, get, post},
};
use botpanel_agent::files::MAX_UPLOAD_BYTES;
use tower_http::{catch_panic::CatchPanicLayer, services::ServeDir, trace::TraceLayer};
use tracing::Span;

use crate::{request_meta::RequestMeta, state::AppState};

/// JSON bodies (file edits included) are capped at 10 MiB.
const JSON_BODY_LIMIT: usize = 10 * 1024 * 1024;
/// Room for multipart framing around the largest allowed upload.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;

pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/status", get(api::status))
        .route("/api/files", get(api::list_files))
        .route("/api/files/create", post(api::create_file))
        .route(
            "/api/files/:filename/content",
            get(api::read_file).put(api::update_file),
        )
        .route("/api/files/:filename", delete(api::delete_file))
        .route(
            "/api/upload",
            post(api::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/extract-zip/:filename", post(api::extract_zip))
        .route("/api/token", post(api::save_token))
        .route("/api/token/status", get(api::token_status))
        .route("/api/start", post(api::start))
        .route("/api/stop", post(api::stop))
        .route("/api/logs", get(api::logs).delete(api::clear_logs))
        .route("/api/system/node-versions", get(api::node_versions))
        .route("/api/system/switch-node", post(api::switch_node))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            security::require_session,
        ));

    let public = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/status", get(auth::status))
        .route("/api/health", get(api::health))
        .route("/", get(pages::index))
        .route("/login", get(pages::login));

    let assets = Router::new()
        .fallback_service(
            ServeDir::new(&state.settings.public_dir)
                .not_found_service(pages::not_found.into_service()),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::require_page_session,
        ));

    // Runs inside `security::request_id`, so the span can carry the id.
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            let request_id = req
                .extensions()
                .get::<RequestMeta>()
                .map(|m| m.request_id.as_str())
                .unwrap_or("");
            tracing::info_span!(
                "http.request",
                method = %req.method(),
                path = %req.uri().path(),
                request_id = %request_id,
                status_code = tracing::field::Empty,
                latency_ms = tracing::field::Empty
            )
        })
        .on_request(|_req: &Request<Body>, _span: &Span| {})
        .on_response(|res: &Response, latency: Duration, span: &Span| {
            let status = res.status().as_u16();
            let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
            span.record("status_code", status);
            span.record("latency_ms", latency_ms);
            tracing::info!(parent: span, status, latency_ms, "http request");
        });

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(assets)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(middleware::from_fn(security::security_headers))
        .layer(trace_layer)
        .layer(middleware::from_fn(security::request_id))
        .with_state(state)
}
