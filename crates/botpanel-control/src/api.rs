use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use botpanel_agent::{
    StatusSnapshot,
    archive::ExtractSummary,
    files::{FileContent, FileRecord, UploadedFile},
    process_manager::{NodeVersions, StartOutcome, TokenStatus},
};
use botpanel_process::{BotState, LogEntry};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{SessionUser, session_from_jar},
    error::{ApiError, ApiResult, OrApi},
    request_meta::RequestMeta,
    state::AppState,
};

const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

fn message(text: impl Into<String>) -> Json<Message> {
    Json(Message {
        message: text.into(),
    })
}

pub async fn status(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Json<StatusSnapshot> {
    Json(botpanel_agent::snapshot(&state.manager, &state.files, Some(&user.username)).await)
}

pub async fn list_files(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Json<Vec<FileRecord>>> {
    let files = state.files.list(&user.username).await.or_api(&meta)?;
    Ok(Json(files))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub file: UploadedFile,
}

fn upload_error(meta: &RequestMeta, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::bad_request(meta, "File too large. Maximum size is 100MB");
    }
    ApiError::bad_request(meta, format!("Upload error: {}", err.body_text()))
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(&meta, e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("upload").to_string();
        let data = field.bytes().await.map_err(|e| upload_error(&meta, e))?;
        let file = state
            .files
            .store_upload(&original, &data, &user.username)
            .await
            .or_api(&meta)?;
        return Ok(Json(UploadResponse {
            message: "File uploaded successfully",
            file,
        }));
    }
    Err(ApiError::bad_request(&meta, "No file uploaded"))
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(flatten)]
    pub summary: ExtractSummary,
}

pub async fn extract_zip(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    Path(filename): Path<String>,
) -> ApiResult<Json<ExtractResponse>> {
    let summary = state
        .files
        .extract_zip(&filename, &user.username)
        .await
        .or_api(&meta)?;
    Ok(Json(ExtractResponse {
        success: true,
        message: "ZIP extracted successfully",
        summary,
    }))
}

#[derive(Debug, Serialize)]
pub struct ReadFileResponse {
    pub success: bool,
    #[serde(flatten)]
    pub file: FileContent,
}

pub async fn read_file(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    Path(filename): Path<String>,
) -> ApiResult<Json<ReadFileResponse>> {
    let file = state
        .files
        .read(&filename, &user.username)
        .await
        .or_api(&meta)?;
    Ok(Json(ReadFileResponse {
        success: true,
        file,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileMutation {
    pub success: bool,
    pub message: String,
    pub filename: String,
    #[serde(rename = "isFolder", skip_serializing_if = "Option::is_none")]
    pub is_folder: Option<bool>,
}

pub async fn update_file(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    Path(filename): Path<String>,
    Json(input): Json<UpdateFileRequest>,
) -> ApiResult<Json<FileMutation>> {
    let Some(content) = input.content else {
        return Err(ApiError::bad_request(&meta, "Content is required"));
    };
    state
        .files
        .write(&filename, &content, &user.username)
        .await
        .or_api(&meta)?;
    Ok(Json(FileMutation {
        success: true,
        message: "File updated successfully".to_string(),
        filename,
        is_folder: None,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_folder: bool,
}

pub async fn create_file(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    Json(input): Json<CreateFileRequest>,
) -> ApiResult<Json<FileMutation>> {
    let Some(filename) = input.filename.filter(|f| !f.is_empty()) else {
        return Err(ApiError::bad_request(&meta, "Filename is required"));
    };
    state
        .files
        .create(
            &filename,
            input.content.as_deref(),
            input.is_folder,
            &user.username,
        )
        .await
        .or_api(&meta)?;
    let label = if input.is_folder { "Folder" } else { "File" };
    Ok(Json(FileMutation {
        success: true,
        message: format!("{label} created successfully"),
        filename,
        is_folder: Some(input.is_folder),
    }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    Path(filename): Path<String>,
) -> ApiResult<Json<FileMutation>> {
    state
        .files
        .delete(&filename, &user.username)
        .await
        .or_api(&meta)?;
    Ok(Json(FileMutation {
        success: true,
        message: "File deleted successfully".to_string(),
        filename,
        is_folder: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSaved {
    pub message: &'static str,
    pub token_set: bool,
}

pub async fn save_token(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    Json(input): Json<TokenRequest>,
) -> ApiResult<Json<TokenSaved>> {
    let token = input.token.unwrap_or_default();
    state
        .manager
        .save_token(&token, &user.username)
        .await
        .or_api(&meta)?;
    Ok(Json(TokenSaved {
        message: "Token saved successfully",
        token_set: true,
    }))
}

pub async fn token_status(State(state): State<AppState>) -> Json<TokenStatus> {
    Json(state.manager.token_status().await)
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub outcome: StartOutcome,
}

pub async fn start(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Json<StartResponse>> {
    let outcome = state.manager.start(&user.username).await.or_api(&meta)?;
    Ok(Json(StartResponse {
        message: "Bot is starting...",
        outcome,
    }))
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub message: &'static str,
    pub uptime: u64,
    pub forced: bool,
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Json<StopResponse>> {
    let outcome = state.manager.stop(&user.username).await.or_api(&meta)?;
    Ok(Json(StopResponse {
        message: "Bot stopped successfully",
        uptime: outcome.uptime,
        forced: outcome.forced,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub async fn logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    let limit = q.limit.filter(|n| *n > 0).unwrap_or(DEFAULT_LOG_LIMIT);
    Json(state.sink.recent(limit))
}

pub async fn clear_logs(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Json<Message> {
    state.sink.clear(&user.username);
    message("Logs cleared")
}

pub async fn node_versions(State(state): State<AppState>) -> Json<NodeVersions> {
    Json(state.manager.node_versions().await)
}

#[derive(Debug, Deserialize)]
pub struct SwitchNodeRequest {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SwitchNodeResponse {
    pub success: bool,
    pub message: String,
    pub version: String,
}

pub async fn switch_node(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Extension(meta): Extension<RequestMeta>,
    Json(input): Json<SwitchNodeRequest>,
) -> ApiResult<Json<SwitchNodeResponse>> {
    let requested = input.version.unwrap_or_default();
    let version = state
        .manager
        .switch_node_version(&requested, &user.username)
        .await
        .or_api(&meta)?;
    Ok(Json(SwitchNodeResponse {
        success: true,
        message: format!("Node.js switched to version {version}"),
        version,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub timestamp: String,
    /// Panel uptime in seconds.
    pub uptime: f64,
    pub bot_status: BotState,
    pub bot_uptime: u64,
    pub authenticated: bool,
}

pub async fn health(State(state): State<AppState>, jar: CookieJar) -> Json<Health> {
    let snap = state.manager.snapshot().await;
    Json(Health {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        bot_status: snap.state,
        bot_uptime: snap.uptime_ms,
        authenticated: session_from_jar(&state.auth, &jar).is_some(),
    })
}
