use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use botpanel_agent::{PanelError, format_error_chain};
use serde::Serialize;

use crate::{request_meta::RequestMeta, settings::is_development};

const GENERIC_INTERNAL: &str = "Something went wrong";

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON error body shared by every endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    #[serde(rename = "error")]
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

impl ApiError {
    pub fn new(
        meta: &RequestMeta,
        status: StatusCode,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.to_string(),
            field_errors: BTreeMap::new(),
            exit_code: None,
            request_id: meta.request_id.clone(),
        }
    }

    pub fn bad_request(meta: &RequestMeta, message: impl Into<String>) -> Self {
        Self::new(meta, StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn unauthorized(meta: &RequestMeta, message: impl Into<String>) -> Self {
        Self::new(meta, StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn from_panel(meta: &RequestMeta, err: PanelError) -> Self {
        let code = err.code();
        match err {
            PanelError::Validation {
                message,
                field_errors,
            } => {
                let mut e = Self::new(meta, StatusCode::BAD_REQUEST, code, message);
                e.field_errors = field_errors;
                e
            }
            PanelError::Conflict(message) => {
                Self::new(meta, StatusCode::BAD_REQUEST, code, message)
            }
            PanelError::NotFound(message) => Self::new(meta, StatusCode::NOT_FOUND, code, message),
            PanelError::ExternalProcess { message, exit_code } => {
                let mut e = Self::new(meta, StatusCode::INTERNAL_SERVER_ERROR, code, message);
                e.exit_code = exit_code;
                e
            }
            PanelError::Archive(message) => {
                Self::new(meta, StatusCode::INTERNAL_SERVER_ERROR, code, message)
            }
            PanelError::Internal(err) => {
                let detail = format_error_chain(&err);
                tracing::error!(request_id = %meta.request_id, error = %detail, "internal error");
                let message = if is_development() {
                    detail
                } else {
                    GENERIC_INTERNAL.to_string()
                };
                Self::new(meta, StatusCode::INTERNAL_SERVER_ERROR, code, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// `result.or_api(&meta)?` inside handlers.
pub trait OrApi<T> {
    fn or_api(self, meta: &RequestMeta) -> ApiResult<T>;
}

impl<T, E> OrApi<T> for Result<T, E>
where
    E: Into<PanelError>,
{
    fn or_api(self, meta: &RequestMeta) -> ApiResult<T> {
        self.map_err(|e| ApiError::from_panel(meta, e.into()))
    }
}

/// Body for panics caught by the outer layer.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");

    let message = if is_development() {
        detail
    } else {
        GENERIC_INTERNAL.to_string()
    };
    let body = ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message,
        code: "internal".to_string(),
        field_errors: BTreeMap::new(),
        exit_code: None,
        request_id: String::new(),
    };
    body.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RequestMeta {
        RequestMeta::new("req-1".to_string())
    }

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let m = meta();
        let cases = [
            (PanelError::validation("bad"), StatusCode::BAD_REQUEST),
            (PanelError::conflict("busy"), StatusCode::BAD_REQUEST),
            (PanelError::not_found("gone"), StatusCode::NOT_FOUND),
            (
                PanelError::external("install failed", Some(3)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PanelError::Archive("corrupt".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from_panel(&m, err).status, status);
        }
    }

    #[test]
    fn body_carries_exit_code_and_request_id() {
        let e = ApiError::from_panel(&meta(), PanelError::external("npm failed", Some(3)));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["error"], "npm failed");
        assert_eq!(v["code"], "external_process");
        assert_eq!(v["exitCode"], 3);
        assert_eq!(v["requestId"], "req-1");
        assert!(v.get("fieldErrors").is_none());
    }

    #[test]
    fn field_errors_are_serialized_when_present() {
        let mut fields = BTreeMap::new();
        fields.insert("token".to_string(), "missing".to_string());
        let e = ApiError::from_panel(&meta(), PanelError::validation_fields("nope", fields));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["fieldErrors"]["token"], "missing");
    }

    #[test]
    fn internal_details_stay_hidden_outside_development() {
        if is_development() {
            return;
        }
        let e = ApiError::from_panel(
            &meta(),
            PanelError::Internal(anyhow::anyhow!("disk on fire")),
        );
        assert_eq!(e.message, GENERIC_INTERNAL);
    }
}
