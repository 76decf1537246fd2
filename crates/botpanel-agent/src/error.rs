use std::collections::BTreeMap;

const MAX_MESSAGE_BYTES: usize = 8 * 1024;

pub type PanelResult<T> = Result<T, PanelError>;

/// Failure taxonomy shared by every panel operation.
///
/// Component-local failures (one archive entry, one stat) never become a
/// `PanelError`; they are logged and skipped by the component itself.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("{message}")]
    Validation {
        message: String,
        field_errors: BTreeMap<String, String>,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    ExternalProcess {
        message: String,
        exit_code: Option<i32>,
    },
    #[error("{0}")]
    Archive(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PanelError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: truncate_utf8(&message.into(), MAX_MESSAGE_BYTES),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn validation_fields(
        message: impl Into<String>,
        field_errors: BTreeMap<String, String>,
    ) -> Self {
        Self::Validation {
            message: truncate_utf8(&message.into(), MAX_MESSAGE_BYTES),
            field_errors,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn external(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::ExternalProcess {
            message: truncate_utf8(&message.into(), MAX_MESSAGE_BYTES),
            exit_code,
        }
    }

    /// Stable snake_case kind for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            PanelError::Validation { .. } => "validation",
            PanelError::Conflict(_) => "conflict",
            PanelError::NotFound(_) => "not_found",
            PanelError::ExternalProcess { .. } => "external_process",
            PanelError::Archive(_) => "archive",
            PanelError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for PanelError {
    fn from(value: std::io::Error) -> Self {
        PanelError::Internal(value.into())
    }
}

pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let suffix = "…(truncated)";
    let keep = max_bytes.saturating_sub(suffix.len()).max(1);
    let mut end = keep.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    let mut out = s[..end].to_string();
    out.push_str(suffix);
    out
}

/// Joins an error chain into one line, skipping repeated messages.
pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn validation_truncates_long_messages() {
        let err = PanelError::validation("a".repeat(MAX_MESSAGE_BYTES + 100));
        let msg = err.to_string();
        assert!(msg.len() <= MAX_MESSAGE_BYTES);
        assert!(msg.ends_with("…(truncated)"));
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn external_keeps_exit_code() {
        let err = PanelError::external("install failed", Some(3));
        match err {
            PanelError::ExternalProcess { exit_code, .. } => assert_eq!(exit_code, Some(3)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn error_chain_is_flattened() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("disk full"));
        let err = inner.context("write file").unwrap_err();
        assert_eq!(format_error_chain(&err), "write file: disk full");
    }

    #[test]
    fn io_errors_become_internal() {
        let err: PanelError = std::io::Error::other("boom").into();
        assert_eq!(err.code(), "internal");
    }
}
