/// Per-request metadata inserted by the outermost middleware.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub request_id: String,
}

impl RequestMeta {
    pub fn new(request_id: String) -> Self {
        Self { request_id }
    }
}

/// Accepts a client-supplied request id only if it is short and printable.
pub fn sanitize_request_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > 128 {
        return None;
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return None;
    }
    Some(raw.to_string())
}
