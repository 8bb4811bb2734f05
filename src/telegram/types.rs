use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<&'a str>,
}

/// Body of a failed Bot API call, e.g.
/// `{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities: ..."}`.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error_code: Option<i64>,
    #[serde(default)]
    pub description: String,
}
