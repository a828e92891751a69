use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, saturating to 0 on a clock before 1970.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// One turn of the conversation, either submitted or being assembled from a stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ChatMessage {
    pub content: String,
    pub role: String,
    /// Zero while the message is still streaming.
    pub timestamp: i64,
    pub meta: MessageMeta,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    pub loading: bool,
    pub response_time: String,
    pub chunks: Vec<ChatToken>,
}

/// One decoded delta as it was received.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ChatToken {
    pub content: String,
    pub role: String,
    pub timestamp: i64,
}

/// Fragment carried by a single stream frame (`choices[0].delta`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct DeltaRecord {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl DeltaRecord {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            role: None,
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self {
            content: None,
            role: Some(role.into()),
        }
    }
}

impl ChatMessage {
    /// Empty, loading entry appended right before a request starts.
    pub fn placeholder() -> Self {
        Self {
            meta: MessageMeta {
                loading: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn is_loading(&self) -> bool {
        self.meta.loading
    }
}

/// Caller-supplied entry for `submit` / `set_messages`. Missing fields are filled in by
/// [`crate::normalizer::normalize_entry`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct MessageInput {
    pub content: String,
    pub role: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub meta: Option<MessageMeta>,
}

impl MessageInput {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: role.into(),
            timestamp: None,
            meta: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

impl From<ChatMessage> for MessageInput {
    fn from(m: ChatMessage) -> Self {
        Self {
            content: m.content,
            role: m.role,
            timestamp: Some(m.timestamp),
            meta: Some(m.meta),
        }
    }
}

/// `{content, role}` pair as sent upstream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub content: String,
    pub role: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(m: &ChatMessage) -> Self {
        Self {
            content: m.content.clone(),
            role: m.role.clone(),
        }
    }
}

/// Completion parameters passed through verbatim. Unknown keys land in `extra`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CompletionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Keys owned by the request body itself; `extra` must not shadow them.
pub const RESERVED_PARAM_KEYS: [&str; 3] = ["model", "messages", "stream"];

/// Outbound streaming chat-completions body.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    #[serde(flatten)]
    pub params: CompletionParams,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn streaming(model: &str, params: &CompletionParams, history: &[ChatMessage]) -> Self {
        Self {
            model: model.to_string(),
            params: params.clone(),
            messages: history.iter().map(WireMessage::from).collect(),
            stream: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_meta_uses_camel_case() {
        let mut msg = ChatMessage::placeholder();
        msg.meta.response_time = "1.20s".into();
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["meta"]["loading"], json!(true));
        assert_eq!(v["meta"]["responseTime"], json!("1.20s"));
        assert_eq!(v["timestamp"], json!(0));
    }

    #[test]
    fn placeholder_is_empty_and_loading() {
        let p = ChatMessage::placeholder();
        assert_eq!(p.content, "");
        assert_eq!(p.role, "");
        assert_eq!(p.timestamp, 0);
        assert!(p.is_loading());
        assert!(p.meta.chunks.is_empty());
    }

    #[test]
    fn request_body_flattens_params_and_sets_stream() {
        let mut params = CompletionParams {
            temperature: Some(0.5),
            max_tokens: Some(64),
            ..Default::default()
        };
        params.extra.insert("logit_bias".into(), json!({"50256": -100}));

        let history = vec![ChatMessage {
            content: "hi".into(),
            role: "user".into(),
            timestamp: 1,
            meta: MessageMeta::default(),
        }];
        let req = CompletionRequest::streaming("gpt-4o-mini", &params, &history);
        let v = serde_json::to_value(&req).unwrap();

        assert_eq!(v["model"], json!("gpt-4o-mini"));
        assert_eq!(v["temperature"], json!(0.5));
        assert_eq!(v["max_tokens"], json!(64));
        assert_eq!(v["logit_bias"]["50256"], json!(-100));
        assert_eq!(v["stream"], json!(true));
        assert_eq!(v["messages"], json!([{"content": "hi", "role": "user"}]));
        assert!(v.get("top_p").is_none());
        assert!(v.get("meta").is_none());
    }

    #[test]
    fn delta_record_tolerates_nulls_and_missing_fields() {
        let d: DeltaRecord = serde_json::from_str(r#"{"content":null}"#).unwrap();
        assert_eq!(d, DeltaRecord::default());
        let d: DeltaRecord = serde_json::from_str(r#"{"role":"assistant"}"#).unwrap();
        assert_eq!(d, DeltaRecord::role("assistant"));
    }
}
