use serde::Serialize;

/// How a streamed request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Aborted,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

/// Structured record emitted once per finalized request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionLog {
    pub model: String,
    pub transport: String,
    pub request_seq: u64,
    pub created_at_ms: i64,
    pub latency_ms: i64,
    pub response_time: String,
    pub outcome: Outcome,
    pub chunks: usize,
    pub text: String,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl CompletionLog {
    pub fn error(mut self, kind: &str, message: impl Into<String>) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_log_serializes() {
        let log = CompletionLog {
            model: "gpt-4o".into(),
            transport: "openai".into(),
            request_seq: 3,
            created_at_ms: 1_700_000_000_000,
            latency_ms: 420,
            response_time: "0.42s".into(),
            outcome: Outcome::Failed,
            chunks: 2,
            text: "Hel".into(),
            error_kind: None,
            error_message: None,
        }
        .error("stream", "connection reset");

        let v = serde_json::to_value(&log).unwrap();
        assert_eq!(v["outcome"], json!("failed"));
        assert_eq!(v["error_kind"], json!("stream"));
        assert_eq!(v["chunks"], json!(2));
        assert_eq!(Outcome::Aborted.as_str(), "aborted");
    }
}
