/// Span/log attribute keys for a streamed request.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_TRANSPORT: &str = "llm.transport";
pub const KEY_REQUEST_SEQ: &str = "request.seq";

pub const KEY_OUTCOME: &str = "outcome";
pub const KEY_CHUNKS: &str = "chunks";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
