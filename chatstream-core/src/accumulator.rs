use crate::model::{ChatMessage, ChatToken, DeltaRecord};

/// Folds deltas into the in-progress assistant message. Knows nothing about transport,
/// cancellation or timing; the caller supplies each token's timestamp.
#[derive(Debug, Clone)]
pub struct DeltaAccumulator {
    message: ChatMessage,
}

impl DeltaAccumulator {
    pub fn new(placeholder: ChatMessage) -> Self {
        Self {
            message: placeholder,
        }
    }

    /// Concatenate `delta` onto the message and log it as a token.
    pub fn apply(&mut self, delta: DeltaRecord, received_at: i64) -> &ChatMessage {
        let content = delta.content.unwrap_or_default();
        let role = delta.role.unwrap_or_default();
        self.message.content.push_str(&content);
        self.message.role.push_str(&role);
        self.message.meta.chunks.push(ChatToken {
            content,
            role,
            timestamp: received_at,
        });
        &self.message
    }

    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub fn chunk_count(&self) -> usize {
        self.message.meta.chunks.len()
    }

    pub fn into_message(self) -> ChatMessage {
        self.message
    }
}
