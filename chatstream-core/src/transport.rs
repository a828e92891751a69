use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::decoder::ByteStream;
use crate::error::CoreResult;
use crate::model::CompletionRequest;

/// Opens the response body of a streaming chat completion.
///
/// Implementations return once headers are in; the body is read lazily by the session.
/// Dropping the returned stream must release the underlying connection.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn open(&self, req: &CompletionRequest) -> CoreResult<ByteStream>;
}

/// Replays a fixed body in fixed chunks. Useful offline and in tests.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    body: Bytes,
    chunk_size: usize,
}

impl ReplayTransport {
    pub fn new(body: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            body: body.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Canned answer in upstream wire format, one content frame per word.
    pub fn canned(text: &str) -> Self {
        let mut body = String::from(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"index\":0}]}\n\n",
        );
        for (i, word) in text.split_inclusive(' ').enumerate() {
            let frame = serde_json::json!({
                "id": "replay",
                "object": "chat.completion.chunk",
                "choices": [{"delta": {"content": word}, "index": 0, "finish_reason": null}],
                "created": i,
            });
            body.push_str(&format!("data: {frame}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        Self::new(body, 16)
    }
}

#[async_trait]
impl CompletionTransport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open(&self, _req: &CompletionRequest) -> CoreResult<ByteStream> {
        let body = self.body.clone();
        let size = self.chunk_size;
        let chunks: Vec<CoreResult<Bytes>> = (0..body.len())
            .step_by(size)
            .map(|start| Ok(body.slice(start..(start + size).min(body.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameDecoder;
    use crate::model::{CompletionParams, DeltaRecord};

    fn req() -> CompletionRequest {
        CompletionRequest::streaming("gpt-4o", &CompletionParams::default(), &[])
    }

    #[tokio::test]
    async fn replay_splits_body_into_chunks() {
        let t = ReplayTransport::new("abcdefg", 3);
        let parts: Vec<Bytes> = t
            .open(&req())
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(parts, vec![Bytes::from("abc"), Bytes::from("def"), Bytes::from("g")]);
    }

    #[tokio::test]
    async fn canned_body_decodes_to_words() {
        let t = ReplayTransport::canned("hello there");
        let deltas: Vec<DeltaRecord> = FrameDecoder::new(t.open(&req()).await.unwrap())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            deltas,
            vec![
                DeltaRecord::role("assistant"),
                DeltaRecord::content("hello "),
                DeltaRecord::content("there"),
            ]
        );
        assert_eq!(t.name(), "replay");
    }
}
