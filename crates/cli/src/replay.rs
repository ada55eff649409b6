//! A [`ModelClient`] that plays back recorded replies.
//!
//! Each model call consumes the next reply and streams it in fixed-size
//! chunks, so marker boundaries land wherever the chunk size puts them. Once
//! the recording runs out every call answers with a bare done marker.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use skein_core::error::ProviderError;
use skein_core::provider::{ChunkStream, ModelClient, ModelRequest};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

const EXHAUSTED_REPLY: &str = "<|done|>";

/// Line separating replies in a recording file.
pub const REPLY_SEPARATOR: &str = "---";

pub struct ReplayClient {
    replies: Mutex<VecDeque<String>>,
    chunk_size: usize,
}

impl ReplayClient {
    pub fn new(replies: impl IntoIterator<Item = String>, chunk_size: usize) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Split a recording into replies at lines consisting of `---`.
    pub fn parse_recording(text: &str) -> Vec<String> {
        let mut replies = Vec::new();
        let mut current = String::new();
        for line in text.split_inclusive('\n') {
            if line.trim_end() == REPLY_SEPARATOR {
                replies.push(std::mem::take(&mut current));
            } else {
                current.push_str(line);
            }
        }
        if !current.trim().is_empty() {
            replies.push(current);
        }
        replies
            .into_iter()
            .map(|reply| reply.trim_end_matches('\n').to_string())
            .filter(|reply| !reply.is_empty())
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelClient for ReplayClient {
    fn name(&self) -> &str {
        "replay"
    }

    async fn stream(&self, request: ModelRequest) -> Result<ChunkStream, ProviderError> {
        let reply = self
            .replies
            .lock()
            .map_err(|_| ProviderError::StreamInterrupted("replay state poisoned".into()))?
            .pop_front()
            .unwrap_or_else(|| EXHAUSTED_REPLY.to_string());

        debug!(
            session_id = %request.session_id,
            prompt_tokens = request.context.total_cost,
            reply_bytes = reply.len(),
            "Replaying model reply"
        );

        let chunks: Vec<Result<Vec<u8>, ProviderError>> = reply
            .as_bytes()
            .chunks(self.chunk_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::context::AssembledContext;

    fn request() -> ModelRequest {
        ModelRequest {
            session_id: "s".into(),
            context: AssembledContext {
                sections: Vec::new(),
                total_cost: 0,
                budget: 100,
                overrun: false,
                drops: Vec::new(),
            },
            tools: Vec::new(),
        }
    }

    async fn collect(client: &ReplayClient) -> Vec<Vec<u8>> {
        let stream = client.stream(request()).await.unwrap();
        stream.map(|chunk| chunk.unwrap()).collect().await
    }

    #[test]
    fn recording_splits_on_separator_lines() {
        let text = "first line\nstill first\n---\n<|done|>\n---\n\n";
        let replies = ReplayClient::parse_recording(text);
        assert_eq!(replies, vec!["first line\nstill first", "<|done|>"]);
    }

    #[test]
    fn separator_must_be_whole_line() {
        let replies = ReplayClient::parse_recording("a --- b\n");
        assert_eq!(replies, vec!["a --- b"]);
    }

    #[tokio::test]
    async fn replies_are_chunked() {
        let client = ReplayClient::new(vec!["abcdefg".to_string()], 3);
        let chunks = collect(&client).await;
        assert_eq!(chunks, vec![b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]);
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_recording_answers_done() {
        let client = ReplayClient::new(Vec::<String>::new(), 0);
        let bytes: Vec<u8> = collect(&client).await.concat();
        assert_eq!(bytes, EXHAUSTED_REPLY.as_bytes());
    }
}
