//!
//! SyntheticStreamEmulator: serve a streaming client from a unary call.
//!
//! The unary call runs as its own task while keep-alive frames go out on a
//! fixed interval. The first heartbeat is sent immediately and one more per
//! elapsed interval, so a call resolving between N and N+1 intervals is
//! preceded by N+1 heartbeats. Dropping the stream aborts the call.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::FakeStreamConfig;
use crate::converter::StreamTranslator;
use crate::converter::gemini::{Candidate, Content, GenerateContentResponse, Part};
use crate::error::Result;
use crate::executor::{BackendRequest, RequestExecutor};
use crate::sse::SseFrame;

/* --- types ----------------------------------------------------------------------------------- */

/// Client-ready frames
pub type FrameStream = Pin<Box<dyn Stream<Item = SseFrame> + Send>>;

///
/// Runs unary executor calls behind synthetic streaming.
#[derive(Clone)]
pub struct SyntheticStream {
    executor: Arc<RequestExecutor>,
    heartbeat_interval: Duration,
    /** characters per emitted content chunk */
    chunk_size: usize,
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

struct Emulator {
    task: Option<AbortOnDrop<Result<GenerateContentResponse>>>,
    ticker: Interval,
    translator: Box<dyn StreamTranslator>,
    outbox: VecDeque<SseFrame>,
    chunk_size: usize,
    heartbeats: u64,
}

/* --- start of code -------------------------------------------------------------------------- */

impl SyntheticStream {
    pub fn new(executor: Arc<RequestExecutor>, config: &FakeStreamConfig) -> Self {
        Self { executor, heartbeat_interval: config.heartbeat_interval(), chunk_size: config.chunk_size.max(1) }
    }

    ///
    /// Start the unary call and return the client stream.
    ///
    /// # Arguments
    ///  * `request` - translated backend request
    ///  * `translator` - client protocol translator for heartbeats, content and errors
    ///
    /// # Returns
    ///  * Heartbeats, then the translated content and terminal frames (or error frames)
    pub fn start(&self, request: BackendRequest, translator: Box<dyn StreamTranslator>) -> FrameStream {
        let executor = self.executor.clone();
        let task = tokio::spawn(async move { executor.execute_unary(&request).await });

        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let emulator = Emulator {
            task: Some(AbortOnDrop(task)),
            ticker,
            translator,
            outbox: VecDeque::new(),
            chunk_size: self.chunk_size,
            heartbeats: 0,
        };
        Box::pin(futures::stream::unfold(emulator, |mut emulator| async move {
            let frame = emulator.next_frame().await?;
            Some((frame, emulator))
        }))
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Emulator {
    async fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            if let Some(frame) = self.outbox.pop_front() {
                return Some(frame);
            }
            let task = self.task.as_mut()?;

            tokio::select! {
                biased;
                result = &mut task.0 => {
                    self.task = None;
                    self.resolve(result);
                }
                _ = self.ticker.tick() => {
                    self.heartbeats += 1;
                    self.outbox.push_back(self.translator.heartbeat());
                }
            }
        }
    }

    fn resolve(&mut self, result: std::result::Result<Result<GenerateContentResponse>, JoinError>) {
        tracing::debug!("Unary call resolved after {} heartbeat(s)", self.heartbeats);
        match result {
            Ok(Ok(response)) => {
                for chunk in split_response(response, self.chunk_size) {
                    self.outbox.extend(self.translator.on_chunk(&chunk));
                }
                self.outbox.extend(self.translator.finish());
            }
            Ok(Err(error)) => {
                tracing::warn!("Unary call behind synthetic stream failed: {}", error);
                let body = error.backend_body().map(str::to_string).unwrap_or_else(|| error.to_string());
                self.outbox.extend(self.translator.on_error(error.status_code(), &body));
            }
            Err(join_error) => {
                tracing::error!("Unary task did not complete: {}", join_error);
                self.outbox.extend(self.translator.on_error(500, "Backend call was interrupted"));
            }
        }
    }
}

///
/// Cut a complete response into stream chunks.
///
/// Text parts are split into pieces of at most `chunk_size` characters; other
/// parts travel whole. The last chunk carries the finish reason and usage.
///
/// # Arguments
///  * `response` - unary backend response
///  * `chunk_size` - characters per text piece
pub fn split_response(response: GenerateContentResponse, chunk_size: usize) -> Vec<GenerateContentResponse> {
    let chunk_size = chunk_size.max(1);
    let mut pieces: Vec<Part> = Vec::new();
    for part in response.parts() {
        let Some(text) = part.text.as_deref().filter(|_| part.function_call.is_none()) else {
            pieces.push(part.clone());
            continue;
        };
        let chars: Vec<char> = text.chars().collect();
        let count = chars.chunks(chunk_size).count();
        for (i, window) in chars.chunks(chunk_size).enumerate() {
            let last = i + 1 == count;
            pieces.push(Part {
                text: Some(window.iter().collect()),
                thought_signature: if last { part.thought_signature.clone() } else { None },
                ..part.clone()
            });
        }
    }

    let chunk = |parts: Vec<Part>| GenerateContentResponse {
        candidates: vec![Candidate {
            content: (!parts.is_empty()).then(|| Content::new("model", parts)),
            index: Some(0),
            ..Candidate::default()
        }],
        model_version: response.model_version.clone(),
        response_id: response.response_id.clone(),
        ..GenerateContentResponse::default()
    };

    let mut chunks: Vec<GenerateContentResponse> = pieces.into_iter().map(|p| chunk(vec![p])).collect();
    if chunks.is_empty() {
        chunks.push(chunk(Vec::new()));
    }
    if let Some(last) = chunks.last_mut() {
        last.candidates[0].finish_reason = response.finish_reason().map(str::to_string);
        last.usage_metadata = response.usage_metadata;
    }
    chunks
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ModelSpec;
    use crate::converter::anthropic::AnthropicStreamTranslator;
    use crate::converter::gemini::parse_chunk;
    use crate::converter::openai::OpenAiStreamTranslator;
    use crate::executor::ExecutorSettings;
    use crate::transport::testing::{Reply, ScriptedTransport, credential_pool};
    use futures::StreamExt;
    use std::collections::BTreeSet;

    const ANSWER: &str = r#"{"response":{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello world!"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":4,"totalTokenCount":7}}}"#;

    fn emulator(transport: Arc<ScriptedTransport>) -> SyntheticStream {
        let settings = ExecutorSettings {
            base_url: "http://backend".to_string(),
            user_agent: "test-agent".to_string(),
            request_timeout: Duration::from_secs(5),
            collect_stream_for_unary: true,
            retry_enabled: false,
            max_retries: 0,
            retry_interval: Duration::ZERO,
            auto_ban_codes: BTreeSet::new(),
        };
        let executor = Arc::new(RequestExecutor::new(credential_pool(&["a"]), transport, settings));
        SyntheticStream::new(executor, &FakeStreamConfig { heartbeat_interval_ms: 1000, chunk_size: 5 })
    }

    fn request() -> BackendRequest {
        BackendRequest {
            model: ModelSpec::parse("fake-stream/gemini-2.5-flash"),
            body: Default::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_then_content_then_done() {
        let transport = ScriptedTransport::new(vec![Reply::Delayed(
            Duration::from_millis(3500),
            Box::new(Reply::Stream(vec![ANSWER])),
        )]);
        let translator = OpenAiStreamTranslator::new("gemini-2.5-flash");
        let heartbeat = translator.heartbeat();

        let frames: Vec<SseFrame> = emulator(transport).start(request(), Box::new(translator)).collect().await;

        assert_eq!(frames.len(), 8);
        assert!(frames[..4].iter().all(|f| *f == heartbeat));
        assert!(frames[4].data.contains("\"content\":\"Hello\""));
        assert!(frames[5].data.contains("\"content\":\" worl\""));
        assert!(frames[6].data.contains("\"content\":\"d!\""));
        assert!(frames[6].data.contains("\"finish_reason\":\"stop\""));
        assert!(frames[7].is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_becomes_error_event() {
        let transport = ScriptedTransport::new(vec![Reply::Delayed(
            Duration::from_millis(1500),
            Box::new(Reply::Status(429, r#"{"error":{"code":429,"message":"Quota exhausted"}}"#)),
        )]);
        let translator = AnthropicStreamTranslator::new("claude-sonnet-4-5");

        let frames: Vec<SseFrame> = emulator(transport).start(request(), Box::new(translator)).collect().await;

        let (last, heartbeats) = frames.split_last().unwrap();
        assert_eq!(heartbeats.len(), 2);
        assert!(heartbeats.iter().all(|f| f.event.as_deref() == Some("ping")));
        assert_eq!(last.event.as_deref(), Some("error"));
        assert!(last.data.contains("Quota exhausted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_aborts_call() {
        let transport = ScriptedTransport::new(vec![Reply::Delayed(
            Duration::from_secs(60),
            Box::new(Reply::Stream(vec![ANSWER])),
        )]);
        let synthetic = emulator(transport.clone());
        let pool = synthetic.executor.pool().clone();

        let mut stream = synthetic.start(request(), Box::new(OpenAiStreamTranslator::new("m")));
        assert!(stream.next().await.is_some());
        drop(stream);

        tokio::time::sleep(Duration::from_secs(120)).await;
        let snapshot = pool.snapshot().await.unwrap();
        assert!(snapshot[0].last_success.is_none());
    }

    #[test]
    fn test_split_response_keeps_terminal_on_last_chunk() {
        let response = parse_chunk(ANSWER).unwrap();
        let chunks = split_response(response, 5);

        assert_eq!(chunks.len(), 3);
        assert!(chunks[..2].iter().all(|c| c.finish_reason().is_none() && c.usage_metadata.is_none()));
        assert_eq!(chunks[2].finish_reason(), Some("STOP"));
        assert_eq!(chunks[2].usage_metadata.unwrap().total_token_count, 7);

        let empty = split_response(GenerateContentResponse::default(), 5);
        assert_eq!(empty.len(), 1);
        assert!(empty[0].parts().is_empty());
    }
}
