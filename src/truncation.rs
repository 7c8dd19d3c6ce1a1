//!
//! TruncationRecoveryProcessor: continue generations that stopped early.
//!
//! The request asks the model to end its answer with a `[done]` marker. A
//! stream segment that ends without the marker, or with `MAX_TOKENS`, is
//! treated as truncated: the processor issues a continuation call carrying
//! the output so far and splices its chunks onto the same logical stream.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};

use futures::{Stream, StreamExt};
use regex::Regex;

use crate::converter::gemini::{Content, GenerateContentRequest, GenerateContentResponse, Part, parse_chunk};
use crate::error::Result;
use crate::executor::{BackendRequest, DataStream, RequestExecutor};

/* --- constants ------------------------------------------------------------------------------- */

pub const DONE_MARKER: &str = "[done]";

static DONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\[done\]\s*").expect("static marker pattern"));

const DONE_INSTRUCTION: &str = "Strictly follow this rule for ending your output:\n\
1. When your answer is complete, output [done] on a separate final line.\n\
2. The [done] marker means your answer has fully ended; it is required.\n\
3. Your answer is only considered complete once [done] has been output.\n\
4. If your answer is cut off, you will be asked to continue from where it stopped.\n\
5. End every answer with [done], no matter how short it is.";

const CONTINUATION_PROMPT: &str = "Continue exactly where your previous output was cut off.\n\
Do not repeat anything you already wrote and do not add any preamble.\n\
When the whole answer is complete, output [done] on a separate final line.";

const FINISH_MAX_TOKENS: &str = "MAX_TOKENS";

/* --- types ----------------------------------------------------------------------------------- */

/// Decoded backend chunks of one logical stream
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerateContentResponse>> + Send>>;

///
/// Wraps streaming executor calls with bounded continuation.
#[derive(Clone)]
pub struct TruncationRecovery {
    executor: Arc<RequestExecutor>,
    /** continuation calls allowed after the first segment */
    max_attempts: u32,
}

///
/// Splices segments into one stream.
///
/// The last chunk of each segment is held back until the segment's outcome is
/// known, so the finish reason of a truncated segment never reaches the client.
struct Splicer {
    executor: Arc<RequestExecutor>,
    request: BackendRequest,
    current: Option<DataStream>,
    outbox: VecDeque<Result<GenerateContentResponse>>,
    held: Option<GenerateContentResponse>,
    /** visible text of every segment so far */
    output: String,
    marker_seen: bool,
    last_finish: Option<String>,
    continuations: u32,
    max_continuations: u32,
    done: bool,
}

/* --- start of code -------------------------------------------------------------------------- */

impl TruncationRecovery {
    pub fn new(executor: Arc<RequestExecutor>, max_attempts: u32) -> Self {
        Self { executor, max_attempts }
    }

    ///
    /// Run a streaming call with truncation recovery.
    ///
    /// # Arguments
    ///  * `request` - translated backend request; the `[done]` instruction is added here
    ///
    /// # Returns
    ///  * Spliced chunk stream with markers removed and a single finish reason
    ///  * Error of the first call, before anything was streamed
    pub async fn execute(&self, mut request: BackendRequest) -> Result<ChunkStream> {
        add_done_instruction(&mut request.body);
        let first = self.executor.execute_stream(&request).await?;

        let splicer = Splicer {
            executor: self.executor.clone(),
            request,
            current: Some(first),
            outbox: VecDeque::new(),
            held: None,
            output: String::new(),
            marker_seen: false,
            last_finish: None,
            continuations: 0,
            max_continuations: self.max_attempts,
            done: false,
        };
        Ok(Box::pin(futures::stream::unfold(splicer, |mut splicer| async move {
            let item = splicer.next_item().await?;
            Some((item, splicer))
        })))
    }
}

impl Splicer {
    async fn next_item(&mut self) -> Option<Result<GenerateContentResponse>> {
        loop {
            if let Some(item) = self.outbox.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }

            let Some(stream) = self.current.as_mut() else {
                let request = self.continuation_request();
                match self.executor.execute_stream(&request).await {
                    Ok(stream) => self.current = Some(stream),
                    Err(error) => {
                        tracing::warn!("Continuation call {} failed: {}", self.continuations, error);
                        self.outbox.push_back(Err(error));
                        self.done = true;
                    }
                }
                continue;
            };

            match stream.next().await {
                Some(Ok(data)) => match parse_chunk(&data) {
                    Some(chunk) => self.absorb(chunk),
                    None => tracing::debug!("Skipping undecodable stream chunk"),
                },
                Some(Err(error)) => {
                    self.release_held(false);
                    self.outbox.push_back(Err(error));
                    self.done = true;
                }
                None => self.end_segment(),
            }
        }
    }

    fn absorb(&mut self, mut chunk: GenerateContentResponse) {
        self.marker_seen |= strip_done_marker(&mut chunk);
        if let Some(reason) = chunk.finish_reason() {
            self.last_finish = Some(reason.to_string());
        }
        for part in chunk.parts().iter().filter(|p| !p.is_thought()) {
            if let Some(text) = &part.text {
                self.output.push_str(text);
            }
        }
        if let Some(previous) = self.held.replace(chunk) {
            self.outbox.push_back(Ok(previous));
        }
    }

    fn end_segment(&mut self) {
        self.current = None;
        let truncated = !self.marker_seen || self.last_finish.as_deref() == Some(FINISH_MAX_TOKENS);

        if !truncated {
            self.release_held(true);
            self.done = true;
            return;
        }
        if self.continuations >= self.max_continuations {
            tracing::warn!(
                "Output still truncated after {} continuation(s), delivering what was received",
                self.continuations
            );
            self.release_held(true);
            self.done = true;
            return;
        }

        self.release_held(false);
        self.continuations += 1;
        self.marker_seen = false;
        self.last_finish = None;
        tracing::info!(
            "Truncated output detected ({} chars so far), continuation {}/{}",
            self.output.len(),
            self.continuations,
            self.max_continuations
        );
    }

    /// Emit the held chunk; without `keep_finish` its finish reason is dropped
    fn release_held(&mut self, keep_finish: bool) {
        let Some(mut chunk) = self.held.take() else {
            return;
        };
        if !keep_finish {
            for candidate in &mut chunk.candidates {
                candidate.finish_reason = None;
            }
            if !chunk.has_payload() {
                return;
            }
        }
        self.outbox.push_back(Ok(chunk));
    }

    fn continuation_request(&self) -> BackendRequest {
        let mut body = self.request.body.clone();
        if !self.output.is_empty() {
            body.contents.push(Content::new("model", vec![Part::text(self.output.clone())]));
        }
        body.contents.push(Content::new("user", vec![Part::text(CONTINUATION_PROMPT)]));
        BackendRequest { model: self.request.model.clone(), body }
    }
}

///
/// Append the `[done]` instruction to the system prompt.
///
/// A system prompt that already mentions the marker is left unchanged.
pub fn add_done_instruction(body: &mut GenerateContentRequest) {
    let system = body.system_instruction.get_or_insert_with(|| Content { role: None, parts: Vec::new() });
    let present = system
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .any(|t| t.to_lowercase().contains(DONE_MARKER));
    if !present {
        system.parts.push(Part::text(DONE_INSTRUCTION));
    }
}

///
/// Remove `[done]` markers from a chunk's text parts.
///
/// # Returns
///  * `true` when a marker was found
pub fn strip_done_marker(chunk: &mut GenerateContentResponse) -> bool {
    let mut found = false;
    for candidate in &mut chunk.candidates {
        let Some(content) = candidate.content.as_mut() else {
            continue;
        };
        for part in content.parts.iter_mut().filter(|p| !p.is_thought()) {
            if let Some(text) = part.text.as_mut() {
                if DONE_PATTERN.is_match(text) {
                    *text = DONE_PATTERN.replace_all(text, "").into_owned();
                    found = true;
                }
            }
        }
    }
    found
}

/* --- tests ----------------------------------------------------------------------------------- */
