//!
//! Collapse a backend stream into a single unary response.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::converter::gemini::{Candidate, Content, GenerateContentResponse, Part};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Accumulates stream chunks of the first candidate.
///
/// Adjacent text parts with the same `thought` flag are merged, a function call
/// repeated under the same id replaces the earlier one, and the last finish
/// reason and usage block win.
#[derive(Debug, Default)]
pub struct StreamCollector {
    parts: Vec<Part>,
    last: GenerateContentResponse,
    finish_reason: Option<String>,
    chunks: usize,
}

/* --- start of code -------------------------------------------------------------------------- */

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks absorbed so far
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    ///
    /// Absorb one decoded stream chunk.
    pub fn push(&mut self, chunk: GenerateContentResponse) {
        self.chunks += 1;
        if let Some(candidate) = chunk.candidates.first() {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    self.push_part(part.clone());
                }
            }
            if candidate.finish_reason.is_some() {
                self.finish_reason = candidate.finish_reason.clone();
            }
        }

        let usage = chunk.usage_metadata.or(self.last.usage_metadata);
        self.last = chunk;
        self.last.usage_metadata = usage;
    }

    fn push_part(&mut self, part: Part) {
        if let Some(id) = part.function_call.as_ref().and_then(|c| c.id.clone()) {
            let existing = self
                .parts
                .iter_mut()
                .find(|p| p.function_call.as_ref().and_then(|c| c.id.as_deref()) == Some(id.as_str()));
            if let Some(existing) = existing {
                *existing = part;
                return;
            }
        }

        if let (Some(text), Some(prev)) = (part.text.as_deref(), self.parts.last_mut()) {
            let mergeable = prev.text.is_some()
                && prev.is_thought() == part.is_thought()
                && prev.function_call.is_none()
                && prev.inline_data.is_none();
            if mergeable {
                if let Some(prev_text) = prev.text.as_mut() {
                    prev_text.push_str(text);
                }
                if part.thought_signature.is_some() {
                    prev.thought_signature = part.thought_signature;
                }
                return;
            }
        }

        self.parts.push(part);
    }

    ///
    /// Produce the merged response.
    ///
    /// # Returns
    ///  * Response whose single candidate holds every collected part
    pub fn finish(self) -> GenerateContentResponse {
        let mut response = self.last;
        let template = response.candidates.first().cloned().unwrap_or_default();
        response.candidates = vec![Candidate {
            content: Some(Content { role: Some("model".to_string()), parts: self.parts }),
            finish_reason: self.finish_reason,
            index: template.index.or(Some(0)),
            extra: template.extra,
        }];
        response
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::gemini::parse_chunk;

    fn collect(lines: &[&str]) -> GenerateContentResponse {
        let mut collector = StreamCollector::new();
        for line in lines {
            collector.push(parse_chunk(line).unwrap());
        }
        collector.finish()
    }

    #[test]
    fn test_merges_adjacent_text() {
        let merged = collect(&[
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"thinking ","thought":true}]}}]}}"#,
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"more","thought":true}]}}]}}"#,
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}}"#,
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP"}],
               "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5}}}"#,
        ]);

        let parts = merged.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.as_deref(), Some("thinking more"));
        assert!(parts[0].is_thought());
        assert_eq!(parts[1].text.as_deref(), Some("Hello"));
        assert_eq!(merged.finish_reason(), Some("STOP"));
        assert_eq!(merged.usage_metadata.unwrap().total_token_count, 5);
    }

    #[test]
    fn test_repeated_function_call_replaces() {
        let merged = collect(&[
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"id":"c1","name":"f","args":{}}}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"id":"c1","name":"f","args":{"a":1}}}]}}]}"#,
            r#"{"candidates":[{"finishReason":"STOP"}]}"#,
        ]);

        let parts = merged.parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].function_call.as_ref().unwrap().args["a"], 1);
    }
}
