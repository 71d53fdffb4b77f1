//! Server-Sent Events (SSE) streaming for the OpenRouter chat completions API.
//!
//! [`OpenRouterClient::chat_stream_live`] reads the response body chunk by
//! chunk and hands each parsed [`StreamEvent`] to a callback as it arrives,
//! which is how streamed answers reach the caller before generation ends.

use super::client::{ChatRequest, OpenRouterClient, UsageInfo, request_error};
use crate::error::BackendError;
use serde::Deserialize;
use tracing::{debug, trace, warn};

/// A single event from an SSE stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// Token usage information (sent in the final chunk).
    Usage(UsageInfo),
    /// The stream is complete.
    Done,
}

/// Raw SSE data chunk from the OpenRouter API.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// Incremental line decoder for an SSE body.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: String,
    done: bool,
}

impl SseDecoder {
    /// Feed raw bytes, appending any completed events to `events`.
    pub(crate) fn push(&mut self, chunk: &[u8], events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            if self.line(line.trim(), events) {
                break;
            }
        }
    }

    /// Flush a trailing unterminated line and make sure the stream ends with
    /// [`StreamEvent::Done`].
    pub(crate) fn finish(&mut self, events: &mut Vec<StreamEvent>) {
        let remaining = std::mem::take(&mut self.buffer);
        if !self.done {
            self.line(remaining.trim(), events);
        }
        if !self.done {
            events.push(StreamEvent::Done);
            self.done = true;
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Handle one line; returns true once the terminal marker is seen.
    fn line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> bool {
        if line.is_empty() || line.starts_with(':') {
            return false;
        }
        if line == "data: [DONE]" {
            events.push(StreamEvent::Done);
            self.done = true;
            return true;
        }
        if let Some(data) = line.strip_prefix("data: ") {
            parse_sse_data(data, events);
        }
        false
    }
}

impl OpenRouterClient {
    /// Send a streaming chat request, invoking `on_event` for each event as
    /// it arrives off the wire. The full event list is also returned.
    pub async fn chat_stream_live(
        &self,
        body: &ChatRequest,
        mut on_event: impl FnMut(&StreamEvent),
    ) -> Result<Vec<StreamEvent>, BackendError> {
        let mut stream_body =
            serde_json::to_value(body).map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        stream_body["stream"] = serde_json::Value::Bool(true);

        debug!("Sending live streaming chat request");

        let mut resp = self.post(&stream_body).send().await.map_err(request_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http { status, body: text });
        }

        let mut events = Vec::new();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = resp.chunk().await.map_err(request_error)? {
            let before = events.len();
            decoder.push(&chunk, &mut events);
            for ev in &events[before..] {
                on_event(ev);
            }
            if decoder.is_done() {
                break;
            }
        }

        let before = events.len();
        decoder.finish(&mut events);
        for ev in &events[before..] {
            on_event(ev);
        }

        debug!("Live stream completed with {} events", events.len());
        Ok(events)
    }
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(usage) = chunk.usage {
                events.push(StreamEvent::Usage(usage));
            }
            for choice in chunk.choices.unwrap_or_default() {
                if let Some(content) = choice.delta.and_then(|d| d.content)
                    && !content.is_empty()
                {
                    events.push(StreamEvent::TextDelta(content));
                }
                if choice.finish_reason.is_some() {
                    trace!("Stream finish_reason: {:?}", choice.finish_reason);
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e}; data: {data}");
        }
    }
}

/// Assemble a complete text string from a sequence of stream events.
pub fn collect_text(events: &[StreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let StreamEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

/// Extract usage info from stream events (if present).
pub fn extract_usage(events: &[StreamEvent]) -> Option<UsageInfo> {
    events.iter().rev().find_map(|event| match event {
        StreamEvent::Usage(usage) => Some(usage.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{text}\"}}}}]}}\n")
    }

    #[test]
    fn collect_text_from_deltas() {
        let events = vec![
            StreamEvent::TextDelta("Hello ".into()),
            StreamEvent::TextDelta("world!".into()),
            StreamEvent::Done,
        ];
        assert_eq!(collect_text(&events), "Hello world!");
    }

    #[test]
    fn decoder_handles_lines_split_across_chunks() {
        let wire = format!("{}{}: keep-alive\n\ndata: [DONE]\n", delta("Hel"), delta("lo"));
        let (a, b) = wire.split_at(17);
        let mut decoder = SseDecoder::default();
        let mut events = Vec::new();
        decoder.push(a.as_bytes(), &mut events);
        assert!(events.is_empty());
        decoder.push(b.as_bytes(), &mut events);
        assert!(decoder.is_done());
        assert_eq!(collect_text(&events), "Hello");
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[test]
    fn finish_flushes_unterminated_line_and_adds_done() {
        let mut decoder = SseDecoder::default();
        let mut events = Vec::new();
        decoder.push(delta("tail").trim_end().as_bytes(), &mut events);
        assert!(events.is_empty());
        decoder.finish(&mut events);
        assert_eq!(collect_text(&events), "tail");
        assert_eq!(
            events.iter().filter(|e| matches!(e, StreamEvent::Done)).count(),
            1
        );
    }

    #[test]
    fn data_after_done_is_ignored() {
        let wire = format!("data: [DONE]\n{}", delta("late"));
        let mut decoder = SseDecoder::default();
        let mut events = Vec::new();
        decoder.push(wire.as_bytes(), &mut events);
        decoder.finish(&mut events);
        assert_eq!(collect_text(&events), "");
    }

    #[test]
    fn malformed_payload_is_skipped() {
        let mut events = Vec::new();
        parse_sse_data("{not json", &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn extract_usage_from_events() {
        let mut events = Vec::new();
        parse_sse_data(
            r#"{"choices":[],"usage":{"prompt_tokens":100,"completion_tokens":50,"total_tokens":150}}"#,
            &mut events,
        );
        let usage = extract_usage(&events).unwrap();
        assert_eq!(usage.prompt_tokens, Some(100));
        assert!(extract_usage(&[StreamEvent::Done]).is_none());
    }
}
