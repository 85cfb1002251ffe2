//! Server-sent-event decoding for streamed completions.

use tracing::{debug, warn};

use super::protocol::{ProtocolAdapter, StreamEvent};
use super::tool_calls::ToolCallAccumulator;
use super::types::ToolCall;

/// Splits a byte stream into lines regardless of how it was chunked.
///
/// Bytes are buffered until a newline arrives, so a UTF-8 sequence split
/// across two network reads is decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line[..pos]));
        }
        lines
    }

    /// Remaining unterminated text, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\r').to_string()
}

/// What one upstream response produced.
#[derive(Debug, Default)]
pub struct DecodedRound {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    /// Error reported by the provider inside the stream.
    pub error: Option<String>,
}

/// Incremental decoder for one streamed response.
pub struct StreamDecoder<'a> {
    adapter: &'a dyn ProtocolAdapter,
    lines: LineBuffer,
    text: String,
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<String>,
    error: Option<String>,
    done: bool,
}

impl<'a> StreamDecoder<'a> {
    pub fn new(adapter: &'a dyn ProtocolAdapter) -> Self {
        Self {
            adapter,
            lines: LineBuffer::new(),
            text: String::new(),
            tool_calls: ToolCallAccumulator::new(),
            finish_reason: None,
            error: None,
            done: false,
        }
    }

    /// Feed raw bytes; returns the text deltas decoded from them, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let lines = self.lines.push(chunk);
        let mut deltas = Vec::new();
        for line in lines {
            self.handle_line(&line, &mut deltas);
        }
        deltas
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line, &mut deltas);
        }
        deltas
    }

    /// True once the end-of-stream sentinel or an error was seen.
    pub fn is_terminated(&self) -> bool {
        self.done || self.error.is_some()
    }

    pub fn into_round(self) -> DecodedRound {
        DecodedRound {
            text: self.text,
            tool_calls: self.tool_calls.into_completed(),
            finish_reason: self.finish_reason,
            error: self.error,
        }
    }

    fn handle_line(&mut self, line: &str, deltas: &mut Vec<String>) {
        if self.is_terminated() {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            // blank separators, `event:` lines and `:` comments
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data).trim_end();
        if data.is_empty() {
            return;
        }

        let events = match self.adapter.parse_data(data) {
            Ok(events) => events,
            Err(e) => {
                warn!(provider = self.adapter.name(), error = %e, "Skipping malformed stream line");
                return;
            }
        };

        for event in events {
            match event {
                StreamEvent::TextDelta(delta) => {
                    self.text.push_str(&delta);
                    deltas.push(delta);
                }
                StreamEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => self.tool_calls.apply(index, id, name, &arguments),
                StreamEvent::BlockEnd { index } => self.tool_calls.finish(index),
                StreamEvent::Finished { reason } => {
                    self.tool_calls.finish_all();
                    if reason.is_some() {
                        self.finish_reason = reason;
                    }
                }
                StreamEvent::Done => {
                    debug!(provider = self.adapter.name(), "Stream end sentinel");
                    self.done = true;
                    return;
                }
                StreamEvent::Error(message) => {
                    self.error = Some(message);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AnthropicAdapter, OpenAiAdapter};

    const OPENAI_STREAM: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Grüße, \"}}]}\n\n",
        "data: {not json}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"wörld 🌍\"}}]}\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn decode_chunks(adapter: &dyn ProtocolAdapter, chunks: &[&[u8]]) -> (String, Vec<String>) {
        let mut decoder = StreamDecoder::new(adapter);
        let mut deltas = Vec::new();
        for chunk in chunks {
            deltas.extend(decoder.feed(chunk));
        }
        deltas.extend(decoder.finish());
        (decoder.into_round().text, deltas)
    }

    #[test]
    fn line_buffer_handles_split_utf8() {
        let bytes = "ü\nrest".as_bytes();
        let mut buf = LineBuffer::new();
        assert!(buf.push(&bytes[..1]).is_empty());
        assert_eq!(buf.push(&bytes[1..]), vec!["ü".to_string()]);
        assert_eq!(buf.finish(), Some("rest".to_string()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn whole_stream_decodes_and_skips_malformed() {
        let (text, deltas) = decode_chunks(&OpenAiAdapter, &[OPENAI_STREAM.as_bytes()]);
        assert_eq!(text, "Grüße, wörld 🌍");
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn chunk_boundaries_do_not_change_result() {
        let bytes = OPENAI_STREAM.as_bytes();
        let (expected, _) = decode_chunks(&OpenAiAdapter, &[bytes]);

        for size in [1, 2, 3, 5, 7, 13, 64] {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            let (text, _) = decode_chunks(&OpenAiAdapter, &chunks);
            assert_eq!(text, expected, "chunk size {}", size);
        }
        for split in 0..bytes.len() {
            let (text, _) = decode_chunks(&OpenAiAdapter, &[&bytes[..split], &bytes[split..]]);
            assert_eq!(text, expected, "split at {}", split);
        }
    }

    #[test]
    fn trailing_line_without_newline_is_flushed() {
        let stream = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let (text, _) = decode_chunks(&OpenAiAdapter, &[stream.as_bytes()]);
        assert_eq!(text, "tail");
    }

    #[test]
    fn anthropic_tool_use_stream() {
        let stream = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Let me check.\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_9\",\"name\":\"recall_pages\",\"input\":{}}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"query\\\": \"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"rust\\\"}\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let mut decoder = StreamDecoder::new(&AnthropicAdapter);
        for chunk in stream.as_bytes().chunks(11) {
            decoder.feed(chunk);
        }
        assert!(decoder.is_terminated());
        let round = decoder.into_round();
        assert_eq!(round.text, "Let me check.");
        assert_eq!(round.finish_reason.as_deref(), Some("tool_use"));
        assert_eq!(round.tool_calls.len(), 1);
        assert_eq!(round.tool_calls[0].id, "toolu_9");
        assert_eq!(round.tool_calls[0].parsed_arguments()["query"], "rust");
    }

    #[test]
    fn error_event_stops_decoding() {
        let stream = concat!(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"partial\"}}\n",
            "data: {\"type\":\"error\",\"error\":{\"message\":\"Overloaded\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" ignored\"}}\n",
        );
        let mut decoder = StreamDecoder::new(&AnthropicAdapter);
        decoder.feed(stream.as_bytes());
        let round = decoder.into_round();
        assert_eq!(round.text, "partial");
        assert_eq!(round.error.as_deref(), Some("Overloaded"));
    }
}
