use memchr::memchr;
use tracing::warn;

/// Splits a chunked HTTP body into trimmed, non-empty lines.
#[derive(Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    /// Whatever remains once the body has ended, as a final line.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = memchr(b'\n', &self.buffer[search_index..]) {
            let newline_index = search_index + relative_pos;
            push_line(&self.buffer[search_index..newline_index], &mut lines);
            search_index = newline_index + 1;
        }

        if flush {
            push_line(&self.buffer[search_index..], &mut lines);
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

fn push_line(bytes: &[u8], lines: &mut Vec<String>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        Err(err) => warn!("skipping line with invalid UTF-8 in stream: {err}"),
    }
}

pub(crate) const DONE_SENTINEL: &str = "[DONE]";

/// The payload of an SSE `data:` line, with or without a space after the colon.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}
