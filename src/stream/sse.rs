/// Incremental SSE (Server-Sent Events) frame parser.
///
/// Handles buffering partial lines across arbitrary chunk boundaries and the
/// field semantics of the
/// [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html)
/// that model providers rely on (`event`, `data`, comments, blank-line
/// dispatch).
use super::SseEvent;
use memchr::memchr_iter;

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events parsed.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    ///
    /// - `event:` sets the event type for the next frame
    /// - `data:` appends to the data buffer (one leading space stripped);
    ///   repeated `data:` lines are joined with `\n`
    /// - an empty line terminates a frame
    /// - `:` comments and unknown fields are ignored
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Dispatch a trailing frame that was never terminated by a blank line.
    pub fn flush_into(&mut self, out: &mut Vec<SseEvent>) {
        if self.read_offset < self.buffer.len() {
            let tail = self.buffer[self.read_offset..].to_string();
            Self::process_line(
                tail.trim_end_matches('\r'),
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
        }
        self.buffer.clear();
        self.read_offset = 0;
        Self::process_line(
            "",
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            out,
        );
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                });
                *has_data = false;
            } else {
                *event_type = None;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        }
    }
}

/// Check if an [`SseEvent`] is a terminal `[DONE]` event.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == "[DONE]"
}
