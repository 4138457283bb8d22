use std::collections::VecDeque;
use std::fmt;

use futures_util::{Stream, StreamExt};

use super::json_array::JsonArraySplitter;
use super::sse::{is_done_event, SseParser};
use super::{CompletedTurn, EventStream, SseEvent, StreamEvent};
use crate::error::RelayError;

/// How an upstream response body delimits its payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data:` frames separated by blank lines; `[DONE]` ends the stream.
    Sse,
    /// One streamed JSON array; each element is a structured chunk.
    JsonArray,
}

/// Provider-specific payload decoding.
///
/// Each adapter owns exactly one implementation; this is the only place the
/// "try this field, then that field" extraction logic lives.
pub trait TurnDecoder: Send + 'static {
    /// Decode one complete payload into zero or more events.
    ///
    /// Payloads that cannot be understood are skipped, not reported.
    ///
    /// # Errors
    ///
    /// Returns an error only when the provider itself signals a failure
    /// in-band (for example an SSE `error` event).
    fn decode(&mut self, payload: &str, out: &mut Vec<StreamEvent>) -> Result<(), RelayError>;

    /// Aggregate everything decoded so far into the end-of-turn response.
    fn finish(&mut self) -> CompletedTurn;
}

enum Framer {
    Sse(SseParser),
    JsonArray(JsonArraySplitter),
}

impl Framer {
    fn new(framing: Framing) -> Self {
        match framing {
            Framing::Sse => Framer::Sse(SseParser::new()),
            Framing::JsonArray => Framer::JsonArray(JsonArraySplitter::new()),
        }
    }
}

/// Payloads extracted from one chunk, in arrival order.
enum Payload {
    Data(String),
    Done,
}

struct DecodeState<S, D> {
    bytes: std::pin::Pin<Box<S>>,
    framer: Framer,
    decoder: D,
    utf8_remainder: Vec<u8>,
    frames: Vec<SseEvent>,
    elements: Vec<String>,
    pending: VecDeque<Result<StreamEvent, RelayError>>,
    events: Vec<StreamEvent>,
    finished: bool,
}

impl<S, D: TurnDecoder> DecodeState<S, D> {
    fn take_payloads(&mut self, text: &str, payloads: &mut Vec<Payload>) {
        match &mut self.framer {
            Framer::Sse(parser) => {
                parser.feed_into(text, &mut self.frames);
                Self::drain_frames(&mut self.frames, payloads);
            }
            Framer::JsonArray(splitter) => {
                splitter.feed_into(text, &mut self.elements);
                payloads.extend(self.elements.drain(..).map(Payload::Data));
            }
        }
    }

    fn flush_payloads(&mut self, payloads: &mut Vec<Payload>) {
        if let Framer::Sse(parser) = &mut self.framer {
            parser.flush_into(&mut self.frames);
            Self::drain_frames(&mut self.frames, payloads);
        }
    }

    fn drain_frames(frames: &mut Vec<SseEvent>, payloads: &mut Vec<Payload>) {
        payloads.extend(frames.drain(..).map(|frame| {
            if is_done_event(&frame) {
                Payload::Done
            } else {
                Payload::Data(frame.data)
            }
        }));
    }

    /// Run payloads through the decoder; stops at `[DONE]` or an in-band error.
    fn decode_payloads(&mut self, payloads: Vec<Payload>) {
        for payload in payloads {
            match payload {
                Payload::Done => {
                    self.end_turn();
                    return;
                }
                Payload::Data(data) => {
                    if let Err(err) = self.decoder.decode(&data, &mut self.events) {
                        self.pending.extend(self.events.drain(..).map(Ok));
                        self.pending.push_back(Err(err));
                        self.finished = true;
                        return;
                    }
                    self.pending.extend(self.events.drain(..).map(Ok));
                }
            }
        }
    }

    fn end_turn(&mut self) {
        let completed = self.decoder.finish();
        self.pending.push_back(Ok(StreamEvent::End(completed)));
        self.finished = true;
    }
}

/// Decode text from `bytes`, carrying an incomplete trailing UTF-8 sequence
/// over to the next chunk.
fn take_utf8(remainder: &mut Vec<u8>, bytes: &[u8]) -> String {
    remainder.extend_from_slice(bytes);
    match std::str::from_utf8(remainder) {
        Ok(text) => {
            let text = text.to_owned();
            remainder.clear();
            text
        }
        Err(err) if err.error_len().is_none() => {
            let valid_up_to = err.valid_up_to();
            let text = String::from_utf8_lossy(&remainder[..valid_up_to]).into_owned();
            remainder.drain(..valid_up_to);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(remainder).into_owned();
            remainder.clear();
            text
        }
    }
}

/// Turn a raw upstream body into a stream of [`StreamEvent`]s.
///
/// The stream always finishes with exactly one [`StreamEvent::End`] unless
/// the body or the provider reports an error first, in which case the error
/// is the last item.
pub fn decode_event_stream<S, E, D>(byte_stream: S, framing: Framing, decoder: D) -> EventStream
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
    D: TurnDecoder,
{
    let state = DecodeState {
        bytes: Box::pin(byte_stream),
        framer: Framer::new(framing),
        decoder,
        utf8_remainder: Vec::new(),
        frames: Vec::new(),
        elements: Vec::new(),
        pending: VecDeque::new(),
        events: Vec::with_capacity(4),
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            let mut payloads = Vec::new();
            match state.bytes.as_mut().next().await {
                Some(Ok(chunk)) => {
                    let text = take_utf8(&mut state.utf8_remainder, &chunk);
                    state.take_payloads(&text, &mut payloads);
                    state.decode_payloads(payloads);
                }
                Some(Err(err)) => {
                    state
                        .pending
                        .push_back(Err(RelayError::Transport(format!(
                            "Upstream stream interrupted: {err}"
                        ))));
                    state.finished = true;
                }
                None => {
                    state.flush_payloads(&mut payloads);
                    state.decode_payloads(payloads);
                    if !state.finished {
                        state.end_turn();
                    }
                }
            }
        }
    }))
}
