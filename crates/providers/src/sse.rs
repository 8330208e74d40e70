//! SSE framing for upstream completion streams.
//!
//! Bytes are buffered, split on blank lines, and each `data:` payload is
//! handed to a [`StreamDecoder`]. Two pieces:
//! - [`drain_data_lines`] -- pull complete `data:` payloads from an SSE buffer
//! - [`sse_event_stream`] -- build a `BoxStream` of events from a byte stream

use crate::decoder::StreamDecoder;
use cs_domain::error::Result;
use cs_domain::stream::{BoxStream, StreamEvent};
use futures_util::stream::{Stream, StreamExt};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by `\n\n`. Only `data:` lines are kept; a
/// trailing partial event stays in the buffer for the next call.
pub fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Append bytes to the text buffer, holding back an incomplete UTF-8
/// sequence split across network chunks.
fn push_bytes(buffer: &mut String, carry: &mut Vec<u8>, bytes: &[u8]) {
    carry.extend_from_slice(bytes);
    let valid = match std::str::from_utf8(carry).map(str::len) {
        Ok(len) => len,
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => {
            buffer.push_str(&String::from_utf8_lossy(carry).replace("\r\n", "\n"));
            carry.clear();
            return;
        }
    };
    let text = String::from_utf8_lossy(&carry[..valid]).replace("\r\n", "\n");
    buffer.push_str(&text);
    carry.drain(..valid);
}

/// Decode every complete payload in `buffer`. Stops at the first error or
/// once the decoder has finished.
fn feed(decoder: &mut StreamDecoder, buffer: &mut String) -> Vec<Result<StreamEvent>> {
    let mut out = Vec::new();
    for data in drain_data_lines(buffer) {
        match decoder.decode_data(&data) {
            Ok(events) => out.extend(events.into_iter().map(Ok)),
            Err(e) => {
                out.push(Err(e));
                break;
            }
        }
        if decoder.is_finished() {
            break;
        }
    }
    out
}

/// Build the lazy event sequence for one upstream call.
///
/// The stream ends after the decoder's `Finish`, after the first `Err`, or
/// when the byte stream closes (a final `Finish` is synthesized then).
pub fn sse_event_stream<S, B>(bytes: S, decoder: StreamDecoder) -> BoxStream<'static, Result<StreamEvent>>
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = decoder;
        let mut buffer = String::new();
        let mut carry = Vec::new();

        loop {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    push_bytes(&mut buffer, &mut carry, chunk.as_ref());
                    for item in feed(&mut decoder, &mut buffer) {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            return;
                        }
                    }
                    if decoder.is_finished() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    yield Err(e);
                    return;
                }
                None => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for item in feed(&mut decoder, &mut buffer) {
                            let failed = item.is_err();
                            yield item;
                            if failed {
                                return;
                            }
                        }
                    }
                    break;
                }
            }
        }

        for event in decoder.end() {
            yield Ok(event);
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
