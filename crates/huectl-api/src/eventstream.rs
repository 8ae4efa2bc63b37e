//! Bridge event stream (`GET /eventstream/clip/v2`).
//!
//! The bridge pushes server-sent events whose `data: ` lines carry JSON
//! arrays of update events. [`EventStreamParser`] turns raw body chunks into
//! [`UpdateEvent`]s; [`BridgeSession::events`] wraps it around the live
//! HTTP body.
//!
//! The stream is not restarted when the bridge closes it. The final item
//! is an `Err` carrying the reason when the transport fails.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//!
//! let mut events = std::pin::pin!(session.events());
//! while let Some(Ok(event)) = events.next().await {
//!     for partial in &event.data {
//!         println!("{:?} {:?}", partial.resource_type(), partial.id());
//!     }
//! }
//! ```

use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, trace, warn};

use crate::decoder::{ArrayDecoder, DecodeError};
use crate::error::Error;
use crate::models::ResourceType;
use crate::session::BridgeSession;

const DATA_PREFIX: &[u8] = b"data: ";

// ── Event types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Update,
    Add,
    Delete,
    Error,
    #[serde(other)]
    Unknown,
}

/// A partial resource as pushed by the bridge: `id`, `type`, and only the
/// fields that changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePartial(pub Map<String, Value>);

impl ResourcePartial {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Parsed `type`, or `None` for kinds huectl does not track.
    pub fn resource_type(&self) -> Option<ResourceType> {
        self.0.get("type")?.as_str()?.parse().ok()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// One decoded element of an event-stream array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creationtime: Option<String>,
    #[serde(default)]
    pub data: Vec<ResourcePartial>,
}

impl UpdateEvent {
    /// Interpret one array element. Envelopes (`{"type":"update","data":[..]}`)
    /// are taken as-is; a bare object is treated as a single partial update.
    pub fn from_element(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Object(map) if map.get("data").is_some_and(Value::is_array) => {
                Ok(serde_json::from_value(Value::Object(map))?)
            }
            Value::Object(map) => Ok(Self {
                id: None,
                kind: EventKind::Update,
                creationtime: None,
                data: vec![ResourcePartial(map)],
            }),
            _ => Err(DecodeError::NotAnEvent),
        }
    }
}

// ── Parser ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line {
    /// At the start of a line, matching against `data: `.
    Start,
    /// Inside a `data: ` payload.
    Data,
    /// Inside any other line (`id:`, `event:`, comments).
    Skip,
}

/// Splits an SSE body into lines and feeds `data: ` payloads to a single
/// [`ArrayDecoder`].
///
/// Payload bytes reach the decoder as soon as they arrive, so an event is
/// emitted the moment its element closes even if the line is still open.
#[derive(Debug)]
pub struct EventStreamParser {
    line: Line,
    prefix_len: usize,
    decoder: ArrayDecoder,
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self {
            line: Line::Start,
            prefix_len: 0,
            decoder: ArrayDecoder::new(),
        }
    }

    /// Feed one body chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<UpdateEvent, DecodeError>> {
        let mut out = Vec::new();
        let mut span_start: Option<usize> = None;

        for (i, &b) in chunk.iter().enumerate() {
            if b == b'\n' {
                if let Some(start) = span_start.take() {
                    self.decode(&chunk[start..i], &mut out);
                }
                self.line = Line::Start;
                self.prefix_len = 0;
                continue;
            }

            match self.line {
                Line::Start => {
                    if DATA_PREFIX.get(self.prefix_len) == Some(&b) {
                        self.prefix_len += 1;
                        if self.prefix_len == DATA_PREFIX.len() {
                            self.line = Line::Data;
                            span_start = Some(i + 1);
                        }
                    } else {
                        self.line = Line::Skip;
                    }
                }
                Line::Data if span_start.is_none() => span_start = Some(i),
                Line::Data | Line::Skip => {}
            }
        }

        if let Some(start) = span_start {
            self.decode(&chunk[start..], &mut out);
        }
        out
    }

    fn decode(&mut self, payload: &[u8], out: &mut Vec<Result<UpdateEvent, DecodeError>>) {
        if payload.is_empty() {
            return;
        }
        trace!(len = payload.len(), "event stream payload");

        for element in self.decoder.feed(payload) {
            out.push(element.and_then(UpdateEvent::from_element));
        }

        if self.decoder.is_failed() {
            // Start over with the next data line.
            self.decoder.reset();
            self.line = Line::Skip;
        }
    }
}

// ── Live stream ──────────────────────────────────────────────────────

impl BridgeSession {
    /// Open the event stream on this session.
    ///
    /// Lazy: nothing is requested until the stream is first polled.
    /// Malformed payloads are logged and skipped. The stream ends when the
    /// bridge closes the body, the read fails (yielding one `Err` first),
    /// or the session is closed.
    pub fn events(&self) -> impl Stream<Item = Result<UpdateEvent, Error>> + Send + 'static {
        let session = self.clone();

        async_stream::stream! {
            let cancel = session.cancel_token();

            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                response = session.open_event_stream() => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "event stream request failed");
                    yield Err(e);
                    return;
                }
            };

            info!("event stream open");
            let mut body = response.bytes_stream();
            let mut parser = EventStreamParser::new();

            loop {
                let chunk = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("event stream cancelled");
                        break;
                    }
                    chunk = body.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        for result in parser.feed(&bytes) {
                            match result {
                                Ok(event) => yield Ok(event),
                                Err(e) => warn!(error = %e, "discarding malformed event payload"),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "event stream read failed");
                        yield Err(Error::Transport(e));
                        break;
                    }
                    None => {
                        info!("event stream closed by bridge");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn events(results: Vec<Result<UpdateEvent, DecodeError>>) -> Vec<UpdateEvent> {
        results.into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn data_split_across_chunks_yields_one_event() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(br#"data: [{"id":"a""#).is_empty());

        let out = events(parser.feed(b",\"on\":true}]\n"));
        assert_eq!(out.len(), 1);
        assert_eq!(
            serde_json::to_value(&out[0].data[0]).unwrap(),
            json!({ "id": "a", "on": true })
        );
    }

    #[test]
    fn sequential_arrays_yield_two_events() {
        let mut parser = EventStreamParser::new();
        let out = events(parser.feed(b"data: [{\"id\":\"a\"}]\ndata: [{\"id\":\"b\"}]\n"));
        let ids: Vec<_> = out.iter().map(|e| e.data[0].id().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn envelopes_carry_their_data_array() {
        let mut parser = EventStreamParser::new();
        let payload = json!([{
            "creationtime": "2024-05-01T10:00:00Z",
            "id": "evt-1",
            "type": "update",
            "data": [
                { "id": "l1", "type": "light", "on": { "on": false } },
                { "id": "m1", "type": "motion", "motion": { "motion": true } }
            ]
        }]);
        let line = format!(": hi\nid: 1714557600:0\ndata: {payload}\n\n");
        let out = events(parser.feed(line.as_bytes()));

        assert_eq!(out.len(), 1);
        let event = &out[0];
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.id.as_deref(), Some("evt-1"));
        assert_eq!(event.data[0].resource_type(), Some(ResourceType::Light));
        assert_eq!(event.data[1].resource_type(), None);
    }

    #[test]
    fn prefix_split_across_chunks() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"da").is_empty());
        assert!(parser.feed(b"ta: [").is_empty());
        let out = events(parser.feed(b"{\"id\":\"x\"}]\n"));
        assert_eq!(out[0].data[0].id(), Some("x"));
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"event: ping\nretry: 1000\n: [not json\n").is_empty());
    }

    #[test]
    fn bad_payload_is_reported_and_stream_recovers() {
        let mut parser = EventStreamParser::new();
        let out = parser.feed(b"data: {oops}\n");
        assert!(matches!(out.as_slice(), [Err(DecodeError::ExpectedArray { .. })]));

        let out = events(parser.feed(b"data: [{\"id\":\"ok\"}]\n"));
        assert_eq!(out[0].data[0].id(), Some("ok"));
    }

    #[test]
    fn bad_payload_split_mid_line_is_skipped() {
        let mut parser = EventStreamParser::new();
        let out = parser.feed(b"data: [{\"id\":}");
        assert_eq!(out.len(), 1);
        assert!(out[0].is_err());
        // Remainder of the broken line is dropped silently.
        assert!(parser.feed(b",{\"id\":\"x\"}]").is_empty());
        let out = events(parser.feed(b"\ndata: [{\"id\":\"y\"}]\n"));
        assert_eq!(out[0].data[0].id(), Some("y"));
    }

    #[test]
    fn non_object_element_is_an_error() {
        let mut parser = EventStreamParser::new();
        let out = parser.feed(b"data: [42]\n");
        assert!(matches!(out.as_slice(), [Err(DecodeError::NotAnEvent)]));
    }
}
