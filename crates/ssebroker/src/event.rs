//! Server-Sent Events framing
//!
//! An [`Event`] is the logical message; [`Event::encode`] turns it into the
//! immutable wire frame that the broker hands to every subscriber:
//!
//! ```text
//! id: <id>\n          (optional)
//! event: <name>\n     (optional)
//! retry: <millis>\n   (optional)
//! data: <line>\n      (one per payload line)
//! \n
//! ```
//!
//! # Example
//!
//! ```rust
//! use ssebroker::Event;
//!
//! let frame = Event::new("2024-01-01T00:00:00Z")
//!     .id("1")
//!     .event("currentTime")
//!     .encode();
//! assert_eq!(&frame[..], b"id: 1\nevent: currentTime\ndata: 2024-01-01T00:00:00Z\n\n");
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

const ID: &[u8] = b"id: ";
const EVENT: &[u8] = b"event: ";
const RETRY: &[u8] = b"retry: ";
const DATA: &[u8] = b"data: ";
const NEWLINE: u8 = b'\n';

/// A Server-Sent Event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// The event data
    pub data: String,
    /// The event type/name
    pub event: Option<String>,
    /// The event ID
    pub id: Option<String>,
    /// Reconnection time hint for the client
    pub retry: Option<Duration>,
}

impl Event {
    /// Create a new event with the given data
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Set the event type/name
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Set the event ID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the reconnection time
    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Serialize the event into a fresh, immutable frame.
    ///
    /// Every call allocates its own buffer, so concurrent publishers never
    /// share scratch space. Line breaks in the payload become separate `data:`
    /// lines; line breaks in `id` or `event` are replaced with spaces.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());

        if let Some(ref id) = self.id {
            put_field(&mut buf, ID, id);
        }
        if let Some(ref event) = self.event {
            put_field(&mut buf, EVENT, event);
        }
        if let Some(retry) = self.retry {
            buf.put_slice(RETRY);
            buf.put_slice(retry.as_millis().to_string().as_bytes());
            buf.put_u8(NEWLINE);
        }
        for line in split_lines(&self.data) {
            buf.put_slice(DATA);
            buf.put_slice(line.as_bytes());
            buf.put_u8(NEWLINE);
        }
        buf.put_u8(NEWLINE);

        buf.freeze()
    }

    fn encoded_len_hint(&self) -> usize {
        self.data.len()
            + self.id.as_ref().map_or(0, |id| id.len() + ID.len() + 1)
            + self.event.as_ref().map_or(0, |ev| ev.len() + EVENT.len() + 1)
            + DATA.len()
            + 2
    }
}

/// Encode a comment frame (`: <text>\n\n`).
///
/// Clients ignore comments; they keep idle connections and proxies alive.
pub fn comment(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 4);
    buf.put_slice(b": ");
    buf.put_slice(single_line(text).as_bytes());
    buf.put_slice(b"\n\n");
    buf.freeze()
}

/// Encode a frame that only carries a reconnection hint.
pub fn retry_hint(retry: Duration) -> Bytes {
    let mut buf = BytesMut::with_capacity(RETRY.len() + 12);
    buf.put_slice(RETRY);
    buf.put_slice(retry.as_millis().to_string().as_bytes());
    buf.put_slice(b"\n\n");
    buf.freeze()
}

fn put_field(buf: &mut BytesMut, prefix: &[u8], value: &str) {
    buf.put_slice(prefix);
    buf.put_slice(single_line(value).as_bytes());
    buf.put_u8(NEWLINE);
}

fn single_line(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        value.replace("\r\n", " ").replace(['\r', '\n'], " ").into()
    } else {
        value.into()
    }
}

// `str::lines` drops a trailing empty line and yields nothing for "", both of
// which would lose data lines. CR, LF and CRLF all terminate a line.
fn split_lines(data: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(['\r', '\n']) {
            Some(pos) => {
                let skip = if current[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[pos + skip..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn named_event_with_id() {
        let frame = Event::new("2024-01-01T00:00:00Z")
            .id("1")
            .event("currentTime")
            .encode();
        assert_eq!(
            &frame[..],
            b"id: 1\nevent: currentTime\ndata: 2024-01-01T00:00:00Z\n\n"
        );
    }

    #[test]
    fn data_only_message() {
        assert_eq!(&Event::new("ping").encode()[..], b"data: ping\n\n");
    }

    #[test]
    fn empty_payload_still_has_a_data_line() {
        assert_eq!(&Event::new("").encode()[..], b"data: \n\n");
    }

    #[test]
    fn multiline_payload_is_split() {
        let frame = Event::new("a\nb\r\nc\rd").encode();
        assert_eq!(&frame[..], b"data: a\ndata: b\ndata: c\ndata: d\n\n");
    }

    #[test]
    fn trailing_newline_keeps_empty_line() {
        let frame = Event::new("a\n").encode();
        assert_eq!(&frame[..], b"data: a\ndata: \n\n");
    }

    #[test]
    fn newlines_in_id_and_event_are_flattened() {
        let frame = Event::new("x").id("1\n2").event("a\r\nb").encode();
        assert_eq!(&frame[..], b"id: 1 2\nevent: a b\ndata: x\n\n");
    }

    #[test]
    fn retry_is_written_in_millis() {
        let frame = Event::new("x").retry(Duration::from_secs(3)).encode();
        assert_eq!(&frame[..], b"retry: 3000\ndata: x\n\n");
    }

    #[test]
    fn comment_and_retry_frames() {
        assert_eq!(&comment("keep-alive")[..], b": keep-alive\n\n");
        assert_eq!(&retry_hint(Duration::from_millis(1500))[..], b"retry: 1500\n\n");
    }

    #[test]
    fn frames_are_independent() {
        let first = Event::new("one").encode();
        let second = Event::new("two").encode();
        assert_eq!(&first[..], b"data: one\n\n");
        assert_eq!(&second[..], b"data: two\n\n");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_frame_layout(
            data in "[a-zA-Z0-9 :.-]{0,50}",
            event in proptest::option::of("[a-zA-Z][a-zA-Z0-9_]{0,20}"),
            id in proptest::option::of("[a-zA-Z0-9]{1,10}"),
        ) {
            let mut ev = Event::new(data.clone());
            if let Some(ref name) = event {
                ev = ev.event(name.clone());
            }
            if let Some(ref id) = id {
                ev = ev.id(id.clone());
            }

            let mut expected = String::new();
            if let Some(ref id) = id {
                expected.push_str(&format!("id: {}\n", id));
            }
            if let Some(ref name) = event {
                expected.push_str(&format!("event: {}\n", name));
            }
            expected.push_str(&format!("data: {}\n\n", data));

            prop_assert_eq!(ev.encode(), Bytes::from(expected));
        }

        #[test]
        fn prop_one_data_line_per_payload_line(
            lines in proptest::collection::vec("[a-zA-Z0-9 ]{0,30}", 1..6),
        ) {
            let frame = Event::new(lines.join("\n")).encode();
            let text = std::str::from_utf8(&frame).unwrap();

            prop_assert!(text.ends_with("\n\n"));
            let data_lines: Vec<&str> = text
                .trim_end_matches('\n')
                .split('\n')
                .collect();
            prop_assert_eq!(data_lines.len(), lines.len());
            for (got, want) in data_lines.iter().zip(lines.iter()) {
                prop_assert_eq!(*got, format!("data: {}", want));
            }
        }
    }
}
