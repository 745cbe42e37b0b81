//! Wire format between clients and the relay.
//!
//! Newline-delimited JSON over TCP, one message per line, tagged by `type`:
//!
//! ```text
//! client -> relay   {"type":"hello","role":{"source":true,"sink":true},"name":"lab-3","version":"0.1.0"}
//!                   {"type":"gaze","x":812.25,"y":430.5}
//! relay  -> client  {"type":"welcome","id":"5f0c..."}
//!                   {"type":"gaze","from":"5f0c...","x":812.25,"y":430.5}
//!                   {"type":"peer_left","id":"5f0c..."}
//! ```

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::ops::BitOr;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// Longest line either side accepts; anything longer is a protocol error.
pub const MAX_LINE_BYTES: usize = 4096;

/// Which directions of gaze traffic a participant takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientRole {
    /// Publishes its own gaze
    pub source: bool,
    /// Receives and renders others' gaze
    pub sink: bool,
}

impl ClientRole {
    pub const NONE: ClientRole = ClientRole {
        source: false,
        sink: false,
    };
    pub const SOURCE: ClientRole = ClientRole {
        source: true,
        sink: false,
    };
    pub const SINK: ClientRole = ClientRole {
        source: false,
        sink: true,
    };
    pub const BOTH: ClientRole = ClientRole {
        source: true,
        sink: true,
    };

    /// Parse a role from a comma-separated string (`source`, `sink`, `both`, `all`).
    pub fn from_csv(s: &str) -> Self {
        let parts: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let any = |names: &[&str]| parts.iter().any(|p| names.contains(&p.as_str()));

        Self {
            source: any(&["source", "both", "all"]),
            sink: any(&["sink", "both", "all"]),
        }
    }

    pub fn includes_source(self) -> bool {
        self.source
    }

    pub fn includes_sink(self) -> bool {
        self.sink
    }

    pub fn is_empty(self) -> bool {
        !self.source && !self.sink
    }
}

impl BitOr for ClientRole {
    type Output = ClientRole;

    fn bitor(self, rhs: ClientRole) -> ClientRole {
        ClientRole {
            source: self.source || rhs.source,
            sink: self.sink || rhs.sink,
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.source, self.sink) {
            (true, true) => write!(f, "source,sink"),
            (true, false) => write!(f, "source"),
            (false, true) => write!(f, "sink"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// Relay-assigned identity of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 2D screen location.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The unit published per filtered gaze point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeEvent {
    pub location: Location,
}

impl GazeEvent {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            location: Location::new(x, y),
        }
    }
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        role: ClientRole,
        name: String,
        version: String,
    },
    Gaze {
        x: f64,
        y: f64,
    },
}

/// Messages the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Welcome {
        id: ConnectionId,
    },
    Gaze {
        from: ConnectionId,
        x: f64,
        y: f64,
    },
    PeerLeft {
        id: ConnectionId,
    },
}

impl From<GazeEvent> for ClientMessage {
    fn from(event: GazeEvent) -> Self {
        ClientMessage::Gaze {
            x: event.location.x,
            y: event.location.y,
        }
    }
}

/// Serialize a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (without its terminator).
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

/// One newline-delimited frame read off a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line longer than [`MAX_LINE_BYTES`]; its bytes were discarded unread.
    Oversized,
}

/// Newline framing that never buffers more than [`MAX_LINE_BYTES`] per line.
///
/// An oversized line is reported as [`Frame::Oversized`] and skipped up to its
/// terminator; the stream stays usable.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        into_frame(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        into_frame(self.inner.decode_eof(src))
    }
}

fn into_frame(
    decoded: Result<Option<String>, LinesCodecError>,
) -> Result<Option<Frame>, io::Error> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
        Err(LinesCodecError::Io(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_line_is_skipped_without_buffering() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        // No terminator yet: the codec gives up once the cap is passed.
        buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 10]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Oversized));

        // More of the same line is discarded as it arrives.
        buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES * 4]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.len() <= MAX_LINE_BYTES + 1);

        buf.extend_from_slice(b"xx\n{\"type\":\"gaze\",\"x\":1.0,\"y\":2.0}\n");
        let frame = codec.decode(&mut buf).unwrap();
        let Some(Frame::Line(line)) = frame else {
            panic!("expected the next line, got {frame:?}");
        };
        assert_eq!(
            decode_line::<ClientMessage>(&line).unwrap(),
            ClientMessage::Gaze { x: 1.0, y: 2.0 }
        );
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(ClientRole::from_csv("source"), ClientRole::SOURCE);
        assert_eq!(ClientRole::from_csv("Sink"), ClientRole::SINK);
        assert_eq!(ClientRole::from_csv("source, sink"), ClientRole::BOTH);
        assert_eq!(ClientRole::from_csv("all"), ClientRole::BOTH);
        assert!(ClientRole::from_csv("observer").is_empty());
    }

    #[test]
    fn test_role_flags_combine() {
        let role = ClientRole::SOURCE | ClientRole::SINK;
        assert_eq!(role, ClientRole::BOTH);
        assert!(role.includes_source() && role.includes_sink());
        assert!(!ClientRole::SINK.includes_source());
        assert_eq!(ClientRole::SINK | ClientRole::NONE, ClientRole::SINK);
        assert_eq!(role.to_string(), "source,sink");
    }

    #[test]
    fn test_gaze_wire_shape() {
        let line = encode_line(&ClientMessage::from(GazeEvent::new(120.5, 340.2))).unwrap();
        assert_eq!(line, "{\"type\":\"gaze\",\"x\":120.5,\"y\":340.2}\n");

        let relayed: RelayMessage =
            decode_line("{\"type\":\"gaze\",\"from\":\"B\",\"x\":120.5,\"y\":340.2}\r\n").unwrap();
        assert_eq!(
            relayed,
            RelayMessage::Gaze {
                from: ConnectionId::new("B"),
                x: 120.5,
                y: 340.2,
            }
        );
    }

    #[test]
    fn test_floats_survive_the_wire_exactly() {
        let awkward = [0.1 + 0.2, 1.0 / 3.0, 1e-300, 1919.999_999_999_999_8, -0.0];
        for value in awkward {
            let line = encode_line(&ClientMessage::Gaze { x: value, y: -value }).unwrap();
            match decode_line::<ClientMessage>(&line).unwrap() {
                ClientMessage::Gaze { x, y } => {
                    assert_eq!(x.to_bits(), value.to_bits());
                    assert_eq!(y.to_bits(), (-value).to_bits());
                }
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_or_malformed_lines_fail_to_decode() {
        assert!(decode_line::<RelayMessage>("not json").is_err());
        assert!(decode_line::<RelayMessage>("{\"type\":\"shrug\"}").is_err());
        assert!(decode_line::<RelayMessage>("{\"type\":\"gaze\",\"x\":1.0}").is_err());
    }
}
