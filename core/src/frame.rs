//! The application-layer wire frame.
//!
//! A frame is an ASCII-prefixed, length-delimited sequence of one or more
//! segments:
//!
//! ```text
//! tlength:<N>;type:<T1>;length:<L1>;data:<P1><type:<T2>;length:<L2>;data:<P2>…>
//! ```
//!
//! `N` is the decimal byte count of everything following `tlength:<N>;`.
//! Segments concatenate with no separator between one payload and the
//! next segment's `type:` field — the declared payload length is the sole
//! delimiter, which is why segment bodies may contain arbitrary bytes
//! (including literal `;` or `:`) without corrupting the frame.

use std::fmt;
use std::io::{self, Read};

use crate::error::{FlagRelayError, MalformedKind, Result};

/// A three-character segment tag.
///
/// The enumerated set is `{CMD, OUT, ERR, CWD, FLG, KEY}`, but the decoder
/// accepts any exactly-three-byte tag — rejecting unknown tags is a policy
/// decision for the caller, not a wire-format violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 3]);

impl Tag {
    pub const CMD: Tag = Tag(*b"CMD");
    pub const OUT: Tag = Tag(*b"OUT");
    pub const ERR: Tag = Tag(*b"ERR");
    pub const CWD: Tag = Tag(*b"CWD");
    pub const FLG: Tag = Tag(*b"FLG");
    pub const KEY: Tag = Tag(*b"KEY");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One `(tag, payload)` pair inside a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// A complete wire message: one or more ordered segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub segments: Vec<Segment>,
}

impl Frame {
    /// Build a single-segment frame.
    pub fn single(tag: Tag, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            segments: vec![Segment {
                tag,
                payload: payload.into(),
            }],
        }
    }

    /// The first segment's tag, if any.
    pub fn first_tag(&self) -> Option<Tag> {
        self.segments.first().map(|s| s.tag)
    }

    /// The first segment's payload, if any.
    pub fn first_payload(&self) -> Option<&[u8]> {
        self.segments.first().map(|s| s.payload.as_slice())
    }

    /// Encode this frame to its byte-exact wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for segment in &self.segments {
            body.extend_from_slice(b"type:");
            body.extend_from_slice(&segment.tag.0);
            body.extend_from_slice(b";length:");
            body.extend_from_slice(segment.payload.len().to_string().as_bytes());
            body.extend_from_slice(b";data:");
            body.extend_from_slice(&segment.payload);
        }

        let mut out = Vec::with_capacity(body.len() + 16);
        out.extend_from_slice(b"tlength:");
        out.extend_from_slice(body.len().to_string().as_bytes());
        out.push(b';');
        out.extend_from_slice(&body);
        out
    }

    /// Decode a frame from a buffer containing the whole `tlength:…` message.
    ///
    /// Any bytes in `buf` past the declared `tlength` are ignored, so this
    /// can be called on a buffer that also holds the start of a following
    /// frame — callers that frame directly off a socket (see
    /// [`read_frame`]) instead determine `tlength` first and only hand this
    /// function an exactly-sized body.
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        let rest = buf
            .strip_prefix(b"tlength:")
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingTlength,
            })?;
        let semi = rest
            .iter()
            .position(|&b| b == b';')
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingTlength,
            })?;
        let n: usize = std::str::from_utf8(&rest[..semi])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingTlength,
            })?;
        let body = &rest[semi + 1..];
        if body.len() < n {
            return Err(FlagRelayError::Malformed {
                kind: MalformedKind::TruncatedFrame,
            });
        }

        let segments = parse_segments(&body[..n])?;
        Ok(Frame { segments })
    }
}

/// Parse the concatenated segment body of a frame (everything after
/// `tlength:<N>;`, truncated to exactly `N` bytes).
fn parse_segments(mut body: &[u8]) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();

    while !body.is_empty() {
        body = body
            .strip_prefix(b"type:")
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingType,
            })?;

        let semi = body
            .iter()
            .position(|&b| b == b';')
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::InvalidTag,
            })?;
        if semi != 3 {
            return Err(FlagRelayError::Malformed {
                kind: MalformedKind::InvalidTag,
            });
        }
        let tag = Tag([body[0], body[1], body[2]]);
        body = &body[4..];

        body = body
            .strip_prefix(b"length:")
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingLength,
            })?;
        let semi = body
            .iter()
            .position(|&b| b == b';')
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingData,
            })?;
        let len: usize = std::str::from_utf8(&body[..semi])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingLength,
            })?;
        body = &body[semi + 1..];

        body = body
            .strip_prefix(b"data:")
            .ok_or(FlagRelayError::Malformed {
                kind: MalformedKind::MissingData,
            })?;
        if body.len() < len {
            return Err(FlagRelayError::Malformed {
                kind: MalformedKind::LengthOverrun,
            });
        }
        let payload = body[..len].to_vec();
        body = &body[len..];

        segments.push(Segment { tag, payload });
    }

    if segments.is_empty() {
        return Err(FlagRelayError::Malformed {
            kind: MalformedKind::MissingType,
        });
    }

    Ok(segments)
}

/// Read one frame directly off a blocking byte stream.
///
/// Reads the `tlength:<N>;` prefix byte-by-byte (it is short and
/// unbounded only by a malicious peer, so a read-one-at-a-time loop is
/// simplest and matches the per-frame, not per-byte, cost budget of the
/// handler loop), then reads exactly `N` more bytes and parses them as
/// the segment body.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header = Vec::with_capacity(16);
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(FlagRelayError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading frame header",
                )));
            }
            Ok(_) => {
                header.push(byte[0]);
                if byte[0] == b';' {
                    break;
                }
                if header.len() > 32 {
                    return Err(FlagRelayError::Malformed {
                        kind: MalformedKind::MissingTlength,
                    });
                }
            }
            Err(e) => return Err(FlagRelayError::Io(e)),
        }
    }

    let header_str = std::str::from_utf8(&header).map_err(|_| FlagRelayError::Malformed {
        kind: MalformedKind::MissingTlength,
    })?;
    let n: usize = header_str
        .strip_prefix("tlength:")
        .and_then(|s| s.strip_suffix(';'))
        .and_then(|s| s.parse().ok())
        .ok_or(FlagRelayError::Malformed {
            kind: MalformedKind::MissingTlength,
        })?;

    let mut body = vec![0u8; n];
    reader.read_exact(&mut body)?;

    let segments = parse_segments(&body)?;
    Ok(Frame { segments })
}

/// Read one frame off a stream that has a read timeout set, treating a
/// timeout that lands before any header byte has arrived as "nothing to
/// report this tick" rather than an error.
///
/// A timeout that lands partway through a header or body is a genuine
/// transport fault and propagates as `Err` — once a frame has started
/// arriving it is expected to complete quickly, so a stall there is
/// treated the same as a dropped connection.
pub fn try_read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = Vec::with_capacity(16);
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(FlagRelayError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading frame header",
                )));
            }
            Ok(_) => {
                header.push(byte[0]);
                if byte[0] == b';' {
                    break;
                }
                if header.len() > 32 {
                    return Err(FlagRelayError::Malformed {
                        kind: MalformedKind::MissingTlength,
                    });
                }
            }
            Err(e) if is_timeout(&e) && header.is_empty() => return Ok(None),
            Err(e) => return Err(FlagRelayError::Io(e)),
        }
    }

    let header_str = std::str::from_utf8(&header).map_err(|_| FlagRelayError::Malformed {
        kind: MalformedKind::MissingTlength,
    })?;
    let n: usize = header_str
        .strip_prefix("tlength:")
        .and_then(|s| s.strip_suffix(';'))
        .and_then(|s| s.parse().ok())
        .ok_or(FlagRelayError::Malformed {
            kind: MalformedKind::MissingTlength,
        })?;

    let mut body = vec![0u8; n];
    reader.read_exact(&mut body)?;

    let segments = parse_segments(&body)?;
    Ok(Some(Frame { segments }))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_segment() {
        for tag in [Tag::CMD, Tag::OUT, Tag::ERR, Tag::CWD, Tag::FLG, Tag::KEY] {
            for len in [0usize, 1, 250, 4000] {
                let payload = vec![b'x'; len];
                let frame = Frame::single(tag, payload.clone());
                let encoded = frame.encode();
                let decoded = Frame::decode(&encoded).unwrap();
                assert_eq!(decoded.segments.len(), 1);
                assert_eq!(decoded.segments[0].tag, tag);
                assert_eq!(decoded.segments[0].payload, payload);
            }
        }
    }

    #[test]
    fn multi_segment_preserves_order() {
        let frame = Frame {
            segments: vec![
                Segment {
                    tag: Tag::OUT,
                    payload: b"hello".to_vec(),
                },
                Segment {
                    tag: Tag::CWD,
                    payload: b"/tmp".to_vec(),
                },
            ],
        };
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.segments.len(), 2);
        assert_eq!(decoded.segments[0].tag, Tag::OUT);
        assert_eq!(decoded.segments[0].payload, b"hello");
        assert_eq!(decoded.segments[1].tag, Tag::CWD);
        assert_eq!(decoded.segments[1].payload, b"/tmp");
    }

    #[test]
    fn segment_payload_may_contain_delimiters() {
        let payload = b"a;b:c;data:nested".to_vec();
        let frame = Frame::single(Tag::CMD, payload.clone());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.segments[0].payload, payload);
    }

    #[test]
    fn segment_length_exceeding_payload_is_malformed() {
        // Segment declares length 3 but only 2 payload bytes ("ls") follow.
        let body = b"type:CMD;length:3;data:ls";
        let manual = format!("tlength:{};", body.len()).into_bytes();
        let manual = [manual, body.to_vec()].concat();
        let err = Frame::decode(&manual).unwrap_err();
        assert!(matches!(
            err,
            FlagRelayError::Malformed {
                kind: MalformedKind::LengthOverrun
            }
        ));
    }

    #[test]
    fn missing_type_field_is_malformed() {
        let bytes = b"tlength:10;nope:CMD;length:2;data:ls".to_vec();
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            FlagRelayError::Malformed {
                kind: MalformedKind::MissingType
            }
        ));
    }

    #[test]
    fn short_tag_is_malformed() {
        let bytes = b"tlength:20;type:AB;length:2;data:ls".to_vec();
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            FlagRelayError::Malformed {
                kind: MalformedKind::InvalidTag
            }
        ));
    }

    #[test]
    fn declared_tlength_larger_than_buffer_is_truncated() {
        let bytes = b"tlength:999;type:CMD;length:2;data:ls".to_vec();
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            FlagRelayError::Malformed {
                kind: MalformedKind::TruncatedFrame
            }
        ));
    }

    #[test]
    fn read_frame_from_stream() {
        let frame = Frame::single(Tag::FLG, b"FLG_DIR".to_vec());
        let encoded = frame.encode();
        let mut cursor = std::io::Cursor::new(encoded);
        let decoded = read_frame(&mut cursor).unwrap();
        assert_eq!(decoded.first_tag(), Some(Tag::FLG));
        assert_eq!(decoded.first_payload(), Some(&b"FLG_DIR"[..]));
    }

    #[test]
    fn cmd_at_exactly_250_bytes_round_trips() {
        let payload = vec![b'a'; 250];
        let frame = Frame::single(Tag::CMD, payload.clone());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.segments[0].payload.len(), 250);
    }

    #[test]
    fn try_read_frame_returns_the_frame_when_whole() {
        let frame = Frame::single(Tag::FLG, b"FLG_DIR".to_vec());
        let mut cursor = std::io::Cursor::new(frame.encode());
        let decoded = try_read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded.first_tag(), Some(Tag::FLG));
    }

    struct OneShotTimeout {
        fired: bool,
    }

    impl Read for OneShotTimeout {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            if self.fired {
                Ok(0)
            } else {
                self.fired = true;
                Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"))
            }
        }
    }

    #[test]
    fn try_read_frame_reports_no_frame_on_idle_timeout() {
        let mut stream = OneShotTimeout { fired: false };
        assert!(try_read_frame(&mut stream).unwrap().is_none());
    }
}
