//! Newline-delimited JSON framing for bus events.
//!
//! One frame is one compact JSON object followed by `\n`. [`EventCodec`]
//! plugs into `tokio_util::codec::{FramedRead, FramedWrite}`; its decoder
//! yields `Result<Event, DecodeError>` items so that a bad frame surfaces
//! as a per-item error while the stream keeps going. Only socket I/O
//! failures end the stream.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::{DecodeError, Error};
use crate::event::Event;

/// Longest accepted frame, newline excluded.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

// ── Pure helpers ─────────────────────────────────────────────────────

/// Serialize one event to a complete frame (trailing newline included).
pub fn encode(event: &Event) -> Result<Vec<u8>, Error> {
    let mut buf = serde_json::to_vec(event).map_err(Error::Encode)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Decode one frame. A trailing `\n` or `\r\n` is tolerated.
pub fn decode(frame: &[u8]) -> Result<Event, DecodeError> {
    let text = std::str::from_utf8(frame).map_err(|_| DecodeError::InvalidUtf8)?;
    let text = text.strip_suffix('\n').unwrap_or(text);
    let text = text.strip_suffix('\r').unwrap_or(text);
    Ok(serde_json::from_str(text)?)
}

// ── EventCodec ───────────────────────────────────────────────────────

/// Stream codec over [`LinesCodec`].
///
/// Oversized lines are discarded up to the next newline by the inner
/// codec, so framing resynchronizes on its own. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct EventCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl EventCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn lift(
        &self,
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Result<Event, DecodeError>>, Error> {
        match result {
            Ok(Some(line)) => Ok(Some(serde_json::from_str(&line).map_err(DecodeError::from))),
            Ok(None) => Ok(None),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(DecodeError::FrameTooLong {
                max: self.max_length,
            }))),
            // LinesCodec reports bad UTF-8 as InvalidData after consuming the line.
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Err(DecodeError::InvalidUtf8)))
            }
            Err(LinesCodecError::Io(e)) => Err(Error::Io(e)),
        }
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventCodec {
    type Item = Result<Event, DecodeError>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode(src);
            if matches!(&line, Ok(Some(l)) if l.trim().is_empty()) {
                continue;
            }
            return self.lift(line);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode_eof(src);
            if matches!(&line, Ok(Some(l)) if l.trim().is_empty()) {
                continue;
            }
            return self.lift(line);
        }
    }
}

impl Encoder<Event> for EventCodec {
    type Error = Error;

    fn encode(&mut self, item: Event, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(Error::Encode)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
