//! Codec for encoding and decoding Convoy frames.
//!
//! Binary clients use MessagePack with length-prefixed framing. Browser
//! clients that speak text frames use plain JSON, one frame per message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes of the big-endian `u32` header that precedes each MessagePack payload.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors raised while putting frames on or taking them off the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Frame of {0} bytes is over the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),

    /// The buffer ends before the frame does.
    #[error("Truncated frame: {0} more bytes expected")]
    Incomplete(usize),

    #[error("MessagePack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Text frames only.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed frame: {0}")]
    Invalid(String),
}

/// Reads the length header at the start of `data`.
///
/// `None` means the header itself has not fully arrived.
fn payload_len(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(header) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(header);

    match u32::from_be_bytes(prefix) as usize {
        len if len > MAX_FRAME_SIZE => Err(ProtocolError::FrameTooLarge(len)),
        len => Ok(Some(len)),
    }
}

/// Encode a frame as a length-prefixed MessagePack message.
///
/// # Errors
///
/// Fails if serialization fails or the payload is over [`MAX_FRAME_SIZE`].
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut out = BytesMut::new();
    encode_into(frame, &mut out)?;
    Ok(out.freeze())
}

/// Append a length-prefixed frame to `out`.
///
/// # Errors
///
/// Fails if serialization fails or the payload is over [`MAX_FRAME_SIZE`].
pub fn encode_into(frame: &Frame, out: &mut BytesMut) -> Result<(), ProtocolError> {
    let body = rmp_serde::to_vec_named(frame)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_SIZE)
        .ok_or(ProtocolError::FrameTooLarge(body.len()))?;

    out.reserve(LENGTH_PREFIX_SIZE + body.len());
    out.put_u32(len);
    out.put_slice(&body);
    Ok(())
}

/// Decode exactly one frame from the start of `data`.
///
/// # Errors
///
/// Fails with [`ProtocolError::Incomplete`] if `data` is shorter than the
/// frame it announces, or if the payload is oversized or not a frame.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let len = payload_len(data)?
        .ok_or(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE.saturating_sub(data.len())))?;
    let end = LENGTH_PREFIX_SIZE + len;
    let body = data
        .get(LENGTH_PREFIX_SIZE..end)
        .ok_or(ProtocolError::Incomplete(end - data.len()))?;
    Ok(rmp_serde::from_slice(body)?)
}

/// Take the next complete frame off a streaming buffer.
///
/// Leaves the buffer untouched and returns `Ok(None)` until a whole frame
/// has been received.
///
/// # Errors
///
/// Fails if the announced length is oversized or the payload is not a frame.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(len) = payload_len(buf)? else {
        return Ok(None);
    };
    if buf.len() < LENGTH_PREFIX_SIZE + len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(len);
    Ok(Some(rmp_serde::from_slice(&body)?))
}

/// Encode a frame as a JSON text message.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a frame from a JSON text message.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid frame.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Wire encoding negotiated with a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Length-prefixed MessagePack in binary messages.
    #[default]
    MessagePack,
    /// JSON in text messages.
    Json,
}

/// An encoded frame ready to be written to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Binary(Bytes),
    Text(String),
}

/// Per-connection codec that remembers the client's encoding.
#[derive(Debug, Default)]
pub struct FrameCodec {
    encoding: Encoding,
}

impl FrameCodec {
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// The encoding outbound frames are written in.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Switch the outbound encoding, typically to mirror what the client sent.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    /// Encode a frame in the current encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Encoded, ProtocolError> {
        match self.encoding {
            Encoding::MessagePack => encode(frame).map(Encoded::Binary),
            Encoding::Json => encode_json(frame).map(Encoded::Text),
        }
    }

    /// Try to decode a binary frame from a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is invalid.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        decode_from(buf)
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is invalid.
    pub fn decode_text(&self, text: &str) -> Result<Frame, ProtocolError> {
        decode_json(text)
    }
}
