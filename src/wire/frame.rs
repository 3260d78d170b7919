// Framing for MySQL packets: 3-byte little-endian payload length, 1-byte
// sequence number, payload.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const HEADER_LEN: usize = 4;

/// Largest payload a single frame can declare (2^24 - 1).
pub const MAX_FRAME_PAYLOAD: usize = 0xFF_FFFF;

// -----------------------------------------------------------------------------
// ----- Frame -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u8,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("stream closed before a frame arrived")]
    Closed,

    #[error("stream closed mid-frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    #[error("frame declares {declared} bytes, limit is {limit}")]
    TooLarge { declared: usize, limit: usize },

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// -----------------------------------------------------------------------------
// ----- Encoding --------------------------------------------------------------

/// Prepend the frame header to `payload`.
pub fn frame(payload: &[u8], sequence: u8) -> Result<Bytes, FramingError> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    put_frame(&mut out, payload, sequence)?;
    Ok(out.freeze())
}

/// Append one framed packet to `out`.
pub fn put_frame(out: &mut BytesMut, payload: &[u8], sequence: u8) -> Result<(), FramingError> {
    if payload.len() >= MAX_FRAME_PAYLOAD {
        return Err(FramingError::TooLarge {
            declared: payload.len(),
            limit: MAX_FRAME_PAYLOAD - 1,
        });
    }

    let len = payload.len() as u32;
    out.reserve(HEADER_LEN + payload.len());
    out.put_uint_le(len as u64, 3);
    out.put_u8(sequence);
    out.extend_from_slice(payload);
    Ok(())
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8], sequence: u8) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame(payload, sequence)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Decoding --------------------------------------------------------------

/// Split a header into `(payload_len, sequence)`.
#[inline]
pub fn parse_header(header: [u8; HEADER_LEN]) -> (usize, u8) {
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    (len, header[3])
}

/// Read exactly one frame. Never consumes bytes past the frame's payload.
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_fully(reader, &mut header).await?;
    if got == 0 {
        return Err(FramingError::Closed);
    }
    if got < HEADER_LEN {
        return Err(FramingError::Truncated {
            expected: HEADER_LEN,
            received: got,
        });
    }

    let (len, sequence) = parse_header(header);
    if len > max_payload {
        return Err(FramingError::TooLarge {
            declared: len,
            limit: max_payload,
        });
    }

    let mut payload = BytesMut::zeroed(len);
    let got = read_fully(reader, &mut payload).await?;
    if got < len {
        return Err(FramingError::Truncated {
            expected: len,
            received: got,
        });
    }

    Ok(Frame {
        sequence,
        payload: payload.freeze(),
    })
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

// Like read_exact, but reports how far it got when the peer hangs up.
async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
