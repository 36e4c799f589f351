//! Length-prefixed framing for TCP messages.
//!
//! Wire format: `[u32 length (big-endian)][UTF-8 JSON text]`. One JSON object
//! per frame; the codec decides what the text means.

use std::io::{self, Read, Write};

/// Frames above this size are refused in both directions.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Write one text frame to a stream.
pub fn write_frame<W: Write>(writer: &mut W, text: &str) -> io::Result<()> {
    let payload = text.as_bytes();
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", payload.len()),
        ));
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;

    Ok(())
}

/// Read one text frame from a stream.
///
/// Invalid UTF-8 is reported as `InvalidData`; the caller decides whether
/// that ends the connection.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    String::from_utf8(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
