use std::io::{self, Cursor, Read};

use flate2::read::ZlibDecoder;

use crate::error::{CoreError, CoreErrorCode};
use crate::reader::{ByteCursor, LittleEndianReader};
use crate::record::RecordHeader;

/// A record body presented as a cursor, inflated first when the record is compressed.
///
/// `end()` is the offset at which the body stops in this cursor's coordinates, so
/// subrecord walking is identical either way.
pub enum RecordBody<'a, C: ByteCursor + ?Sized> {
    Stream { cursor: &'a mut C, end: u64 },
    Inflated(LittleEndianReader<Cursor<Vec<u8>>>),
}

impl<'a, C: ByteCursor + ?Sized> RecordBody<'a, C> {
    /// Opens the body of `header`, whose header bytes the cursor has just consumed.
    pub fn open(cursor: &'a mut C, header: &RecordHeader) -> Result<Self, CoreError> {
        let start = cursor.tell()?;
        if !header.is_compressed() {
            return Ok(Self::Stream {
                cursor,
                end: start + u64::from(header.body_size),
            });
        }

        if header.body_size < 4 {
            return Err(CoreError::malformed(format!(
                "compressed {} record {} at offset {start} is only {} bytes",
                header.tag, header.form_id, header.body_size
            )));
        }
        let declared = cursor.read_u32()?;
        let packed = cursor.read_bytes((header.body_size - 4) as usize)?;
        let inflated = inflate(&packed, declared as usize).map_err(|e| {
            e.context(format!(
                "{} record {} at offset {start}",
                header.tag, header.form_id
            ))
        })?;
        Ok(Self::Inflated(LittleEndianReader::new(Cursor::new(
            inflated,
        ))?))
    }

    pub fn end(&self) -> u64 {
        match self {
            Self::Stream { end, .. } => *end,
            Self::Inflated(reader) => reader.len(),
        }
    }

    pub fn is_inflated(&self) -> bool {
        matches!(self, Self::Inflated(_))
    }
}

impl<C: ByteCursor + ?Sized> ByteCursor for RecordBody<'_, C> {
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Self::Stream { cursor, .. } => cursor.read_into(buf),
            Self::Inflated(reader) => reader.read_into(buf),
        }
    }

    fn tell(&mut self) -> io::Result<u64> {
        match self {
            Self::Stream { cursor, .. } => cursor.tell(),
            Self::Inflated(reader) => reader.tell(),
        }
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        match self {
            Self::Stream { cursor, .. } => cursor.seek_to(pos),
            Self::Inflated(reader) => reader.seek_to(pos),
        }
    }

    fn stream_len(&self) -> u64 {
        match self {
            Self::Stream { cursor, .. } => cursor.stream_len(),
            Self::Inflated(reader) => reader.stream_len(),
        }
    }
}

/// Upper bound on the buffer reserved up front, as a multiple of the packed size.
const MAX_PRESIZE_RATIO: usize = 16;

/// Inflates a zlib stream and insists on the declared length.
///
/// Never inflates more than one byte past `expected_len`, whatever the stream holds.
pub fn inflate(packed: &[u8], expected_len: usize) -> Result<Vec<u8>, CoreError> {
    let limit = expected_len as u64 + 1;
    let mut decoder = ZlibDecoder::new(packed).take(limit);
    let presize = expected_len.min(packed.len().saturating_mul(MAX_PRESIZE_RATIO));
    let mut out = Vec::with_capacity(presize);
    decoder.read_to_end(&mut out).map_err(|e| {
        CoreError::new(
            CoreErrorCode::Decompression,
            format!("zlib decode failed: {e}"),
        )
    })?;
    if out.len() != expected_len {
        return Err(CoreError::new(
            CoreErrorCode::Decompression,
            format!(
                "decompressed size mismatch: expected {}, got {}",
                expected_len,
                out.len()
            ),
        ));
    }
    Ok(out)
}
