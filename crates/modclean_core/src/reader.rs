use std::io::{self, Read, Seek, SeekFrom};

use crate::types::Tag;

/// Seekable little-endian reader over a plugin stream.
///
/// Implemented by [`LittleEndianReader`] for files and in-memory buffers alike, so
/// record decoding never needs to know whether it is looking at a file or at an
/// inflated record body.
pub trait ByteCursor {
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()>;

    fn tell(&mut self) -> io::Result<u64>;

    fn seek_to(&mut self, pos: u64) -> io::Result<()>;

    /// Total length of the underlying stream.
    fn stream_len(&self) -> u64;

    fn at_end(&mut self) -> io::Result<bool> {
        Ok(self.tell()? >= self.stream_len())
    }

    fn remaining(&mut self) -> io::Result<u64> {
        Ok(self.stream_len().saturating_sub(self.tell()?))
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> io::Result<f32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn read_tag(&mut self) -> io::Result<Tag> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(Tag(buf))
    }

    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Reads `n` bytes and decodes them up to the first NUL.
    fn read_fixed_string(&mut self, n: usize) -> io::Result<String> {
        let bytes = self.read_bytes(n)?;
        Ok(decode_zstring(&bytes))
    }

    /// Moves forward `n` bytes. Fails instead of seeking past the end of the stream.
    fn skip(&mut self, n: u64) -> io::Result<()> {
        let pos = self.tell()?;
        let target = pos.checked_add(n).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "skip target overflows u64")
        })?;
        if target > self.stream_len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "cannot skip {n} bytes at offset {pos}: stream is {} bytes",
                    self.stream_len()
                ),
            ));
        }
        self.seek_to(target)
    }
}

pub struct LittleEndianReader<R> {
    inner: R,
    pos: u64,
    len: u64,
}

impl<R: Read + Seek> LittleEndianReader<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let pos = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(pos))?;
        Ok(Self { inner, pos, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<R: Read + Seek> ByteCursor for LittleEndianReader<R> {
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if let Err(e) = self.inner.read_exact(buf) {
            self.pos = self.inner.stream_position()?;
            return Err(e);
        }
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn tell(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }

    // `pos` mirrors the inner stream position; seeking to it is a no-op.
    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        if pos != self.pos {
            self.inner.seek(SeekFrom::Start(pos))?;
            self.pos = pos;
        }
        Ok(())
    }

    fn stream_len(&self) -> u64 {
        self.len
    }
}

pub(crate) fn decode_zstring(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
