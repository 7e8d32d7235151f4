//! The `TES4` record every plugin starts with.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Serialize;

use crate::compressed::RecordBody;
use crate::error::CoreError;
use crate::game::{Game, PluginFormat};
use crate::reader::{ByteCursor, LittleEndianReader};
use crate::record::{Header, decode_header};
use crate::subrecord::next_subrecord;
use crate::types::Tag;

pub const FLAG_MASTER: u32 = 0x0000_0001;
pub const FLAG_LIGHT: u32 = 0x0000_0200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginHeader {
    pub signature: Tag,
    pub flags: u32,
    pub is_master: bool,
    pub is_light: bool,
    /// `HEDR` fields.
    pub version: f32,
    pub record_count: u32,
    pub next_object_id: u32,
    /// `CNAM`
    pub author: Option<String>,
    /// `SNAM`
    pub description: Option<String>,
    /// `MAST` entries in load order.
    pub masters: Vec<String>,
}

impl PluginHeader {
    /// Reads the plugin header at the cursor's position.
    ///
    /// Returns `None` and leaves the cursor untouched when the stream does not start
    /// with a `TES4` record. Otherwise the cursor ends up just past the record.
    pub fn read<C: ByteCursor + ?Sized>(
        cursor: &mut C,
        header_width: u64,
    ) -> Result<Option<Self>, CoreError> {
        let start = cursor.tell()?;
        if cursor.remaining()? < header_width {
            return Ok(None);
        }
        let record = match decode_header(cursor, header_width)? {
            Header::Record(record) if record.tag == Tag::TES4 => record,
            _ => {
                cursor.seek_to(start)?;
                return Ok(None);
            }
        };
        let record_end = start + header_width + u64::from(record.body_size);
        if record_end > cursor.stream_len() {
            return Err(CoreError::malformed(format!(
                "plugin header ends at {record_end}, past the end of the {}-byte file",
                cursor.stream_len()
            )));
        }

        let mut header = Self {
            signature: record.tag,
            flags: record.flags,
            is_master: record.flags & FLAG_MASTER != 0,
            is_light: record.flags & FLAG_LIGHT != 0,
            version: 0.0,
            record_count: 0,
            next_object_id: 0,
            author: None,
            description: None,
            masters: Vec::new(),
        };

        let mut body = RecordBody::open(&mut *cursor, &record)?;
        let end = body.end();
        while let Some(sub) = next_subrecord(&mut body, end)? {
            match sub.tag {
                Tag::HEDR if sub.size >= 12 => {
                    header.version = body.read_f32()?;
                    header.record_count = body.read_u32()?;
                    header.next_object_id = body.read_u32()?;
                }
                Tag::CNAM => header.author = Some(body.read_fixed_string(sub.size as usize)?),
                Tag::SNAM => {
                    header.description = Some(body.read_fixed_string(sub.size as usize)?)
                }
                Tag::MAST => header.masters.push(body.read_fixed_string(sub.size as usize)?),
                _ => {}
            }
            body.seek_to(sub.data_end())?;
        }
        drop(body);

        cursor.seek_to(record_end)?;
        Ok(Some(header))
    }
}

/// Opens `path` and reads its plugin header, detecting the header width unless a
/// game is given.
pub fn read_plugin_header(path: &Path, game: Option<Game>) -> Result<PluginHeader, CoreError> {
    let file = File::open(path).map_err(|e| CoreError::from(e).at_path(path))?;
    let mut cursor = LittleEndianReader::new(BufReader::new(file))
        .map_err(|e| CoreError::from(e).at_path(path))?;
    let format = PluginFormat::resolve(game, &mut cursor).map_err(|e| e.at_path(path))?;
    let header =
        PluginHeader::read(&mut cursor, format.header_width).map_err(|e| e.at_path(path))?;
    header.ok_or_else(|| {
        CoreError::malformed(format!("{}: no TES4 plugin header", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{FLAG_LIGHT, FLAG_MASTER, PluginHeader};
    use crate::reader::{ByteCursor, LittleEndianReader};
    use crate::types::Tag;

    fn sub(tag: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag);
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    fn tes4(flags: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"TES4");
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn reads_flags_hedr_and_masters() {
        let mut hedr = 1.7f32.to_le_bytes().to_vec();
        hedr.extend_from_slice(&42u32.to_le_bytes());
        hedr.extend_from_slice(&0x800u32.to_le_bytes());
        let mut body = sub(b"HEDR", &hedr);
        body.extend(sub(b"CNAM", b"Someone\0"));
        body.extend(sub(b"SNAM", b"Fixes things\0"));
        body.extend(sub(b"MAST", b"Skyrim.esm\0"));
        body.extend(sub(b"DATA", &[0u8; 8]));
        body.extend(sub(b"MAST", b"Update.esm\0"));
        body.extend(sub(b"DATA", &[0u8; 8]));
        let mut bytes = tes4(FLAG_MASTER | FLAG_LIGHT, &body);
        let header_end = bytes.len() as u64;
        bytes.extend_from_slice(b"GRUP");

        let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
        let header = PluginHeader::read(&mut r, 24).unwrap().expect("TES4 present");
        assert_eq!(header.signature, Tag::TES4);
        assert!(header.is_master);
        assert!(header.is_light);
        assert_eq!(header.version, 1.7);
        assert_eq!(header.record_count, 42);
        assert_eq!(header.next_object_id, 0x800);
        assert_eq!(header.author.as_deref(), Some("Someone"));
        assert_eq!(header.description.as_deref(), Some("Fixes things"));
        assert_eq!(header.masters, vec!["Skyrim.esm", "Update.esm"]);
        assert_eq!(r.tell().unwrap(), header_end);
    }

    #[test]
    fn streams_without_tes4_are_left_alone() {
        let mut r = LittleEndianReader::new(Cursor::new(b"GRUP\0\0\0\0".to_vec())).unwrap();
        assert!(PluginHeader::read(&mut r, 24).unwrap().is_none());

        let mut bytes = b"CELL".to_vec();
        bytes.resize(40, 0);
        let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
        assert!(PluginHeader::read(&mut r, 24).unwrap().is_none());
        assert_eq!(r.tell().unwrap(), 0);
    }

    #[test]
    fn truncated_header_record_is_malformed() {
        let mut bytes = tes4(0, &sub(b"MAST", b"Oblivion.esm\0"));
        bytes.truncate(bytes.len() - 4);
        let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
        assert!(PluginHeader::read(&mut r, 24).is_err());
    }
}
