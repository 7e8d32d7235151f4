//! Record and group framing.
//!
//! Every frame starts with a fixed-width header. Group frames carry the `GRUP` tag
//! and a size that covers their own header; leaf records carry a body size that
//! does not.

use serde::Serialize;

use crate::error::CoreError;
use crate::game::HEADER_WIDTH_LONG;
use crate::reader::ByteCursor;
use crate::types::{FormId, Tag};

pub const FLAG_DELETED: u32 = 0x0000_0020;
pub const FLAG_COMPRESSED: u32 = 0x0004_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordHeader {
    pub tag: Tag,
    pub body_size: u32,
    pub flags: u32,
    pub form_id: FormId,
    pub version_control: u32,
    /// Trailing word of long headers (form version + unknown); zero for short headers.
    pub extra: u32,
}

impl RecordHeader {
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupType {
    TopLevel,
    WorldChildren,
    InteriorCellBlock,
    InteriorCellSubBlock,
    ExteriorCellBlock,
    ExteriorCellSubBlock,
    CellChildren,
    TopicChildren,
    CellPersistentChildren,
    CellTemporaryChildren,
    CellVisibleDistantChildren,
    Other(i32),
}

impl GroupType {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::TopLevel,
            1 => Self::WorldChildren,
            2 => Self::InteriorCellBlock,
            3 => Self::InteriorCellSubBlock,
            4 => Self::ExteriorCellBlock,
            5 => Self::ExteriorCellSubBlock,
            6 => Self::CellChildren,
            7 => Self::TopicChildren,
            8 => Self::CellPersistentChildren,
            9 => Self::CellTemporaryChildren,
            10 => Self::CellVisibleDistantChildren,
            other => Self::Other(other),
        }
    }

    pub fn is_cell_children(&self) -> bool {
        matches!(
            self,
            Self::CellChildren
                | Self::CellPersistentChildren
                | Self::CellTemporaryChildren
                | Self::CellVisibleDistantChildren
        )
    }
}

/// A group label, interpreted once according to the group type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupLabel {
    /// Record type held by a top-level group.
    Top(Tag),
    World(FormId),
    Cell(FormId),
    Topic(FormId),
    Block(i32),
    Grid { x: i16, y: i16 },
    Raw([u8; 4]),
}

impl GroupLabel {
    pub fn decode(group_type: GroupType, raw: [u8; 4]) -> Self {
        match group_type {
            GroupType::TopLevel => Self::Top(Tag(raw)),
            GroupType::WorldChildren => Self::World(FormId(u32::from_le_bytes(raw))),
            GroupType::InteriorCellBlock | GroupType::InteriorCellSubBlock => {
                Self::Block(i32::from_le_bytes(raw))
            }
            GroupType::ExteriorCellBlock | GroupType::ExteriorCellSubBlock => Self::Grid {
                y: i16::from_le_bytes([raw[0], raw[1]]),
                x: i16::from_le_bytes([raw[2], raw[3]]),
            },
            GroupType::CellChildren
            | GroupType::CellPersistentChildren
            | GroupType::CellTemporaryChildren
            | GroupType::CellVisibleDistantChildren => Self::Cell(FormId(u32::from_le_bytes(raw))),
            GroupType::TopicChildren => Self::Topic(FormId(u32::from_le_bytes(raw))),
            GroupType::Other(_) => Self::Raw(raw),
        }
    }

    pub fn top_tag(&self) -> Option<Tag> {
        match *self {
            Self::Top(tag) => Some(tag),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupHeader {
    /// Includes the group header itself.
    pub group_size: u32,
    pub label: GroupLabel,
    pub group_type: GroupType,
    pub stamp: u32,
    pub extra: u32,
}

impl GroupHeader {
    /// Top-level groups other than worlds and cells hold nothing the detectors need.
    pub fn is_opaque_top_level(&self) -> bool {
        match self.label {
            GroupLabel::Top(tag) => tag != Tag::CELL && tag != Tag::WRLD,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Header {
    Group(GroupHeader),
    Record(RecordHeader),
}

impl Header {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Group(_) => Tag::GRUP,
            Self::Record(record) => record.tag,
        }
    }

    /// Absolute end of the frame whose header started at `start`.
    pub fn frame_end(&self, start: u64, header_width: u64) -> Result<u64, CoreError> {
        match self {
            Self::Group(group) => {
                let size = u64::from(group.group_size);
                if size < header_width {
                    return Err(CoreError::malformed(format!(
                        "group at offset {start} declares size {size}, smaller than its {header_width}-byte header"
                    )));
                }
                Ok(start + size)
            }
            Self::Record(record) => Ok(start + header_width + u64::from(record.body_size)),
        }
    }
}

/// Reads one frame header of `header_width` bytes.
pub fn decode_header<C: ByteCursor + ?Sized>(
    cursor: &mut C,
    header_width: u64,
) -> Result<Header, CoreError> {
    let mut raw = [0u8; HEADER_WIDTH_LONG as usize];
    let width = usize::try_from(header_width)
        .ok()
        .filter(|&w| w == 20 || w == 24)
        .ok_or_else(|| CoreError::malformed(format!("unsupported header width {header_width}")))?;
    cursor.read_into(&mut raw[..width])?;

    let tag = Tag([raw[0], raw[1], raw[2], raw[3]]);
    let size = u32_at(&raw, 4);
    let word2 = [raw[8], raw[9], raw[10], raw[11]];
    let word3 = u32_at(&raw, 12);
    let word4 = u32_at(&raw, 16);
    let extra = u32_at(&raw, 20);

    if tag == Tag::GRUP {
        let group_type = GroupType::from_raw(word3 as i32);
        return Ok(Header::Group(GroupHeader {
            group_size: size,
            label: GroupLabel::decode(group_type, word2),
            group_type,
            stamp: word4,
            extra,
        }));
    }

    Ok(Header::Record(RecordHeader {
        tag,
        body_size: size,
        flags: u32::from_le_bytes(word2),
        form_id: FormId(word3),
        version_control: word4,
        extra,
    }))
}

fn u32_at(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{GroupLabel, GroupType, Header, decode_header};
    use crate::reader::{ByteCursor, LittleEndianReader};
    use crate::types::{FormId, Tag};

    fn frame(tag: &[u8; 4], size: u32, word2: [u8; 4], word3: u32, word4: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(tag);
        bytes.extend_from_slice(&size.to_le_bytes());
        bytes.extend_from_slice(&word2);
        bytes.extend_from_slice(&word3.to_le_bytes());
        bytes.extend_from_slice(&word4.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes
    }

    #[test]
    fn decodes_leaf_record() {
        let bytes = frame(b"REFR", 0, 0x20u32.to_le_bytes(), 0x30, 7);
        let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
        let Header::Record(record) = decode_header(&mut r, 24).unwrap() else {
            panic!("expected a record header");
        };
        assert_eq!(record.tag, Tag::REFR);
        assert_eq!(record.body_size, 0);
        assert!(record.is_deleted());
        assert!(!record.is_compressed());
        assert_eq!(record.form_id, FormId(0x30));
        assert!(r.at_end().unwrap());
    }

    #[test]
    fn decodes_group_labels_by_type() {
        let bytes = frame(b"GRUP", 24, 0x10u32.to_le_bytes(), 1, 0);
        let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
        let Header::Group(group) = decode_header(&mut r, 24).unwrap() else {
            panic!("expected a group header");
        };
        assert_eq!(group.group_type, GroupType::WorldChildren);
        assert_eq!(group.label, GroupLabel::World(FormId(0x10)));

        let mut grid = Vec::new();
        grid.extend_from_slice(&(-3i16).to_le_bytes());
        grid.extend_from_slice(&5i16.to_le_bytes());
        let label = GroupLabel::decode(GroupType::ExteriorCellSubBlock, grid.try_into().unwrap());
        assert_eq!(label, GroupLabel::Grid { x: 5, y: -3 });
    }

    #[test]
    fn only_world_and_cell_tops_are_tracked() {
        for (tag, opaque) in [(b"WRLD", false), (b"CELL", false), (b"NPC_", true)] {
            let bytes = frame(b"GRUP", 24, *tag, 0, 0);
            let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
            let Header::Group(group) = decode_header(&mut r, 24).unwrap() else {
                panic!("expected a group header");
            };
            assert_eq!(group.is_opaque_top_level(), opaque);
        }
    }

    #[test]
    fn short_headers_read_twenty_bytes() {
        let mut bytes = frame(b"CELL", 0, [0; 4], 0x44, 0);
        bytes.truncate(20);
        let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
        let header = decode_header(&mut r, 20).unwrap();
        assert_eq!(header.tag(), Tag::CELL);
        assert_eq!(header.frame_end(0, 20).unwrap(), 20);
    }

    #[test]
    fn undersized_group_is_malformed() {
        let bytes = frame(b"GRUP", 10, *b"CELL", 0, 0);
        let mut r = LittleEndianReader::new(Cursor::new(bytes)).unwrap();
        let header = decode_header(&mut r, 24).unwrap();
        assert!(header.frame_end(0, 24).is_err());
    }
}
