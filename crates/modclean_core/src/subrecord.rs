use crate::error::CoreError;
use crate::reader::ByteCursor;
use crate::types::Tag;

pub const SUBRECORD_HEADER_WIDTH: u64 = 6;

/// Size of the fixed-layout prefix of a `XCLL` cell-lighting subrecord shared by
/// every game; later games append fields after it.
pub const XCLL_WIDTH: usize = 36;
const XCLL_NEAR_OFFSET: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubrecordHeader {
    pub tag: Tag,
    pub size: u32,
    /// Offset of the first header byte (of the `XXXX` prefix, when there is one).
    pub header_start: u64,
    pub data_start: u64,
}

impl SubrecordHeader {
    pub fn data_end(&self) -> u64 {
        self.data_start + u64::from(self.size)
    }
}

/// Reads the next subrecord header, or `None` once `end` is reached.
///
/// An `XXXX` subrecord carries the real size of the one that follows it.
pub fn next_subrecord<C: ByteCursor + ?Sized>(
    cursor: &mut C,
    end: u64,
) -> Result<Option<SubrecordHeader>, CoreError> {
    let header_start = cursor.tell()?;
    if header_start >= end {
        return Ok(None);
    }

    let (mut tag, mut size) = read_pair(cursor, header_start, end)?;
    if tag == Tag::XXXX {
        if size != 4 {
            return Err(CoreError::malformed(format!(
                "XXXX subrecord at offset {header_start} has size {size}, expected 4"
            )));
        }
        let real_size = cursor.read_u32()?;
        let next_start = cursor.tell()?;
        let (next_tag, _ignored) = read_pair(cursor, next_start, end)?;
        tag = next_tag;
        size = real_size;
    }

    let data_start = cursor.tell()?;
    let header = SubrecordHeader {
        tag,
        size,
        header_start,
        data_start,
    };
    if header.data_end() > end {
        return Err(CoreError::malformed(format!(
            "subrecord {tag} at offset {header_start} overruns its record: ends at {}, record ends at {end}",
            header.data_end()
        )));
    }
    Ok(Some(header))
}

fn read_pair<C: ByteCursor + ?Sized>(
    cursor: &mut C,
    start: u64,
    end: u64,
) -> Result<(Tag, u32), CoreError> {
    if end - start < SUBRECORD_HEADER_WIDTH {
        return Err(CoreError::malformed(format!(
            "truncated subrecord header at offset {start}: {} bytes left in record",
            end - start
        )));
    }
    let tag = cursor.read_tag()?;
    let size = u32::from(cursor.read_u16()?);
    Ok((tag, size))
}

/// Fields read from a record body for human-readable reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordLabels {
    pub editor_id: String,
    pub grid: Option<(i32, i32)>,
}

/// Walks every subrecord in `[tell, end)` and collects the editor id and cell grid.
pub fn read_labels<C: ByteCursor + ?Sized>(
    cursor: &mut C,
    end: u64,
) -> Result<RecordLabels, CoreError> {
    let mut labels = RecordLabels::default();
    while let Some(sub) = next_subrecord(cursor, end)? {
        match sub.tag {
            Tag::EDID => {
                labels.editor_id = cursor.read_fixed_string(sub.size as usize)?;
            }
            Tag::XCLC if sub.size >= 8 => {
                let x = cursor.read_i32()?;
                let y = cursor.read_i32()?;
                labels.grid = Some((x, y));
            }
            _ => {}
        }
        cursor.seek_to(sub.data_end())?;
    }
    Ok(labels)
}

/// Reads only the editor id, stopping at the first `EDID`.
pub fn read_editor_id<C: ByteCursor + ?Sized>(
    cursor: &mut C,
    end: u64,
) -> Result<String, CoreError> {
    while let Some(sub) = next_subrecord(cursor, end)? {
        if sub.tag == Tag::EDID {
            return Ok(cursor.read_fixed_string(sub.size as usize)?);
        }
        cursor.seek_to(sub.data_end())?;
    }
    Ok(String::new())
}

/// Leading fields of a cell's `XCLL` lighting subrecord.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellLighting {
    pub colors: [u8; 12],
    pub fog_near: f32,
    pub fog_far: f32,
    pub rotation_xy: i32,
    pub rotation_z: i32,
    pub directional_fade: f32,
    pub fog_clip: f32,
}

impl CellLighting {
    /// Near, far and clip distances all zero.
    pub fn has_broken_fog(&self) -> bool {
        self.fog_near == 0.0 && self.fog_far == 0.0 && self.fog_clip == 0.0
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CoreError> {
        if raw.len() < XCLL_WIDTH {
            return Err(CoreError::malformed(format!(
                "XCLL subrecord is {} bytes, expected at least {XCLL_WIDTH}",
                raw.len()
            )));
        }
        let word = |offset: usize| [raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]];
        let mut colors = [0u8; 12];
        colors.copy_from_slice(&raw[..12]);
        Ok(Self {
            colors,
            fog_near: f32::from_le_bytes(word(12)),
            fog_far: f32::from_le_bytes(word(16)),
            rotation_xy: i32::from_le_bytes(word(20)),
            rotation_z: i32::from_le_bytes(word(24)),
            directional_fade: f32::from_le_bytes(word(28)),
            fog_clip: f32::from_le_bytes(word(32)),
        })
    }

    pub fn read<C: ByteCursor + ?Sized>(
        cursor: &mut C,
        sub: &SubrecordHeader,
    ) -> Result<Self, CoreError> {
        if (sub.size as usize) < XCLL_WIDTH {
            return Err(CoreError::malformed(format!(
                "XCLL subrecord at offset {} is {} bytes, expected at least {XCLL_WIDTH}",
                sub.header_start, sub.size
            )));
        }
        let raw = cursor.read_bytes(XCLL_WIDTH)?;
        Self::decode(&raw)
    }
}

/// Overwrites the fog-near field of a raw `XCLL` payload in place.
pub fn patch_fog_near(raw: &mut [u8], near: f32) -> Result<(), CoreError> {
    let field = raw
        .get_mut(XCLL_NEAR_OFFSET..XCLL_NEAR_OFFSET + 4)
        .ok_or_else(|| CoreError::malformed("XCLL payload too short to patch"))?;
    field.copy_from_slice(&near.to_le_bytes());
    Ok(())
}

/// Scans `[tell, end)` for a `XCLL` subrecord and decodes it.
pub fn find_cell_lighting<C: ByteCursor + ?Sized>(
    cursor: &mut C,
    end: u64,
) -> Result<Option<CellLighting>, CoreError> {
    while let Some(sub) = next_subrecord(cursor, end)? {
        if sub.tag == Tag::XCLL {
            let lighting = CellLighting::read(cursor, &sub)?;
            cursor.seek_to(sub.data_end())?;
            return Ok(Some(lighting));
        }
        cursor.seek_to(sub.data_end())?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{
        CellLighting, XCLL_WIDTH, find_cell_lighting, next_subrecord, patch_fog_near, read_labels,
    };
    use crate::error::CoreErrorCode;
    use crate::reader::{ByteCursor, LittleEndianReader};
    use crate::types::Tag;

    fn sub(tag: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag);
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    fn xcll(near: f32, far: f32, clip: f32) -> Vec<u8> {
        let mut raw = vec![0u8; 12];
        raw.extend_from_slice(&near.to_le_bytes());
        raw.extend_from_slice(&far.to_le_bytes());
        raw.extend_from_slice(&0i32.to_le_bytes());
        raw.extend_from_slice(&0i32.to_le_bytes());
        raw.extend_from_slice(&1.0f32.to_le_bytes());
        raw.extend_from_slice(&clip.to_le_bytes());
        raw.extend_from_slice(&[0u8; 4]);
        raw
    }

    fn reader(bytes: Vec<u8>) -> LittleEndianReader<Cursor<Vec<u8>>> {
        LittleEndianReader::new(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn labels_pick_up_editor_id_and_grid() {
        let mut grid = Vec::new();
        grid.extend_from_slice(&(-4i32).to_le_bytes());
        grid.extend_from_slice(&9i32.to_le_bytes());
        let mut bytes = sub(b"EDID", b"Wilderness\0");
        bytes.extend(sub(b"DATA", &[1, 0]));
        bytes.extend(sub(b"XCLC", &grid));
        let end = bytes.len() as u64;

        let mut r = reader(bytes);
        let labels = read_labels(&mut r, end).unwrap();
        assert_eq!(labels.editor_id, "Wilderness");
        assert_eq!(labels.grid, Some((-4, 9)));
        assert_eq!(r.tell().unwrap(), end);
    }

    #[test]
    fn xxxx_prefix_overrides_following_size() {
        let payload = vec![7u8; 70_000];
        let mut bytes = sub(b"XXXX", &(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(b"OFST");
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&payload);
        let end = bytes.len() as u64;

        let mut r = reader(bytes);
        let header = next_subrecord(&mut r, end).unwrap().expect("subrecord present");
        assert_eq!(header.tag, Tag(*b"OFST"));
        assert_eq!(header.size, 70_000);
        assert_eq!(header.header_start, 0);
        assert_eq!(header.data_start, 16);
        assert_eq!(header.data_end(), end);
    }

    #[test]
    fn overrunning_subrecord_is_malformed() {
        let mut bytes = sub(b"EDID", b"abc");
        bytes.truncate(bytes.len() - 1);
        let end = bytes.len() as u64;
        let mut r = reader(bytes);
        let err = next_subrecord(&mut r, end).expect_err("overrun must fail");
        assert_eq!(err.code, CoreErrorCode::MalformedHeader);
    }

    #[test]
    fn fog_pattern_requires_all_three_zero() {
        let broken = CellLighting::decode(&xcll(0.0, 0.0, 0.0)).unwrap();
        assert!(broken.has_broken_fog());
        let fine = CellLighting::decode(&xcll(0.0, 0.0, 5.0)).unwrap();
        assert!(!fine.has_broken_fog());
        assert!(CellLighting::decode(&[0u8; 12]).is_err());
    }

    #[test]
    fn patching_near_only_touches_near() {
        let mut raw = xcll(0.0, 0.0, 0.0);
        let before = raw.clone();
        patch_fog_near(&mut raw, 0.0001).unwrap();
        let patched = CellLighting::decode(&raw).unwrap();
        assert_eq!(patched.fog_near, 0.0001);
        assert_eq!(raw[..12], before[..12]);
        assert_eq!(raw[16..], before[16..]);
        assert_eq!(raw.len(), XCLL_WIDTH + 4);
    }

    #[test]
    fn finds_lighting_among_other_subrecords() {
        let mut bytes = sub(b"EDID", b"Cell\0");
        bytes.extend(sub(b"XCLL", &xcll(0.0, 0.0, 0.0)));
        let end = bytes.len() as u64;
        let mut r = reader(bytes);
        let lighting = find_cell_lighting(&mut r, end).unwrap().expect("lighting present");
        assert!(lighting.has_broken_fog());
    }
}
