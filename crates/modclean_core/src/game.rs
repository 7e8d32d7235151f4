use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::reader::ByteCursor;
use crate::types::Tag;

/// Width of a record or group header in Oblivion-era plugins.
pub const HEADER_WIDTH_SHORT: u64 = 20;
/// Width of a record or group header in every later game.
pub const HEADER_WIDTH_LONG: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Game {
    Oblivion,
    Fallout3,
    FalloutNv,
    Skyrim,
    SkyrimSe,
    Fallout4,
}

impl Game {
    pub const ALL: [Game; 6] = [
        Game::Oblivion,
        Game::Fallout3,
        Game::FalloutNv,
        Game::Skyrim,
        Game::SkyrimSe,
        Game::Fallout4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oblivion => "Oblivion",
            Self::Fallout3 => "Fallout 3",
            Self::FalloutNv => "Fallout: New Vegas",
            Self::Skyrim => "Skyrim",
            Self::SkyrimSe => "Skyrim Special Edition",
            Self::Fallout4 => "Fallout 4",
        }
    }

    pub fn format(&self) -> PluginFormat {
        match self {
            Self::Oblivion => PluginFormat {
                header_width: HEADER_WIDTH_SHORT,
                udr_types: OBLIVION_UDR_TYPES,
                game: Some(*self),
            },
            Self::Fallout3 | Self::FalloutNv => PluginFormat {
                header_width: HEADER_WIDTH_LONG,
                udr_types: FALLOUT3_UDR_TYPES,
                game: Some(*self),
            },
            Self::Skyrim | Self::SkyrimSe | Self::Fallout4 => PluginFormat {
                header_width: HEADER_WIDTH_LONG,
                udr_types: SKYRIM_UDR_TYPES,
                game: Some(*self),
            },
        }
    }
}

const OBLIVION_UDR_TYPES: &[Tag] = &[Tag::ACRE, Tag::ACHR, Tag::REFR];
const FALLOUT3_UDR_TYPES: &[Tag] = &[Tag::ACRE, Tag::ACHR, Tag::REFR, Tag::NAVM, Tag::PGRE];
const SKYRIM_UDR_TYPES: &[Tag] = &[Tag::ACHR, Tag::REFR, Tag::NAVM, Tag::PHZD, Tag::PGRE];
const ANY_UDR_TYPES: &[Tag] = &[
    Tag::ACRE,
    Tag::ACHR,
    Tag::REFR,
    Tag::NAVM,
    Tag::PHZD,
    Tag::PGRE,
];

/// Format-level constants a walk needs: header width and which record types count
/// as deletable references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginFormat {
    pub header_width: u64,
    pub udr_types: &'static [Tag],
    pub game: Option<Game>,
}

impl PluginFormat {
    /// Format used when the game is unknown and the header width could not be detected.
    pub fn generic(header_width: u64) -> Self {
        Self {
            header_width,
            udr_types: ANY_UDR_TYPES,
            game: None,
        }
    }

    pub fn is_udr_type(&self, tag: Tag) -> bool {
        self.udr_types.contains(&tag)
    }

    pub fn is_fallout4(&self) -> bool {
        self.game == Some(Game::Fallout4)
    }

    /// Resolves the format for a stream, preferring an explicit game.
    ///
    /// Without a game the header width comes from where the plugin header's `HEDR`
    /// subrecord starts. The cursor is left where it was.
    pub fn resolve<C: ByteCursor + ?Sized>(
        game: Option<Game>,
        cursor: &mut C,
    ) -> Result<Self, CoreError> {
        if let Some(game) = game {
            return Ok(game.format());
        }
        let width = detect_header_width(cursor)?.unwrap_or(HEADER_WIDTH_LONG);
        Ok(Self::generic(width))
    }
}

pub fn detect_header_width<C: ByteCursor + ?Sized>(
    cursor: &mut C,
) -> Result<Option<u64>, CoreError> {
    let start = cursor.tell()?;
    if cursor.remaining()? < HEADER_WIDTH_LONG + 4 {
        return Ok(None);
    }

    let tag = cursor.read_tag()?;
    let mut detected = None;
    if tag == Tag::TES4 {
        for width in [HEADER_WIDTH_SHORT, HEADER_WIDTH_LONG] {
            cursor.seek_to(start + width)?;
            if cursor.read_tag()? == Tag::HEDR {
                detected = Some(width);
                break;
            }
        }
    }

    cursor.seek_to(start)?;
    Ok(detected)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Game, HEADER_WIDTH_LONG, HEADER_WIDTH_SHORT, PluginFormat, detect_header_width};
    use crate::reader::{ByteCursor, LittleEndianReader};
    use crate::types::Tag;

    fn plugin_header_bytes(width: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"TES4");
        bytes.extend_from_slice(&18u32.to_le_bytes());
        bytes.resize(width as usize, 0);
        bytes.extend_from_slice(b"HEDR");
        bytes.extend_from_slice(&12u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        bytes
    }

    #[test]
    fn detects_both_header_widths() {
        for width in [HEADER_WIDTH_SHORT, HEADER_WIDTH_LONG] {
            let mut r = LittleEndianReader::new(Cursor::new(plugin_header_bytes(width))).unwrap();
            assert_eq!(detect_header_width(&mut r).unwrap(), Some(width));
            assert_eq!(r.tell().unwrap(), 0);
        }
    }

    #[test]
    fn undetectable_streams_fall_back_to_long_headers() {
        let mut r = LittleEndianReader::new(Cursor::new(vec![0u8; 64])).unwrap();
        let format = PluginFormat::resolve(None, &mut r).unwrap();
        assert_eq!(format.header_width, HEADER_WIDTH_LONG);
        assert!(format.is_udr_type(Tag::ACRE));
        assert!(format.is_udr_type(Tag::PHZD));
    }

    #[test]
    fn explicit_game_wins_over_detection() {
        let mut r =
            LittleEndianReader::new(Cursor::new(plugin_header_bytes(HEADER_WIDTH_LONG))).unwrap();
        let format = PluginFormat::resolve(Some(Game::Oblivion), &mut r).unwrap();
        assert_eq!(format.header_width, HEADER_WIDTH_SHORT);
        assert!(format.is_udr_type(Tag::ACRE));
        assert!(!format.is_udr_type(Tag::NAVM));
    }

    #[test]
    fn skyrim_allow_list_has_no_creatures() {
        let format = Game::SkyrimSe.format();
        assert!(!format.is_udr_type(Tag::ACRE));
        assert!(format.is_udr_type(Tag::PGRE));
        assert!(!format.is_udr_type(Tag::CELL));
    }
}
