use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Four-byte record, group or subrecord signature.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const GRUP: Tag = Tag(*b"GRUP");
    pub const TES4: Tag = Tag(*b"TES4");
    pub const CELL: Tag = Tag(*b"CELL");
    pub const WRLD: Tag = Tag(*b"WRLD");
    pub const DIAL: Tag = Tag(*b"DIAL");

    pub const REFR: Tag = Tag(*b"REFR");
    pub const ACHR: Tag = Tag(*b"ACHR");
    pub const ACRE: Tag = Tag(*b"ACRE");
    pub const NAVM: Tag = Tag(*b"NAVM");
    pub const PHZD: Tag = Tag(*b"PHZD");
    pub const PGRE: Tag = Tag(*b"PGRE");

    pub const EDID: Tag = Tag(*b"EDID");
    pub const XCLC: Tag = Tag(*b"XCLC");
    pub const XCLL: Tag = Tag(*b"XCLL");
    pub const XXXX: Tag = Tag(*b"XXXX");
    pub const HEDR: Tag = Tag(*b"HEDR");
    pub const MAST: Tag = Tag(*b"MAST");
    pub const CNAM: Tag = Tag(*b"CNAM");
    pub const SNAM: Tag = Tag(*b"SNAM");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn is_zeroed(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02X}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes: [u8; 4] = raw.as_bytes().try_into().map_err(|_| {
            serde::de::Error::custom(format!("tag must be exactly 4 bytes, got {raw:?}"))
        })?;
        Ok(Tag(bytes))
    }
}

/// Record identifier, local to the plugin's load context.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FormId(pub u32);

impl From<u32> for FormId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl fmt::Debug for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormId({:08X})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{FormId, Tag};

    #[test]
    fn tag_display_escapes_binary_bytes() {
        assert_eq!(Tag::XCLL.to_string(), "XCLL");
        assert_eq!(Tag([b'A', 0, b'B', 0xFF]).to_string(), "A\\x00B\\xFF");
    }

    #[test]
    fn tag_serializes_as_text() {
        let json = serde_json::to_string(&Tag::REFR).unwrap();
        assert_eq!(json, "\"REFR\"");
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Tag::REFR);
        assert!(serde_json::from_str::<Tag>("\"TOOLONG\"").is_err());
    }

    #[test]
    fn form_id_displays_as_padded_hex() {
        assert_eq!(FormId(0x30).to_string(), "00000030");
    }
}
