//! SqPack on-disk structures.
//!
//! Every index and dat file starts with a 0x400-byte [`SqPackHeader`]. Index
//! files follow it with an [`IndexHeader`] describing the hash and synonym
//! tables; dat files hold [`FileEntryHeader`]-prefixed entries whose payload is
//! a sequence of [`BlockHeader`]-prefixed blocks.

mod entry;
mod pack;

pub use entry::{
    BlockHeader, FileEntryHeader, LodBlock, ModelFileHeader, ModelLocator, ModelRegion,
    StandardBlockInfo,
};
pub use pack::{HashEntry, IndexHeader, SqPackHeader, SynonymEntry};

/// Space on disk is allocated in units of this many bytes.
pub const SPACE_UNIT: u64 = 128;

/// Structural kind of a packed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FileType {
    /// Placeholder entry with no payload.
    Empty = 1,
    /// Flat sequence of blocks.
    Standard = 2,
    /// Model with region-grouped blocks and a synthesized header.
    Model = 3,
    /// Texture with LOD-grouped blocks and a stored header.
    Texture = 4,
}

impl FileType {
    /// Lowercase display name, as used by the query language.
    pub fn name(self) -> &'static str {
        match self {
            FileType::Empty => "empty",
            FileType::Standard => "standard",
            FileType::Model => "model",
            FileType::Texture => "texture",
        }
    }
}

impl TryFrom<u32> for FileType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Empty),
            2 => Ok(Self::Standard),
            3 => Ok(Self::Model),
            4 => Ok(Self::Texture),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Packed location of a file entry.
///
/// Bit 0 flags a hash collision that must be resolved through the synonym
/// table, bits 1..=3 select the dat file and the remaining bits hold the
/// entry offset in 128-byte units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator(pub u32);

impl Locator {
    /// Build a locator for an entry at `offset` in dat file `dat_id`.
    pub fn new(dat_id: u8, offset: u64) -> Self {
        debug_assert_eq!(offset % SPACE_UNIT, 0);
        Self(((offset / 8) as u32 & !0xF) | (u32::from(dat_id & 0x7) << 1))
    }

    /// Whether the entry is a collision marker pointing into the synonym table.
    #[inline]
    pub fn is_synonym(self) -> bool {
        self.0 & 1 != 0
    }

    /// Dat file id (`.datN`).
    #[inline]
    pub fn dat_id(self) -> u8 {
        ((self.0 >> 1) & 0x7) as u8
    }

    /// Byte offset of the file entry header inside the dat file.
    #[inline]
    pub fn offset(self) -> u64 {
        u64::from(self.0 & !0xF) * 8
    }

    /// The locator without the synonym flag, used as a file identity.
    #[inline]
    pub fn without_flags(self) -> Self {
        Self(self.0 & !1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_packing() {
        let locator = Locator::new(5, 0x1234_5680);
        assert_eq!(locator.dat_id(), 5);
        assert_eq!(locator.offset(), 0x1234_5680);
        assert!(!locator.is_synonym());

        let flagged = Locator(locator.0 | 1);
        assert!(flagged.is_synonym());
        assert_eq!(flagged.without_flags(), locator);
    }

    #[test]
    fn test_file_type_from_u32() {
        assert_eq!(FileType::try_from(3), Ok(FileType::Model));
        assert_eq!(FileType::try_from(9), Err(9));
    }
}
