//! Dat file entry structures.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::SPACE_UNIT;

/// Header of a file entry inside a dat file.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct FileEntryHeader {
    /// Size of this header including the type specific tables, padded to 128 bytes
    pub header_size: u32,
    /// [`FileType`](super::FileType) tag
    pub file_type: u32,
    /// Declared logical size of the file
    pub decompressed_size: u32,
    /// Space reserved for the entry, in 128-byte units
    pub reserved_units: u32,
    /// Space occupied by the entry, in 128-byte units
    pub occupied_units: u32,
    /// Block count (standard), LOD count (texture) or version (model)
    pub block_count: u32,
}

impl FileEntryHeader {
    /// Reserved space in bytes.
    #[inline]
    pub fn reserved_bytes(&self) -> u64 {
        u64::from(self.reserved_units) * SPACE_UNIT
    }

    /// Occupied space in bytes.
    #[inline]
    pub fn occupied_bytes(&self) -> u64 {
        u64::from(self.occupied_units) * SPACE_UNIT
    }
}

/// Header in front of every compressed or stored block.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct BlockHeader {
    /// Size of this header (16)
    pub header_size: u32,
    /// Always zero
    pub reserved: u32,
    /// Size of the deflate payload, or [`BlockHeader::STORED`]
    pub compressed_size: u32,
    /// Size of the payload once decoded
    pub decompressed_size: u32,
}

impl BlockHeader {
    /// `compressed_size` sentinel of a block stored without compression.
    pub const STORED: u32 = 32000;
    /// Largest decompressed block the client writes.
    pub const MAX_DECOMPRESSED: usize = 16000;

    /// Whether the payload is stored raw.
    #[inline]
    pub fn is_stored(&self) -> bool {
        self.compressed_size == Self::STORED
    }

    /// Number of payload bytes following the header.
    #[inline]
    pub fn payload_size(&self) -> u32 {
        if self.is_stored() {
            self.decompressed_size
        } else {
            self.compressed_size
        }
    }
}

/// Block table record of a standard file.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct StandardBlockInfo {
    /// Offset of the block relative to the end of the entry header
    pub offset: u32,
    /// On-disk size of the block including its header and padding
    pub compressed_size: u16,
    /// Decoded size of the block
    pub decompressed_size: u16,
}

/// Regions of a model file, in locator array order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRegion {
    Stack,
    Runtime,
    Vertex(usize),
    Edge(usize),
    Index(usize),
}

impl ModelRegion {
    /// Number of regions described by a [`ModelLocator`].
    pub const COUNT: usize = 11;

    /// Regions in the order their bytes appear in the logical file.
    pub const LOGICAL_ORDER: [ModelRegion; 11] = [
        ModelRegion::Stack,
        ModelRegion::Runtime,
        ModelRegion::Vertex(0),
        ModelRegion::Edge(0),
        ModelRegion::Index(0),
        ModelRegion::Vertex(1),
        ModelRegion::Edge(1),
        ModelRegion::Index(1),
        ModelRegion::Vertex(2),
        ModelRegion::Edge(2),
        ModelRegion::Index(2),
    ];

    /// Position of this region in the locator arrays.
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            ModelRegion::Stack => 0,
            ModelRegion::Runtime => 1,
            ModelRegion::Vertex(lod) => 2 + lod,
            ModelRegion::Edge(lod) => 5 + lod,
            ModelRegion::Index(lod) => 8 + lod,
        }
    }
}

/// Region layout of a model entry; follows the [`FileEntryHeader`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct ModelLocator {
    /// Decoded size of each region
    pub decompressed_sizes: [u32; 11],
    /// On-disk size of each region
    pub compressed_sizes: [u32; 11],
    /// Offset of each region relative to the end of the entry header
    pub offsets: [u32; 11],
    /// Index of each region's first block in the block size table
    pub first_blocks: [u16; 11],
    /// Number of blocks in each region
    pub block_counts: [u16; 11],
    /// Vertex declaration count
    pub vertex_declarations: u16,
    /// Material count
    pub materials: u16,
    /// Number of LODs
    pub lod_count: u8,
    /// Index buffer streaming flag
    pub index_streaming: u8,
    /// Edge geometry flag
    pub edge_geometry: u8,
    /// Padding
    pub padding: u8,
}

impl ModelLocator {
    /// Total number of blocks across all regions.
    pub fn total_blocks(&self) -> usize {
        let counts = self.block_counts;
        counts.iter().map(|&c| usize::from(c)).sum()
    }
}

/// Texture LOD group record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct LodBlock {
    /// Offset of the group relative to the end of the entry header
    pub compressed_offset: u32,
    /// On-disk size of the group
    pub compressed_size: u32,
    /// Decoded size of the group
    pub decompressed_size: u32,
    /// Index of the first block in the block size table
    pub first_block: u32,
    /// Number of blocks in the group
    pub block_count: u32,
}

/// Logical header of a model file, synthesized from its [`ModelLocator`].
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct ModelFileHeader {
    /// Model format version
    pub version: u32,
    /// Stack region size
    pub stack_size: u32,
    /// Runtime region size
    pub runtime_size: u32,
    /// Vertex declaration count
    pub vertex_declarations: u16,
    /// Material count
    pub materials: u16,
    /// Logical offset of each LOD's vertex buffer
    pub vertex_offsets: [u32; 3],
    /// Logical offset of each LOD's index buffer
    pub index_offsets: [u32; 3],
    /// Size of each LOD's vertex buffer
    pub vertex_sizes: [u32; 3],
    /// Size of each LOD's index buffer
    pub index_sizes: [u32; 3],
    /// Number of LODs
    pub lod_count: u8,
    /// Index buffer streaming flag
    pub index_streaming: u8,
    /// Edge geometry flag
    pub edge_geometry: u8,
    /// Padding
    pub padding: u8,
}

impl ModelFileHeader {
    /// Size of the synthesized header at the start of the logical file.
    pub const SIZE: usize = 0x44;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<FileEntryHeader>(), 24);
        assert_eq!(std::mem::size_of::<BlockHeader>(), 16);
        assert_eq!(std::mem::size_of::<StandardBlockInfo>(), 8);
        assert_eq!(std::mem::size_of::<ModelLocator>(), 184);
        assert_eq!(std::mem::size_of::<LodBlock>(), 20);
        assert_eq!(std::mem::size_of::<ModelFileHeader>(), ModelFileHeader::SIZE);
        assert_eq!(std::mem::size_of::<super::super::IndexHeader>(), 0x400);
        assert_eq!(std::mem::size_of::<super::super::SynonymEntry>(), 256);
    }

    #[test]
    fn test_region_slots_are_a_permutation() {
        let mut slots: Vec<usize> = ModelRegion::LOGICAL_ORDER.iter().map(|r| r.slot()).collect();
        slots.sort_unstable();
        assert_eq!(slots, (0..ModelRegion::COUNT).collect::<Vec<_>>());
    }
}
