//! Model entries.
//!
//! Blocks are grouped by region. The logical file starts with a
//! [`ModelFileHeader`] built from the region layout, followed by the regions
//! in [`ModelRegion::LOGICAL_ORDER`].

use sqpack_common::BinaryReader;
use zerocopy::IntoBytes;

use super::{OffsetTable, TableBuilder};
use crate::dat::slice;
use crate::decompress::read_block_header;
use crate::format::{FileEntryHeader, FileType, ModelFileHeader, ModelLocator, ModelRegion};
use crate::{Error, Result};

const HEADER_LEN: u64 = std::mem::size_of::<FileEntryHeader>() as u64;
const LOCATOR_LEN: u64 = std::mem::size_of::<ModelLocator>() as u64;

pub(super) fn build(data: &[u8], offset: u64, header: FileEntryHeader) -> Result<OffsetTable> {
    let locator: ModelLocator =
        BinaryReader::new(slice(data, offset + HEADER_LEN, LOCATOR_LEN)?).read_struct()?;

    let total = locator.total_blocks();
    let size_table = slice(data, offset + HEADER_LEN + LOCATOR_LEN, total as u64 * 2)?;
    let sizes: Vec<u16> = BinaryReader::new(size_table).read_array(total)?;

    let offsets = locator.offsets;
    let first_blocks = locator.first_blocks;
    let block_counts = locator.block_counts;

    let base = offset + u64::from(header.header_size);
    let mut builder = TableBuilder::new(ModelFileHeader::SIZE as u64);
    let mut region_offsets = [0u32; ModelRegion::COUNT];
    let mut region_sizes = [0u32; ModelRegion::COUNT];

    for region in ModelRegion::LOGICAL_ORDER {
        let slot = region.slot();
        let count = usize::from(block_counts[slot]);
        if count == 0 {
            continue;
        }

        let start = builder.cursor();
        let mut cursor = base + u64::from(offsets[slot]);
        for i in 0..count {
            let index = usize::from(first_blocks[slot]) + i;
            let size = *sizes
                .get(index)
                .ok_or_else(|| Error::invalid_block(cursor, format!("block {index} missing from size table")))?;
            let block = read_block_header(data, cursor)?;
            builder.push(cursor, u32::from(size), block.decompressed_size);
            cursor += u64::from(size);
        }
        region_offsets[slot] = start as u32;
        region_sizes[slot] = (builder.cursor() - start) as u32;
    }

    let synthesized = synthesize_header(&header, &locator, &region_offsets, &region_sizes);
    let length = u64::from(header.decompressed_size);
    Ok(builder.finish(FileType::Model, header, synthesized.as_bytes().to_vec(), length))
}

/// Build the logical header. Offsets of regions without blocks stay zero.
fn synthesize_header(
    header: &FileEntryHeader,
    locator: &ModelLocator,
    offsets: &[u32; ModelRegion::COUNT],
    sizes: &[u32; ModelRegion::COUNT],
) -> ModelFileHeader {
    let lod = |f: fn(usize) -> ModelRegion, table: &[u32; ModelRegion::COUNT]| {
        [table[f(0).slot()], table[f(1).slot()], table[f(2).slot()]]
    };

    ModelFileHeader {
        version: header.block_count,
        stack_size: sizes[ModelRegion::Stack.slot()],
        runtime_size: sizes[ModelRegion::Runtime.slot()],
        vertex_declarations: locator.vertex_declarations,
        materials: locator.materials,
        vertex_offsets: lod(ModelRegion::Vertex, offsets),
        index_offsets: lod(ModelRegion::Index, offsets),
        vertex_sizes: lod(ModelRegion::Vertex, sizes),
        index_sizes: lod(ModelRegion::Index, sizes),
        lod_count: locator.lod_count,
        index_streaming: locator.index_streaming,
        edge_geometry: locator.edge_geometry,
        padding: 0,
    }
}
