//! Texture entries: LOD groups of blocks after a stored texture header.

use sqpack_common::BinaryReader;

use super::{OffsetTable, TableBuilder};
use crate::dat::slice;
use crate::decompress::read_block_header;
use crate::format::{FileEntryHeader, FileType, LodBlock};
use crate::{Error, Result};

const HEADER_LEN: u64 = std::mem::size_of::<FileEntryHeader>() as u64;
const LOD_LEN: u64 = std::mem::size_of::<LodBlock>() as u64;

pub(super) fn build(data: &[u8], offset: u64, header: FileEntryHeader) -> Result<OffsetTable> {
    let lod_count = header.block_count as usize;
    let lod_table = slice(data, offset + HEADER_LEN, lod_count as u64 * LOD_LEN)?;
    let lods: Vec<LodBlock> = BinaryReader::new(lod_table).read_array(lod_count)?;

    let total: usize = lods.iter().map(|lod| lod.block_count as usize).sum();
    let sizes_at = offset + HEADER_LEN + lod_count as u64 * LOD_LEN;
    let size_table = slice(data, sizes_at, total as u64 * 2)?;
    let sizes: Vec<u16> = BinaryReader::new(size_table).read_array(total)?;

    let base = offset + u64::from(header.header_size);
    let prefix_len = lods.first().map_or(0, |lod| u64::from(lod.compressed_offset));
    let prefix = slice(data, base, prefix_len)?.to_vec();

    let mut builder = TableBuilder::new(prefix_len);
    for lod in &lods {
        let mut cursor = base + u64::from(lod.compressed_offset);
        for i in 0..lod.block_count as usize {
            let slot = lod.first_block as usize + i;
            let size = *sizes
                .get(slot)
                .ok_or_else(|| Error::invalid_block(cursor, format!("block {slot} missing from size table")))?;
            let block = read_block_header(data, cursor)?;
            builder.push(cursor, u32::from(size), block.decompressed_size);
            cursor += u64::from(size);
        }
    }

    let length = u64::from(header.decompressed_size);
    Ok(builder.finish(FileType::Texture, header, prefix, length))
}
