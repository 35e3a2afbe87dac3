//! Standard entries: a block table follows the entry header.

use sqpack_common::BinaryReader;

use super::{OffsetTable, TableBuilder};
use crate::dat::slice;
use crate::format::{FileEntryHeader, FileType, StandardBlockInfo};
use crate::Result;

const HEADER_LEN: u64 = std::mem::size_of::<FileEntryHeader>() as u64;
const INFO_LEN: u64 = std::mem::size_of::<StandardBlockInfo>() as u64;

pub(super) fn build(data: &[u8], offset: u64, header: FileEntryHeader) -> Result<OffsetTable> {
    let count = header.block_count as usize;
    let table = slice(data, offset + HEADER_LEN, count as u64 * INFO_LEN)?;
    let infos: Vec<StandardBlockInfo> = BinaryReader::new(table).read_array(count)?;

    let base = offset + u64::from(header.header_size);
    let mut builder = TableBuilder::new(0);
    for info in &infos {
        builder.push(
            base + u64::from(info.offset),
            u32::from(info.compressed_size),
            u32::from(info.decompressed_size),
        );
    }

    let length = u64::from(header.decompressed_size);
    Ok(builder.finish(FileType::Standard, header, Vec::new(), length))
}
