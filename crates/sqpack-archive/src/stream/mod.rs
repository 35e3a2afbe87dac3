//! Random access over block-compressed file entries.
//!
//! A file entry is turned into an [`OffsetTable`] once: a logical prefix
//! (the synthesized model header or the stored texture header) followed by
//! blocks, each with its logical start, dat offset and on-disk size. The
//! table is shared behind an `Arc` by every [`BlockStream`] cloned from the
//! same file, while each stream keeps its own cursor and decoded block.

mod model;
mod standard;
mod texture;

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use sqpack_common::{BinaryReader, CancellationToken};

use crate::dat::{slice, DatLease};
use crate::decompress;
use crate::format::{BlockHeader, FileEntryHeader, FileType};
use crate::{Error, Result};

/// Read the entry header at `offset`.
pub fn read_entry_header(data: &[u8], offset: u64) -> Result<FileEntryHeader> {
    let bytes = slice(data, offset, std::mem::size_of::<FileEntryHeader>() as u64)?;
    Ok(BinaryReader::new(bytes).read_struct()?)
}

/// Parsed block layout of one file entry.
///
/// `request_offsets`, `block_offsets` and `block_sizes` hold one slot per
/// block plus a trailing slot whose request offset is the end of the last
/// block, so a binary search over `request_offsets` maps any logical
/// position to its block.
#[derive(Debug)]
pub struct OffsetTable {
    file_type: FileType,
    header: FileEntryHeader,
    prefix: Vec<u8>,
    request_offsets: Vec<u64>,
    block_offsets: Vec<u64>,
    block_sizes: Vec<u32>,
    length: u64,
}

impl OffsetTable {
    /// Parse the entry at `offset` of a mapped dat file.
    pub fn load(data: &[u8], offset: u64) -> Result<Self> {
        let header = read_entry_header(data, offset)?;
        let file_type = FileType::try_from(header.file_type).map_err(Error::UnsupportedFileType)?;

        match file_type {
            FileType::Empty => Ok(TableBuilder::new(0).finish(file_type, header, Vec::new(), 0)),
            FileType::Standard => standard::build(data, offset, header),
            FileType::Model => model::build(data, offset, header),
            FileType::Texture => texture::build(data, offset, header),
        }
    }

    /// Structural kind of the entry.
    #[inline]
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// The entry header as stored.
    #[inline]
    pub fn header(&self) -> &FileEntryHeader {
        &self.header
    }

    /// Logical length; the declared size is authoritative.
    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Bytes served before the first block.
    #[inline]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Number of blocks, excluding the trailing slot.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.request_offsets.len() - 1
    }

    /// Logical start of each block plus the end of the last one.
    #[inline]
    pub fn request_offsets(&self) -> &[u64] {
        &self.request_offsets
    }

    /// Dat offset of each block.
    #[inline]
    pub fn block_offsets(&self) -> &[u64] {
        &self.block_offsets
    }

    /// On-disk size of each block.
    #[inline]
    pub fn block_sizes(&self) -> &[u32] {
        &self.block_sizes
    }

    /// Block holding logical `position`, or `None` inside the prefix or
    /// past the last block.
    fn block_for(&self, position: u64) -> Option<usize> {
        if position < self.request_offsets[0] {
            return None;
        }
        let index = self.request_offsets.partition_point(|&start| start <= position) - 1;
        (index < self.block_count()).then_some(index)
    }
}

/// Accumulates blocks in logical order.
pub(crate) struct TableBuilder {
    request_offsets: Vec<u64>,
    block_offsets: Vec<u64>,
    block_sizes: Vec<u32>,
    cursor: u64,
}

impl TableBuilder {
    pub(crate) fn new(start: u64) -> Self {
        Self {
            request_offsets: Vec::new(),
            block_offsets: Vec::new(),
            block_sizes: Vec::new(),
            cursor: start,
        }
    }

    /// Logical offset the next block starts at.
    pub(crate) fn cursor(&self) -> u64 {
        self.cursor
    }

    pub(crate) fn push(&mut self, block_offset: u64, on_disk_size: u32, decompressed_size: u32) {
        self.request_offsets.push(self.cursor);
        self.block_offsets.push(block_offset);
        self.block_sizes.push(on_disk_size);
        self.cursor += u64::from(decompressed_size);
    }

    pub(crate) fn finish(
        mut self,
        file_type: FileType,
        header: FileEntryHeader,
        prefix: Vec<u8>,
        length: u64,
    ) -> OffsetTable {
        let end = match (self.block_offsets.last(), self.block_sizes.last()) {
            (Some(&offset), Some(&size)) => offset + u64::from(size),
            _ => 0,
        };
        self.request_offsets.push(self.cursor);
        self.block_offsets.push(end);
        self.block_sizes.push(0);

        OffsetTable {
            file_type,
            header,
            prefix,
            request_offsets: self.request_offsets,
            block_offsets: self.block_offsets,
            block_sizes: self.block_sizes,
            length,
        }
    }
}

/// A seekable reader over one file entry.
///
/// Clones share the parsed [`OffsetTable`] and the dat file lease, but keep
/// an independent cursor and decode buffer.
#[derive(Debug)]
pub struct BlockStream {
    dat: DatLease,
    table: Arc<OffsetTable>,
    position: u64,
    block: Vec<u8>,
    block_index: Option<usize>,
}

impl BlockStream {
    /// Parse the entry at `offset` and open a stream over it.
    pub fn open(dat: DatLease, offset: u64) -> Result<Self> {
        let map = dat.mapping()?;
        let table = OffsetTable::load(&map, offset)?;
        Ok(Self::with_table(dat, Arc::new(table)))
    }

    /// Open a stream over an already parsed table.
    pub fn with_table(dat: DatLease, table: Arc<OffsetTable>) -> Self {
        Self {
            dat,
            table,
            position: 0,
            block: Vec::new(),
            block_index: None,
        }
    }

    /// The shared offset table.
    #[inline]
    pub fn table(&self) -> &Arc<OffsetTable> {
        &self.table
    }

    /// Logical length.
    #[inline]
    pub fn len(&self) -> u64 {
        self.table.length
    }

    /// Whether the logical file is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.length == 0
    }

    /// Current cursor.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the whole logical file, checking `cancel` between blocks.
    ///
    /// The buffer grows as blocks are decoded, so an oversized declared
    /// length costs nothing until the reader actually gets there.
    pub fn read_all(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let length = self.table.length;
        let decoded = self.table.request_offsets.last().copied().unwrap_or(0);
        let mut out = Vec::with_capacity(length.min(decoded) as usize);
        self.position = 0;

        let mut filled = 0;
        while (filled as u64) < length {
            cancel.check()?;
            let end = (filled as u64 + BlockHeader::MAX_DECOMPRESSED as u64).min(length) as usize;
            out.resize(end, 0);
            let read = self.read_into(&mut out[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Fill `buf` from the cursor, crossing blocks as needed.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let table = self.table.clone();
        if self.position >= table.length || buf.is_empty() {
            return Ok(0);
        }
        let wanted = (table.length - self.position).min(buf.len() as u64) as usize;

        let mut written = 0;
        while written < wanted {
            let position = self.position;
            let out = &mut buf[written..wanted];

            let copied = if position < table.prefix.len() as u64 {
                let source = &table.prefix[position as usize..];
                let n = source.len().min(out.len());
                out[..n].copy_from_slice(&source[..n]);
                n
            } else {
                let cached = self
                    .block_index
                    .filter(|&i| {
                        table.request_offsets[i] <= position && position < table.request_offsets[i + 1]
                    });
                match cached.or_else(|| table.block_for(position)) {
                    Some(index) => {
                        self.load_block(index)?;
                        let start = table.request_offsets[index];
                        let span = (table.request_offsets[index + 1] - start) as usize;
                        let relative = (position - start) as usize;
                        let n = out.len().min(span - relative);
                        if relative < self.block.len() {
                            let n = n.min(self.block.len() - relative);
                            out[..n].copy_from_slice(&self.block[relative..relative + n]);
                            n
                        } else {
                            out[..n].fill(0);
                            n
                        }
                    }
                    None => {
                        // Past the last block: the declared length still counts.
                        out.fill(0);
                        out.len()
                    }
                }
            };

            written += copied;
            self.position += copied as u64;
        }
        Ok(written)
    }

    fn load_block(&mut self, index: usize) -> Result<()> {
        if self.block_index == Some(index) {
            return Ok(());
        }
        self.block_index = None;
        let map = self.dat.mapping()?;
        decompress::decode_block(&map, self.table.block_offsets[index], &mut self.block)?;
        self.block_index = Some(index);
        Ok(())
    }
}

impl Clone for BlockStream {
    fn clone(&self) -> Self {
        Self {
            dat: self.dat.clone(),
            table: self.table.clone(),
            position: self.position,
            block: Vec::new(),
            block_index: None,
        }
    }
}

impl Read for BlockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl Seek for BlockStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.table.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dat::DatPool;
    use crate::testing::{BlockMode, FixtureBuilder, ModelRegions};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_standard_small_reads_match_bulk_read() {
        let data = pattern(40_000);
        let fixture = FixtureBuilder::new()
            .standard(0x0a, 0, 0, "exd/big.exd", &data)
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "exd/big.exd").unwrap();

        let mut stream = BlockStream::open(lease, offset).unwrap();
        assert_eq!(stream.table().file_type(), FileType::Standard);
        assert_eq!(stream.table().block_count(), 3);

        let bulk = stream.read_all(&CancellationToken::new()).unwrap();
        assert_eq!(bulk, data);

        for chunk in [1usize, 7, 999, 16_000, 16_001, 39_999] {
            stream.seek(SeekFrom::Start(0)).unwrap();
            let mut collected = Vec::new();
            let mut buf = vec![0u8; chunk];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&buf[..n]);
            }
            assert_eq!(collected, data, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_random_access_and_clone_independence() {
        let data = pattern(50_000);
        let fixture = FixtureBuilder::new()
            .standard(0x0a, 0, 0, "exd/a.exd", &data)
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "exd/a.exd").unwrap();

        let mut first = BlockStream::open(lease, offset).unwrap();
        first.seek(SeekFrom::Start(15_990)).unwrap();
        let mut second = first.clone();
        assert!(Arc::ptr_eq(first.table(), second.table()));

        let mut buf = [0u8; 20];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[15_990..16_010]);

        second.seek(SeekFrom::End(-5)).unwrap();
        let mut tail = Vec::new();
        second.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &data[49_995..]);
        assert_eq!(first.position(), 16_010);
    }

    #[test]
    fn test_declared_length_is_zero_padded() {
        let data = pattern(1000);
        let fixture = FixtureBuilder::new()
            .standard_with_length(0x0a, 0, 0, "exd/short.exd", &data, 1024)
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "exd/short.exd").unwrap();

        let mut stream = BlockStream::open(lease, offset).unwrap();
        let all = stream.read_all(&CancellationToken::new()).unwrap();
        assert_eq!(all.len(), 1024);
        assert_eq!(&all[..1000], &data[..]);
        assert!(all[1000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_padding_beyond_decoded_blocks() {
        let data = pattern(100);
        let fixture = FixtureBuilder::new()
            .standard_with_length(0x0a, 0, 0, "exd/sparse.exd", &data, 40_000)
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "exd/sparse.exd").unwrap();

        let mut stream = BlockStream::open(lease, offset).unwrap();
        assert_eq!(stream.table().request_offsets().last(), Some(&100));
        let all = stream.read_all(&CancellationToken::new()).unwrap();
        assert_eq!(all.len(), 40_000);
        assert_eq!(&all[..100], &data[..]);
        assert!(all[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_stored_and_mixed_standard_blocks() {
        let data = pattern(50_000);
        for mode in [BlockMode::Stored, BlockMode::Alternating] {
            let fixture = FixtureBuilder::new()
                .block_mode(mode)
                .standard(0x0a, 0, 0, "exd/a.exd", &data)
                .build()
                .unwrap();
            let pool = DatPool::default();
            let (lease, offset) = fixture.open(&pool, "exd/a.exd").unwrap();

            let mut stream = BlockStream::open(lease, offset).unwrap();
            assert_eq!(stream.table().block_count(), 4);
            assert_eq!(stream.read_all(&CancellationToken::new()).unwrap(), data, "{mode:?}");

            // Across the boundary of a stored and a deflated block.
            stream.seek(SeekFrom::Start(15_995)).unwrap();
            let mut buf = [0u8; 10];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf[..], &data[15_995..16_005], "{mode:?}");
        }
    }

    #[test]
    fn test_stored_and_mixed_model_blocks() {
        let regions = ModelRegions {
            stack: pattern(300),
            runtime: pattern(20_000),
            vertex: [pattern(33_000), pattern(40), Vec::new()],
            edge: [Vec::new(), Vec::new(), Vec::new()],
            index: [pattern(500), Vec::new(), Vec::new()],
        };
        for mode in [BlockMode::Stored, BlockMode::Alternating] {
            let fixture = FixtureBuilder::new()
                .block_mode(mode)
                .model(0x04, 0, 0, "chara/x/body.mdl", &regions)
                .build()
                .unwrap();
            let pool = DatPool::default();
            let (lease, offset) = fixture.open(&pool, "chara/x/body.mdl").unwrap();

            let mut stream = BlockStream::open(lease, offset).unwrap();
            let all = stream.read_all(&CancellationToken::new()).unwrap();
            assert_eq!(all.len(), crate::format::ModelFileHeader::SIZE + regions.total_len());

            let header: crate::format::ModelFileHeader = BinaryReader::new(&all).read_struct().unwrap();
            let vertex_offsets = header.vertex_offsets;
            let index_offsets = header.index_offsets;
            assert_eq!(&all[0x44..0x44 + 300], &regions.stack[..], "{mode:?}");
            let v0 = vertex_offsets[0] as usize;
            assert_eq!(&all[v0..v0 + 33_000], &regions.vertex[0][..], "{mode:?}");
            let i0 = index_offsets[0] as usize;
            assert_eq!(&all[i0..i0 + 500], &regions.index[0][..], "{mode:?}");
        }
    }

    #[test]
    fn test_stored_and_mixed_texture_blocks() {
        let header = pattern(80);
        let lods = vec![pattern(40_000), pattern(20_000), pattern(2_500)];
        let mut expected = header.clone();
        for lod in &lods {
            expected.extend_from_slice(lod);
        }

        for mode in [BlockMode::Stored, BlockMode::Alternating] {
            let fixture = FixtureBuilder::new()
                .block_mode(mode)
                .texture(0x04, 0, 0, "chara/x/tex.tex", &header, &lods)
                .build()
                .unwrap();
            let pool = DatPool::default();
            let (lease, offset) = fixture.open(&pool, "chara/x/tex.tex").unwrap();

            let mut stream = BlockStream::open(lease, offset).unwrap();
            assert_eq!(stream.table().prefix(), &header[..]);
            assert_eq!(stream.read_all(&CancellationToken::new()).unwrap(), expected, "{mode:?}");

            stream.seek(SeekFrom::Start(80 + 40_000 - 3)).unwrap();
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf[..], &expected[40_077..40_083], "{mode:?}");
        }
    }

    #[test]
    fn test_empty_entry() {
        let fixture = FixtureBuilder::new()
            .empty(0x0a, 0, 0, "exd/none.exd")
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "exd/none.exd").unwrap();

        let mut stream = BlockStream::open(lease, offset).unwrap();
        assert_eq!(stream.table().file_type(), FileType::Empty);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_model_header_is_synthesized() {
        let regions = ModelRegions {
            stack: pattern(300),
            runtime: pattern(20_000),
            vertex: [pattern(17_000), pattern(40), Vec::new()],
            edge: [Vec::new(), Vec::new(), Vec::new()],
            index: [pattern(500), pattern(16), Vec::new()],
        };
        let fixture = FixtureBuilder::new()
            .model(0x04, 0, 0, "chara/x/body.mdl", &regions)
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "chara/x/body.mdl").unwrap();

        let mut stream = BlockStream::open(lease, offset).unwrap();
        let table = stream.table().clone();
        assert_eq!(table.file_type(), FileType::Model);
        assert_eq!(table.prefix().len(), crate::format::ModelFileHeader::SIZE);

        let all = stream.read_all(&CancellationToken::new()).unwrap();
        let header: crate::format::ModelFileHeader =
            BinaryReader::new(&all).read_struct().unwrap();
        let vertex_sizes = header.vertex_sizes;
        let index_sizes = header.index_sizes;
        let vertex_offsets = header.vertex_offsets;
        let index_offsets = header.index_offsets;
        assert_eq!({ header.stack_size }, 300);
        assert_eq!({ header.runtime_size }, 20_000);
        assert_eq!(vertex_sizes, [17_000, 40, 0]);
        assert_eq!(index_sizes, [500, 16, 0]);
        assert_eq!(vertex_offsets[0], 0x44 + 300 + 20_000);
        assert_eq!(index_offsets[0], vertex_offsets[0] + 17_000);
        assert_eq!(vertex_offsets[2], 0);

        let sum: u64 = regions.total_len() as u64;
        assert_eq!(sum + 0x44, table.length());
        assert_eq!(all.len() as u64, table.length());
        assert_eq!(&all[0x44..0x44 + 300], &regions.stack[..]);
        let v0 = vertex_offsets[0] as usize;
        assert_eq!(&all[v0..v0 + 17_000], &regions.vertex[0][..]);
        let i1 = index_offsets[1] as usize;
        assert_eq!(&all[i1..i1 + 16], &regions.index[1][..]);
    }

    #[test]
    fn test_texture_prefix_and_lods() {
        let header = pattern(80);
        let lods = vec![pattern(40_000), pattern(10_000), pattern(2_500)];
        let fixture = FixtureBuilder::new()
            .texture(0x04, 0, 0, "chara/x/tex.tex", &header, &lods)
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "chara/x/tex.tex").unwrap();

        let mut stream = BlockStream::open(lease, offset).unwrap();
        assert_eq!(stream.table().file_type(), FileType::Texture);
        assert_eq!(stream.table().prefix(), &header[..]);

        let mut expected = header.clone();
        for lod in &lods {
            expected.extend_from_slice(lod);
        }
        assert_eq!(stream.read_all(&CancellationToken::new()).unwrap(), expected);

        stream.seek(SeekFrom::Start(75)).unwrap();
        let mut buf = [0u8; 10];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &expected[75..85]);
    }

    #[test]
    fn test_read_all_observes_cancellation() {
        let fixture = FixtureBuilder::new()
            .standard(0x0a, 0, 0, "exd/a.exd", &pattern(100))
            .build()
            .unwrap();
        let pool = DatPool::default();
        let (lease, offset) = fixture.open(&pool, "exd/a.exd").unwrap();

        let mut stream = BlockStream::open(lease, offset).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(stream.read_all(&cancel).unwrap_err().is_cancelled());
    }
}
