//! On-disk archive fixtures.
//!
//! [`FixtureBuilder`] writes a small but well-formed `sqpack` directory into a
//! temporary folder: one index and one dat file per chunk, with entries of
//! every file type. Downstream crates enable the `testing` feature to build
//! their trees and searches over real files.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use rustc_hash::FxHashMap;
use sqpack_common::hash::{file_name_hash, folder_hash, normalize_path, split_path};
use tempfile::TempDir;
use zerocopy::{FromZeros, IntoBytes};

use crate::catalog::IndexId;
use crate::dat::{DatLease, DatPool};
use crate::format::{
    BlockHeader, FileEntryHeader, FileType, HashEntry, IndexHeader, LodBlock, Locator,
    ModelFileHeader, ModelLocator, ModelRegion, SqPackHeader, StandardBlockInfo, SynonymEntry,
    SPACE_UNIT,
};
use crate::Result;

/// Raw contents of each model region.
#[derive(Debug, Clone, Default)]
pub struct ModelRegions {
    pub stack: Vec<u8>,
    pub runtime: Vec<u8>,
    pub vertex: [Vec<u8>; 3],
    pub edge: [Vec<u8>; 3],
    pub index: [Vec<u8>; 3],
}

impl ModelRegions {
    /// Bytes of one region.
    pub fn region(&self, region: ModelRegion) -> &[u8] {
        match region {
            ModelRegion::Stack => &self.stack,
            ModelRegion::Runtime => &self.runtime,
            ModelRegion::Vertex(lod) => &self.vertex[lod],
            ModelRegion::Edge(lod) => &self.edge[lod],
            ModelRegion::Index(lod) => &self.index[lod],
        }
    }

    /// Combined length of all regions.
    pub fn total_len(&self) -> usize {
        ModelRegion::LOGICAL_ORDER
            .iter()
            .map(|&r| self.region(r).len())
            .sum()
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Empty,
    Standard { data: Vec<u8>, declared: u64 },
    Model(ModelRegions),
    Texture { header: Vec<u8>, lods: Vec<Vec<u8>> },
}

#[derive(Debug, Clone)]
struct PendingEntry {
    id: IndexId,
    path: String,
    payload: Payload,
    synonym: bool,
}

/// How written blocks are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockMode {
    /// Raw deflate
    #[default]
    Deflate,
    /// Uncompressed, marked with [`BlockHeader::STORED`]
    Stored,
    /// Deflate and stored in turn, starting with deflate in every run of blocks
    Alternating,
}

impl BlockMode {
    fn stored(self, block: usize) -> bool {
        match self {
            BlockMode::Deflate => false,
            BlockMode::Stored => true,
            BlockMode::Alternating => block % 2 == 1,
        }
    }
}

/// Collects entries and writes them out as index and dat files.
#[derive(Debug, Clone, Default)]
pub struct FixtureBuilder {
    entries: Vec<PendingEntry>,
    block_mode: BlockMode,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose how blocks are encoded. Defaults to deflate.
    pub fn block_mode(mut self, mode: BlockMode) -> Self {
        self.block_mode = mode;
        self
    }

    /// Add a standard file.
    pub fn standard(self, category: u8, expansion: u8, chunk: u8, path: &str, data: &[u8]) -> Self {
        self.standard_with_length(category, expansion, chunk, path, data, data.len() as u64)
    }

    /// Add a standard file whose header declares `declared` bytes.
    pub fn standard_with_length(
        self,
        category: u8,
        expansion: u8,
        chunk: u8,
        path: &str,
        data: &[u8],
        declared: u64,
    ) -> Self {
        let payload = Payload::Standard {
            data: data.to_vec(),
            declared,
        };
        self.push(category, expansion, chunk, path, payload, false)
    }

    /// Add a standard file listed through the synonym table.
    pub fn synonym(self, category: u8, expansion: u8, chunk: u8, path: &str, data: &[u8]) -> Self {
        let payload = Payload::Standard {
            data: data.to_vec(),
            declared: data.len() as u64,
        };
        self.push(category, expansion, chunk, path, payload, true)
    }

    /// Add an empty placeholder entry.
    pub fn empty(self, category: u8, expansion: u8, chunk: u8, path: &str) -> Self {
        self.push(category, expansion, chunk, path, Payload::Empty, false)
    }

    /// Add a model file.
    pub fn model(self, category: u8, expansion: u8, chunk: u8, path: &str, regions: &ModelRegions) -> Self {
        self.push(category, expansion, chunk, path, Payload::Model(regions.clone()), false)
    }

    /// Add a texture file with a stored header and one payload per LOD.
    pub fn texture(
        self,
        category: u8,
        expansion: u8,
        chunk: u8,
        path: &str,
        header: &[u8],
        lods: &[Vec<u8>],
    ) -> Self {
        let payload = Payload::Texture {
            header: header.to_vec(),
            lods: lods.to_vec(),
        };
        self.push(category, expansion, chunk, path, payload, false)
    }

    fn push(
        mut self,
        category: u8,
        expansion: u8,
        chunk: u8,
        path: &str,
        payload: Payload,
        synonym: bool,
    ) -> Self {
        self.entries.push(PendingEntry {
            id: IndexId::new(category, expansion, chunk),
            path: normalize_path(path),
            payload,
            synonym,
        });
        self
    }

    /// Write the archive into a fresh temporary directory.
    pub fn build(self) -> Result<Fixture> {
        let dir = TempDir::new()?;
        let sqpack = dir.path().join("sqpack");

        let mut chunks: BTreeMap<IndexId, Vec<&PendingEntry>> = BTreeMap::new();
        for entry in &self.entries {
            chunks.entry(entry.id).or_default().push(entry);
        }

        let mut locators = FxHashMap::default();
        for (id, entries) in chunks {
            let folder = sqpack.join(expansion_folder(id.expansion()));
            fs::create_dir_all(&folder)?;

            let mut dat = pack_header(SqPackHeader::TYPE_DAT);
            dat.resize(2 * SqPackHeader::BLOCK_SIZE as usize, 0);

            let mut hashes = Vec::new();
            let mut synonyms = Vec::new();
            for entry in entries {
                pad_to(&mut dat, SPACE_UNIT as usize);
                let locator = Locator::new(0, dat.len() as u64);
                dat.extend(encode_entry(&entry.payload, self.block_mode)?);

                let (folder_path, name) = split_path(&entry.path);
                let key = (folder_hash(folder_path), file_name_hash(name));
                if entry.synonym {
                    let conflict_index = synonyms.iter().filter(|(k, _, _)| *k == key).count() as u32;
                    synonyms.push((key, locator, entry.path.clone()));
                    if conflict_index == 0 {
                        hashes.push((key, Locator(locator.0 | 1)));
                    }
                } else {
                    hashes.push((key, locator));
                }
                locators.insert(entry.path.clone(), (id, locator));
            }
            pad_to(&mut dat, SPACE_UNIT as usize);

            let stem = format!("{id}.win32");
            fs::write(folder.join(format!("{stem}.dat0")), &dat)?;
            fs::write(folder.join(format!("{stem}.index")), encode_index(hashes, &synonyms))?;
        }

        Ok(Fixture {
            dir,
            locators,
        })
    }
}

/// A written archive. The directory is removed on drop.
#[derive(Debug)]
pub struct Fixture {
    dir: TempDir,
    locators: FxHashMap<String, (IndexId, Locator)>,
}

impl Fixture {
    /// The `sqpack` directory.
    pub fn sqpack_dir(&self) -> PathBuf {
        self.dir.path().join("sqpack")
    }

    /// Path of a chunk's index file.
    pub fn index_path(&self, category: u8, expansion: u8, chunk: u8) -> PathBuf {
        let id = IndexId::new(category, expansion, chunk);
        self.sqpack_dir()
            .join(expansion_folder(expansion))
            .join(format!("{id}.win32.index"))
    }

    /// Path of a chunk's only dat file.
    pub fn dat_path(&self, category: u8, expansion: u8, chunk: u8) -> PathBuf {
        self.index_path(category, expansion, chunk).with_extension("dat0")
    }

    /// Index id and locator of an entry written under `path`.
    pub fn locator(&self, path: &str) -> Option<(IndexId, Locator)> {
        self.locators.get(&normalize_path(path)).copied()
    }

    /// Lease the dat file holding `path` and return the entry offset.
    pub fn open(&self, pool: &DatPool, path: &str) -> Option<(DatLease, u64)> {
        let (id, locator) = self.locator(path)?;
        let dat = self.dat_path(id.category(), id.expansion(), id.chunk());
        Some((pool.lease(dat), locator.offset()))
    }
}

fn expansion_folder(expansion: u8) -> String {
    if expansion == 0 {
        "ffxiv".to_string()
    } else {
        format!("ex{expansion}")
    }
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    let len = buf.len().next_multiple_of(align);
    buf.resize(len, 0);
}

fn align(len: usize) -> usize {
    len.next_multiple_of(SPACE_UNIT as usize)
}

fn pack_header(pack_type: u32) -> Vec<u8> {
    let mut header = SqPackHeader::new_zeroed();
    header.magic = SqPackHeader::MAGIC;
    header.size = SqPackHeader::BLOCK_SIZE;
    header.version = 1;
    header.pack_type = pack_type;

    let mut out = header.as_bytes().to_vec();
    out.resize(SqPackHeader::BLOCK_SIZE as usize, 0);
    out
}

fn encode_index(mut hashes: Vec<((u32, u32), Locator)>, synonyms: &[((u32, u32), Locator, String)]) -> Vec<u8> {
    hashes.sort_by_key(|(key, _)| *key);

    let table_offset = 2 * SqPackHeader::BLOCK_SIZE;
    let table_size = (hashes.len() * std::mem::size_of::<HashEntry>()) as u32;
    let synonym_size = ((synonyms.len() + 1) * std::mem::size_of::<SynonymEntry>()) as u32;

    let mut header = IndexHeader::new_zeroed();
    header.size = SqPackHeader::BLOCK_SIZE;
    header.version = 1;
    header.hash_table_offset = table_offset;
    header.hash_table_size = table_size;
    header.dat_file_count = 1;
    header.synonym_offset = table_offset + table_size;
    header.synonym_size = synonym_size;

    let mut out = pack_header(SqPackHeader::TYPE_INDEX);
    out.extend_from_slice(header.as_bytes());

    for ((folder_hash, file_hash), locator) in hashes {
        let entry = HashEntry {
            file_hash,
            folder_hash,
            locator: locator.0,
            padding: 0,
        };
        out.extend_from_slice(entry.as_bytes());
    }

    let mut seen: FxHashMap<(u32, u32), u32> = FxHashMap::default();
    for ((path_hash, name_hash), locator, path) in synonyms {
        let conflict = seen.entry((*path_hash, *name_hash)).or_insert(0);
        let mut entry = SynonymEntry::new_zeroed();
        entry.name_hash = *name_hash;
        entry.path_hash = *path_hash;
        entry.locator = locator.0;
        entry.conflict_index = *conflict;
        let bytes = path.as_bytes();
        let len = bytes.len().min(entry.name.len() - 1);
        entry.name[..len].copy_from_slice(&bytes[..len]);
        out.extend_from_slice(entry.as_bytes());
        *conflict += 1;
    }
    let mut terminator = SynonymEntry::new_zeroed();
    terminator.conflict_index = SynonymEntry::TERMINATOR;
    out.extend_from_slice(terminator.as_bytes());
    out
}

/// A block as written: header, payload and padding.
struct EncodedBlock {
    bytes: Vec<u8>,
    decompressed: usize,
}

fn encode_blocks(data: &[u8], mode: BlockMode) -> Result<Vec<EncodedBlock>> {
    data.chunks(BlockHeader::MAX_DECOMPRESSED)
        .enumerate()
        .map(|(i, chunk)| encode_block(chunk, mode.stored(i)))
        .collect()
}

fn encode_block(payload: &[u8], stored: bool) -> Result<EncodedBlock> {
    let body = if stored {
        payload.to_vec()
    } else {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload)?;
        encoder.finish()?
    };
    let header = BlockHeader {
        header_size: std::mem::size_of::<BlockHeader>() as u32,
        reserved: 0,
        compressed_size: if stored { BlockHeader::STORED } else { body.len() as u32 },
        decompressed_size: payload.len() as u32,
    };

    let mut bytes = header.as_bytes().to_vec();
    bytes.extend_from_slice(&body);
    pad_to(&mut bytes, SPACE_UNIT as usize);
    Ok(EncodedBlock {
        bytes,
        decompressed: payload.len(),
    })
}

fn entry_header(file_type: FileType, header_size: usize, body_len: usize, declared: u64, count: u32) -> FileEntryHeader {
    let units = ((header_size + body_len) as u64 / SPACE_UNIT) as u32;
    FileEntryHeader {
        header_size: header_size as u32,
        file_type: file_type as u32,
        decompressed_size: declared as u32,
        reserved_units: units,
        occupied_units: units,
        block_count: count,
    }
}

fn encode_entry(payload: &Payload, mode: BlockMode) -> Result<Vec<u8>> {
    let header_len = std::mem::size_of::<FileEntryHeader>();
    let mut out = Vec::new();

    match payload {
        Payload::Empty => {
            let header = entry_header(FileType::Empty, align(header_len), 0, 0, 0);
            out.extend_from_slice(header.as_bytes());
        }
        Payload::Standard { data, declared } => {
            let blocks = encode_blocks(data, mode)?;
            let header_size = align(header_len + blocks.len() * std::mem::size_of::<StandardBlockInfo>());
            let body_len: usize = blocks.iter().map(|b| b.bytes.len()).sum();

            let header = entry_header(FileType::Standard, header_size, body_len, *declared, blocks.len() as u32);
            out.extend_from_slice(header.as_bytes());
            let mut offset = 0;
            for block in &blocks {
                let info = StandardBlockInfo {
                    offset: offset as u32,
                    compressed_size: block.bytes.len() as u16,
                    decompressed_size: block.decompressed as u16,
                };
                out.extend_from_slice(info.as_bytes());
                offset += block.bytes.len();
            }
            out.resize(header_size, 0);
            for block in blocks {
                out.extend(block.bytes);
            }
        }
        Payload::Model(regions) => {
            let mut locator = ModelLocator::new_zeroed();
            locator.lod_count = 3;
            let mut sizes: Vec<u16> = Vec::new();
            let mut body = Vec::new();

            let mut decompressed_sizes = [0u32; ModelRegion::COUNT];
            let mut compressed_sizes = [0u32; ModelRegion::COUNT];
            let mut offsets = [0u32; ModelRegion::COUNT];
            let mut first_blocks = [0u16; ModelRegion::COUNT];
            let mut block_counts = [0u16; ModelRegion::COUNT];
            for region in ModelRegion::LOGICAL_ORDER {
                let slot = region.slot();
                let blocks = encode_blocks(regions.region(region), mode)?;
                offsets[slot] = body.len() as u32;
                first_blocks[slot] = sizes.len() as u16;
                block_counts[slot] = blocks.len() as u16;
                decompressed_sizes[slot] = regions.region(region).len() as u32;
                for block in blocks {
                    compressed_sizes[slot] += block.bytes.len() as u32;
                    sizes.push(block.bytes.len() as u16);
                    body.extend(block.bytes);
                }
            }
            locator.decompressed_sizes = decompressed_sizes;
            locator.compressed_sizes = compressed_sizes;
            locator.offsets = offsets;
            locator.first_blocks = first_blocks;
            locator.block_counts = block_counts;

            let header_size = align(header_len + std::mem::size_of::<ModelLocator>() + sizes.len() * 2);
            let declared = (ModelFileHeader::SIZE + regions.total_len()) as u64;
            let header = entry_header(FileType::Model, header_size, body.len(), declared, 5);
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(locator.as_bytes());
            out.extend_from_slice(sizes.as_bytes());
            out.resize(header_size, 0);
            out.extend(body);
        }
        Payload::Texture { header: tex_header, lods } => {
            let mut body = tex_header.clone();
            let mut records = Vec::new();
            let mut sizes: Vec<u16> = Vec::new();
            for lod in lods {
                let blocks = encode_blocks(lod, mode)?;
                let start = body.len();
                let first_block = sizes.len() as u32;
                for block in &blocks {
                    sizes.push(block.bytes.len() as u16);
                    body.extend_from_slice(&block.bytes);
                }
                records.push(LodBlock {
                    compressed_offset: start as u32,
                    compressed_size: (body.len() - start) as u32,
                    decompressed_size: lod.len() as u32,
                    first_block,
                    block_count: blocks.len() as u32,
                });
            }
            pad_to(&mut body, SPACE_UNIT as usize);

            let header_size = align(
                header_len + records.len() * std::mem::size_of::<LodBlock>() + sizes.len() * 2,
            );
            let declared = (tex_header.len() + lods.iter().map(Vec::len).sum::<usize>()) as u64;
            let header = entry_header(FileType::Texture, header_size, body.len(), declared, records.len() as u32);
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(records.as_bytes());
            out.extend_from_slice(sizes.as_bytes());
            out.resize(header_size, 0);
            out.extend(body);
        }
    }

    pad_to(&mut out, SPACE_UNIT as usize);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexFile;

    #[test]
    fn test_layout() {
        let fixture = FixtureBuilder::new()
            .standard(0x0a, 0, 0, "exd/root.exl", b"EXLT")
            .standard(0x0a, 0, 0, "exd/item.exh", b"EXHF")
            .build()
            .unwrap();

        assert!(fixture.dat_path(0x0a, 0, 0).ends_with("ffxiv/0a0000.win32.dat0"));
        let (id, first) = fixture.locator("exd/root.exl").unwrap();
        let (_, second) = fixture.locator("EXD/Item.exh").unwrap();
        assert_eq!(id, IndexId::new(0x0a, 0, 0));
        assert_eq!(first.offset(), 0x800);
        assert_eq!(second.offset() % SPACE_UNIT, 0);
        assert!(second.offset() > first.offset());

        let index = IndexFile::open(fixture.index_path(0x0a, 0, 0)).unwrap();
        let folders: Vec<u32> = index.entries().iter().map(|e| e.folder_hash).collect();
        assert_eq!(folders, vec![folder_hash("exd"); 2]);
    }
}
