//! Typed views over file contents.
//!
//! [`Resource::from_source`] picks a parser from the file's magic, its
//! structural type and its extension, trying the most specific candidate
//! first. Parse failures fall through to the next candidate and finally to
//! [`GenericResource`], which accepts any bytes.

use sqpack_archive::format::ModelFileHeader;
use sqpack_archive::FileType;
use sqpack_common::BinaryReader;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Error, Result};

/// Everything a resource parser may look at.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSource<'a> {
    /// Logical file contents
    pub data: &'a [u8],
    /// Resolved file name (or placeholder)
    pub name: &'a str,
    /// Structural kind of the entry
    pub file_type: FileType,
    /// Declared logical length
    pub declared_length: u64,
}

impl ResourceSource<'_> {
    /// First four bytes, if present.
    pub fn magic(&self) -> Option<&[u8]> {
        self.data.get(..4)
    }

    /// Lowercased extension of the name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

/// A resource parser.
pub trait TypedResource: Sized {
    /// Short name used in errors.
    const KIND: &'static str;

    /// Parse the resource, failing if the bytes are not of this kind.
    fn parse(source: &ResourceSource<'_>) -> Result<Self>;
}

/// Stored header of a texture file.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct TextureHeader {
    pub attributes: u32,
    pub format: u32,
    pub width: u16,
    pub height: u16,
    pub depth: u16,
    pub mip_count: u8,
    pub array_size: u8,
    pub lod_offsets: [u32; 3],
    pub surface_offsets: [u32; 13],
}

/// A texture: its stored header and the surface data that follows.
#[derive(Debug, Clone)]
pub struct TextureResource {
    pub header: TextureHeader,
    pub data: Vec<u8>,
}

impl TextureResource {
    pub fn format(&self) -> u32 {
        self.header.format
    }

    pub fn width(&self) -> u16 {
        self.header.width
    }

    pub fn height(&self) -> u16 {
        self.header.height
    }

    pub fn depth(&self) -> u16 {
        self.header.depth
    }

    pub fn mip_count(&self) -> u8 {
        self.header.mip_count
    }

    pub fn array_size(&self) -> u8 {
        self.header.array_size
    }
}

impl TypedResource for TextureResource {
    const KIND: &'static str = "texture";

    fn parse(source: &ResourceSource<'_>) -> Result<Self> {
        if source.file_type != FileType::Texture {
            return Err(Error::resource(Self::KIND, format!("entry is {}", source.file_type)));
        }
        let header: TextureHeader = BinaryReader::new(source.data)
            .read_struct()
            .map_err(|e| Error::resource(Self::KIND, e))?;
        if header.width == 0 || header.height == 0 {
            return Err(Error::resource(Self::KIND, "zero sized surface"));
        }
        Ok(Self {
            header,
            data: source.data.to_vec(),
        })
    }
}

/// A model: the synthesized header and the region data.
#[derive(Debug, Clone)]
pub struct ModelResource {
    pub header: ModelFileHeader,
    pub data: Vec<u8>,
}

impl ModelResource {
    /// Bytes of the stack region.
    pub fn stack(&self) -> &[u8] {
        let start = ModelFileHeader::SIZE;
        let end = start + self.header.stack_size as usize;
        self.data.get(start..end).unwrap_or_default()
    }
}

impl TypedResource for ModelResource {
    const KIND: &'static str = "model";

    fn parse(source: &ResourceSource<'_>) -> Result<Self> {
        if source.file_type != FileType::Model {
            return Err(Error::resource(Self::KIND, format!("entry is {}", source.file_type)));
        }
        let header: ModelFileHeader = BinaryReader::new(source.data)
            .read_struct()
            .map_err(|e| Error::resource(Self::KIND, e))?;
        let regions = ModelFileHeader::SIZE as u64 + u64::from(header.stack_size) + u64::from(header.runtime_size);
        if regions > source.data.len() as u64 {
            return Err(Error::resource(Self::KIND, "regions exceed file length"));
        }
        Ok(Self {
            header,
            data: source.data.to_vec(),
        })
    }
}

/// Column definition of an Excel sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcelColumn {
    pub kind: u16,
    pub offset: u16,
}

/// Row range stored in one Excel page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcelPageRange {
    pub start_id: u32,
    pub row_count: u32,
}

/// An Excel sheet header (`.exh`), stored big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcelHeader {
    pub version: u16,
    pub row_size: u16,
    pub variant: u8,
    pub row_count: u32,
    pub columns: Vec<ExcelColumn>,
    pub pages: Vec<ExcelPageRange>,
    pub languages: Vec<u8>,
}

impl ExcelHeader {
    pub const MAGIC: &'static [u8; 4] = b"EXHF";
}

impl TypedResource for ExcelHeader {
    const KIND: &'static str = "excel header";

    fn parse(source: &ResourceSource<'_>) -> Result<Self> {
        parse_excel_header(source.data).map_err(|e| Error::resource(Self::KIND, e))
    }
}

fn parse_excel_header(data: &[u8]) -> sqpack_common::Result<ExcelHeader> {
    let mut reader = BinaryReader::new(data);
    reader.expect_magic(ExcelHeader::MAGIC)?;
    let version = reader.read_u16_be()?;
    let row_size = reader.read_u16_be()?;
    let column_count = reader.read_u16_be()?;
    let page_count = reader.read_u16_be()?;
    let language_count = reader.read_u16_be()?;
    reader.advance(3);
    let variant = reader.read_u8()?;
    reader.advance(2);
    let row_count = reader.read_u32_be()?;
    reader.advance(8);

    let mut columns = Vec::with_capacity(usize::from(column_count));
    for _ in 0..column_count {
        columns.push(ExcelColumn {
            kind: reader.read_u16_be()?,
            offset: reader.read_u16_be()?,
        });
    }
    let mut pages = Vec::with_capacity(usize::from(page_count));
    for _ in 0..page_count {
        pages.push(ExcelPageRange {
            start_id: reader.read_u32_be()?,
            row_count: reader.read_u32_be()?,
        });
    }
    let mut languages = Vec::with_capacity(usize::from(language_count));
    for _ in 0..language_count {
        languages.push(reader.read_u8()?);
        reader.advance(1);
    }

    Ok(ExcelHeader {
        version,
        row_size,
        variant,
        row_count,
        columns,
        pages,
        languages,
    })
}

/// An Excel data page (`.exd`): row ids and their offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcelPage {
    pub version: u16,
    pub rows: Vec<(u32, u32)>,
    pub data: Vec<u8>,
}

impl ExcelPage {
    pub const MAGIC: &'static [u8; 4] = b"EXDF";

    /// Row ids in stored order.
    pub fn row_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.iter().map(|&(id, _)| id)
    }
}

impl TypedResource for ExcelPage {
    const KIND: &'static str = "excel page";

    fn parse(source: &ResourceSource<'_>) -> Result<Self> {
        let parse = || -> sqpack_common::Result<ExcelPage> {
            let mut reader = BinaryReader::new(source.data);
            reader.expect_magic(Self::MAGIC)?;
            let version = reader.read_u16_be()?;
            reader.advance(2);
            let index_size = reader.read_u32_be()? as usize;
            reader.seek(0x20);

            let mut rows = Vec::with_capacity(index_size / 8);
            for _ in 0..index_size / 8 {
                rows.push((reader.read_u32_be()?, reader.read_u32_be()?));
            }
            Ok(ExcelPage {
                version,
                rows,
                data: source.data.to_vec(),
            })
        };
        parse().map_err(|e| Error::resource(Self::KIND, e))
    }
}

/// A UTF-8 text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextResource {
    pub text: String,
}

impl TextResource {
    const EXTENSIONS: &'static [&'static str] = &["txt", "xml", "lua", "json", "csv", "cfg"];
}

impl TypedResource for TextResource {
    const KIND: &'static str = "text";

    fn parse(source: &ResourceSource<'_>) -> Result<Self> {
        let ext = source.extension().unwrap_or_default();
        if !Self::EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::resource(Self::KIND, format!("extension {ext:?}")));
        }
        let data = source.data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(source.data);
        let text = std::str::from_utf8(data).map_err(|e| Error::resource(Self::KIND, e))?;
        if text.contains('\0') {
            return Err(Error::resource(Self::KIND, "contains NUL bytes"));
        }
        Ok(Self { text: text.to_string() })
    }
}

/// Raw bytes of any file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericResource {
    pub file_type: FileType,
    pub declared_length: u64,
    pub data: Vec<u8>,
}

impl TypedResource for GenericResource {
    const KIND: &'static str = "generic";

    fn parse(source: &ResourceSource<'_>) -> Result<Self> {
        Ok(Self {
            file_type: source.file_type,
            declared_length: source.declared_length,
            data: source.data.to_vec(),
        })
    }
}

/// The most specific view of a file that parsed.
#[derive(Debug, Clone)]
pub enum Resource {
    Texture(TextureResource),
    Model(ModelResource),
    ExcelHeader(ExcelHeader),
    ExcelPage(ExcelPage),
    Text(TextResource),
    Generic(GenericResource),
}

impl Resource {
    /// Try each candidate parser in order of specificity.
    pub fn from_source(source: &ResourceSource<'_>) -> Self {
        let magic = source.magic();
        if magic == Some(ExcelHeader::MAGIC.as_slice()) {
            if let Some(r) = attempt::<ExcelHeader>(source) {
                return Resource::ExcelHeader(r);
            }
        }
        if magic == Some(ExcelPage::MAGIC.as_slice()) {
            if let Some(r) = attempt::<ExcelPage>(source) {
                return Resource::ExcelPage(r);
            }
        }
        match source.file_type {
            FileType::Texture => {
                if let Some(r) = attempt::<TextureResource>(source) {
                    return Resource::Texture(r);
                }
            }
            FileType::Model => {
                if let Some(r) = attempt::<ModelResource>(source) {
                    return Resource::Model(r);
                }
            }
            _ => {}
        }
        if let Some(r) = attempt::<TextResource>(source) {
            return Resource::Text(r);
        }

        Resource::Generic(GenericResource {
            file_type: source.file_type,
            declared_length: source.declared_length,
            data: source.data.to_vec(),
        })
    }

    /// Short name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Texture(_) => TextureResource::KIND,
            Resource::Model(_) => ModelResource::KIND,
            Resource::ExcelHeader(_) => ExcelHeader::KIND,
            Resource::ExcelPage(_) => ExcelPage::KIND,
            Resource::Text(_) => TextResource::KIND,
            Resource::Generic(_) => GenericResource::KIND,
        }
    }
}

fn attempt<T: TypedResource>(source: &ResourceSource<'_>) -> Option<T> {
    match T::parse(source) {
        Ok(resource) => Some(resource),
        Err(err) => {
            tracing::trace!(file = source.name, kind = T::KIND, error = %err, "resource candidate rejected");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use zerocopy::FromZeros;

    use super::*;

    fn source<'a>(data: &'a [u8], name: &'a str, file_type: FileType) -> ResourceSource<'a> {
        ResourceSource {
            data,
            name,
            file_type,
            declared_length: data.len() as u64,
        }
    }

    fn excel_header() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"EXHF");
        for value in [3u16, 8, 2, 1, 1, 0] {
            data.extend_from_slice(&value.to_be_bytes());
        }
        data.extend_from_slice(&[0, 1, 0, 0]);
        data.extend_from_slice(&42u32.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        for (kind, offset) in [(0u16, 0u16), (7, 4)] {
            data.extend_from_slice(&kind.to_be_bytes());
            data.extend_from_slice(&offset.to_be_bytes());
        }
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&42u32.to_be_bytes());
        data.extend_from_slice(&[1, 0]);
        data
    }

    #[test]
    fn test_excel_header_by_magic() {
        let data = excel_header();
        let resource = Resource::from_source(&source(&data, "item.exh", FileType::Standard));
        let Resource::ExcelHeader(header) = resource else {
            panic!("expected excel header, got {}", resource.kind());
        };
        assert_eq!(header.version, 3);
        assert_eq!(header.row_size, 8);
        assert_eq!(header.variant, 1);
        assert_eq!(header.row_count, 42);
        assert_eq!(header.columns[1], ExcelColumn { kind: 7, offset: 4 });
        assert_eq!(header.pages, vec![ExcelPageRange { start_id: 0, row_count: 42 }]);
        assert_eq!(header.languages, vec![1]);
    }

    #[test]
    fn test_excel_page_rows() {
        let mut data = b"EXDF".to_vec();
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&16u32.to_be_bytes());
        data.resize(0x20, 0);
        for (id, offset) in [(1u32, 0x30u32), (5, 0x40)] {
            data.extend_from_slice(&id.to_be_bytes());
            data.extend_from_slice(&offset.to_be_bytes());
        }
        let page = ExcelPage::parse(&source(&data, "item_0_en.exd", FileType::Standard)).unwrap();
        assert_eq!(page.row_ids().collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn test_truncated_candidate_falls_back_to_generic() {
        let data = b"EXHF\0\x03";
        let resource = Resource::from_source(&source(data, "broken.exh", FileType::Standard));
        assert_eq!(resource.kind(), "generic");
    }

    #[test]
    fn test_text_by_extension() {
        let data = b"\xEF\xBB\xBFhello";
        match Resource::from_source(&source(data, "notes.TXT", FileType::Standard)) {
            Resource::Text(text) => assert_eq!(text.text, "hello"),
            other => panic!("unexpected {}", other.kind()),
        }
        assert_eq!(Resource::from_source(&source(data, "notes.bin", FileType::Standard)).kind(), "generic");
    }

    #[test]
    fn test_texture_header() {
        let mut header = TextureHeader::new_zeroed();
        header.format = 0x3420;
        header.width = 256;
        header.height = 128;
        header.depth = 1;
        header.mip_count = 9;
        header.array_size = 1;
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&[0xAA; 64]);

        let Resource::Texture(texture) = Resource::from_source(&source(&data, "a.tex", FileType::Texture)) else {
            panic!("expected texture");
        };
        assert_eq!((texture.width(), texture.height(), texture.mip_count()), (256, 128, 9));
        assert_eq!(texture.format(), 0x3420);

        // Wrong structural type is never parsed as a texture.
        assert!(TextureResource::parse(&source(&data, "a.tex", FileType::Standard)).is_err());
    }
}
