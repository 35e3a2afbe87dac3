//! Block decoding.

use std::io::Read;

use flate2::read::DeflateDecoder;
use sqpack_common::BinaryReader;

use crate::dat::slice;
use crate::format::BlockHeader;
use crate::{Error, Result};

/// Read the header of the block at `offset`.
pub fn read_block_header(data: &[u8], offset: u64) -> Result<BlockHeader> {
    let bytes = slice(data, offset, std::mem::size_of::<BlockHeader>() as u64)?;
    let header: BlockHeader = BinaryReader::new(bytes).read_struct()?;
    if (header.header_size as usize) < std::mem::size_of::<BlockHeader>() {
        return Err(Error::invalid_block(
            offset,
            format!("header size {} is too small", { header.header_size }),
        ));
    }
    Ok(header)
}

/// Decode the block at `offset` into `output`, replacing its contents.
///
/// Stored blocks are copied, everything else is inflated as raw deflate.
pub fn decode_block(data: &[u8], offset: u64, output: &mut Vec<u8>) -> Result<BlockHeader> {
    let header = read_block_header(data, offset)?;
    let payload = slice(
        data,
        offset + u64::from(header.header_size),
        u64::from(header.payload_size()),
    )?;

    output.clear();
    if header.is_stored() {
        output.extend_from_slice(payload);
    } else {
        decompress_deflate(payload, output)?;
    }

    let expected = header.decompressed_size as usize;
    if output.len() != expected {
        return Err(Error::invalid_block(
            offset,
            format!("decoded {} bytes, header declares {}", output.len(), expected),
        ));
    }
    tracing::trace!(offset, size = expected, stored = header.is_stored(), "decoded block");
    Ok(header)
}

/// Decompress DEFLATE-compressed data.
pub fn decompress_deflate(data: &[u8], output: &mut Vec<u8>) -> Result<()> {
    let mut decoder = DeflateDecoder::new(data);

    output.clear();
    decoder
        .read_to_end(output)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zerocopy::IntoBytes;

    fn block(payload: &[u8], compress: bool) -> Vec<u8> {
        let body = if compress {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload).unwrap();
            encoder.finish().unwrap()
        } else {
            payload.to_vec()
        };
        let header = BlockHeader {
            header_size: 16,
            reserved: 0,
            compressed_size: if compress { body.len() as u32 } else { BlockHeader::STORED },
            decompressed_size: payload.len() as u32,
        };
        let mut out = header.as_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_deflate_block() {
        let original = b"Hello, World! This is a test of DEFLATE compression.".repeat(8);
        let data = block(&original, true);

        let mut out = Vec::new();
        let header = decode_block(&data, 0, &mut out).unwrap();
        assert!(!header.is_stored());
        assert_eq!(out, original);
    }

    #[test]
    fn test_stored_block_at_offset() {
        let mut data = vec![0xAA; 32];
        data.extend(block(b"raw payload", false));

        let mut out = vec![1, 2, 3];
        decode_block(&data, 32, &mut out).unwrap();
        assert_eq!(out, b"raw payload");
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        // Claim a longer payload than the deflate stream produces.
        let mut data = block(b"abcdef", true);
        data[12..16].copy_from_slice(&10u32.to_le_bytes());

        let mut out = Vec::new();
        assert!(matches!(
            decode_block(&data, 0, &mut out),
            Err(Error::InvalidBlock { .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let data = block(b"abcdef", false);
        let mut out = Vec::new();
        assert!(decode_block(&data[..18], 0, &mut out).is_err());
    }
}
