//! SqPack path hashing.
//!
//! The client identifies folders and files by the CRC32 (IEEE polynomial,
//! without the final inversion) of their ASCII-lowercased path. Folder
//! paths are hashed without leading or trailing slashes.

/// Compute the raw archive CRC of a byte slice (no case folding).
#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    !crc32fast::hash(data)
}

/// Compute the archive hash of a string after ASCII lowercasing.
pub fn hash_str(s: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64];
    for chunk in s.as_bytes().chunks(buf.len()) {
        let buf = &mut buf[..chunk.len()];
        buf.copy_from_slice(chunk);
        buf.make_ascii_lowercase();
        hasher.update(buf);
    }
    !hasher.finalize()
}

/// Hash of a folder path (`chara/equipment/`, `/chara/equipment`, ...).
#[inline]
pub fn folder_hash(path: &str) -> u32 {
    hash_str(trim_slashes(path))
}

/// Hash of a single file name.
#[inline]
pub fn file_name_hash(name: &str) -> u32 {
    hash_str(name)
}

/// Hash of a complete `folder/name` path, as stored by second-generation indexes.
#[inline]
pub fn full_path_hash(path: &str) -> u32 {
    hash_str(trim_slashes(path))
}

/// Strip leading and trailing `/` separators.
#[inline]
pub fn trim_slashes(path: &str) -> &str {
    path.trim_matches('/')
}

/// Lowercase, convert `\` separators to `/` and trim slashes.
pub fn normalize_path(path: &str) -> String {
    trim_slashes(&path.replace('\\', "/")).to_ascii_lowercase()
}

/// Split a normalized path into its folder and file name parts.
///
/// A path without a separator lives in the root folder (`""`).
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash_is_root() {
        assert_eq!(hash_str(""), 0xFFFF_FFFF);
        assert_eq!(folder_hash("/"), 0xFFFF_FFFF);
    }

    #[test]
    fn test_known_hash() {
        // CRC32("123456789") = 0xCBF43926, stored without the final inversion.
        assert_eq!(hash_bytes(b"123456789"), !0xCBF4_3926);
    }

    #[test]
    fn test_case_and_slashes_ignored() {
        let canonical = folder_hash("chara/equipment/e0001");
        assert_eq!(folder_hash("Chara/Equipment/E0001/"), canonical);
        assert_eq!(folder_hash("/CHARA/equipment/e0001"), canonical);
        assert_eq!(hash_str("chara/equipment/e0001"), canonical);
    }

    #[test]
    fn test_long_input_chunking() {
        let long = "A".repeat(200);
        assert_eq!(hash_str(&long), hash_bytes(&"a".repeat(200).into_bytes()));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("chara/x/y.mdl"), ("chara/x", "y.mdl"));
        assert_eq!(split_path("root.txt"), ("", "root.txt"));
        assert_eq!(normalize_path("\\Chara\\X\\Y.MDL"), "chara/x/y.mdl");
    }
}
