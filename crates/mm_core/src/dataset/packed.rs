//! Packed dataset files (`.mmpk`): MessagePack, LZ4 compressed, followed by a
//! SHA-256 of the compressed payload.
//!
//! ```text
//! | "MMPK" | version u8 | lz4(msgpack) with prepended size | sha256 (32 bytes) |
//! ```

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{LocomotionError, Result};

pub const PACKED_EXTENSION: &str = "mmpk";
const MAGIC: &[u8; 4] = b"MMPK";
const FORMAT_VERSION: u8 = 1;
const DIGEST_LEN: usize = 32;

/// Summary of a packed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedMetadata {
    /// SHA-256 of the compressed payload (hex)
    pub checksum: String,
    pub original_size: u64,
    pub compressed_size: u64,
    /// compressed / original
    pub compression_ratio: f64,
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn encode<T: Serialize>(value: &T) -> Result<(Vec<u8>, PackedMetadata)> {
    let msgpack = rmp_serde::to_vec_named(value).map_err(|e| LocomotionError::Decode(e.to_string()))?;
    let compressed = lz4_flex::compress_prepend_size(&msgpack);

    let mut hasher = Sha256::new();
    hasher.update(&compressed);
    let digest = hasher.finalize();

    let mut out = Vec::with_capacity(MAGIC.len() + 1 + compressed.len() + DIGEST_LEN);
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&compressed);
    out.extend_from_slice(&digest);

    let metadata = PackedMetadata {
        checksum: format!("{digest:x}"),
        original_size: msgpack.len() as u64,
        compressed_size: compressed.len() as u64,
        compression_ratio: compressed.len() as f64 / msgpack.len().max(1) as f64,
    };
    Ok((out, metadata))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let header = MAGIC.len() + 1;
    if bytes.len() < header + DIGEST_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(LocomotionError::Decode("not a packed dataset".into()));
    }
    if bytes[MAGIC.len()] != FORMAT_VERSION {
        return Err(LocomotionError::Decode(format!(
            "unsupported packed version {}",
            bytes[MAGIC.len()]
        )));
    }
    let (payload, digest) = bytes[header..].split_at(bytes.len() - header - DIGEST_LEN);

    let found = hex_digest(payload);
    let expected: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    if found != expected {
        return Err(LocomotionError::ChecksumMismatch { expected, found });
    }

    let msgpack =
        lz4_flex::decompress_size_prepended(payload).map_err(|e| LocomotionError::Decode(e.to_string()))?;
    rmp_serde::from_slice(&msgpack).map_err(|e| LocomotionError::Decode(e.to_string()))
}

pub fn write_packed<T: Serialize>(value: &T, path: &Path) -> Result<PackedMetadata> {
    let (bytes, metadata) = encode(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    debug!(path = %path.display(), bytes = metadata.compressed_size, "wrote packed file");
    Ok(metadata)
}

pub fn read_packed<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing::{locomotion_dataset_def, SyntheticOptions};
    use crate::dataset::MotionDatasetDef;
    use tempfile::tempdir;

    #[test]
    fn test_pack_and_load_dataset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("walk.mmpk");
        let def = locomotion_dataset_def(&SyntheticOptions::default());

        let meta = write_packed(&def, &path).unwrap();
        assert!(meta.compressed_size > 0);
        assert_eq!(meta.checksum.len(), 64);

        let loaded: MotionDatasetDef = read_packed(&path).unwrap();
        assert_eq!(loaded, def);
    }

    #[test]
    fn test_corruption_detected() {
        let (mut bytes, _) = encode(&vec![1u32, 2, 3]).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let err = decode::<Vec<u32>>(&bytes).unwrap_err();
        assert!(matches!(err, LocomotionError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        let err = decode::<Vec<u32>>(b"{\"json\": true}").unwrap_err();
        assert!(matches!(err, LocomotionError::Decode(_)));
    }
}
