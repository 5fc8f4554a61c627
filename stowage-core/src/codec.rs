//! Binary envelope for index blobs and snapshot manifests.
//!
//! Wire format: `[8-byte magic][1-byte version][JSON payload]`. The magic is
//! checked before anything else is parsed, so foreign content written in
//! place of a blob (an XML error page, a truncated upload) is rejected as
//! `MalformedBlob` instead of being read as backup data.

use crate::error::{Result, StowageError};
use crate::model::{ChunkIndex, SnapshotManifest};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const MAGIC_LEN: usize = 8;
pub const HEADER_LEN: usize = MAGIC_LEN + 1;
pub const FORMAT_VERSION: u8 = 1;

pub const INDEX_MAGIC: &[u8; MAGIC_LEN] = b"STWIDX\x00\x01";
pub const MANIFEST_MAGIC: &[u8; MAGIC_LEN] = b"STWMAN\x00\x01";

pub fn encode_index(index: &ChunkIndex) -> Result<Vec<u8>> {
    encode_envelope(INDEX_MAGIC, index)
}

pub fn decode_index(bytes: &[u8]) -> Result<ChunkIndex> {
    decode_envelope(INDEX_MAGIC, "index blob", bytes)
}

pub fn encode_manifest(manifest: &SnapshotManifest) -> Result<Vec<u8>> {
    encode_envelope(MANIFEST_MAGIC, manifest)
}

pub fn decode_manifest(bytes: &[u8]) -> Result<SnapshotManifest> {
    decode_envelope(MANIFEST_MAGIC, "snapshot manifest", bytes)
}

fn encode_envelope<T: Serialize>(magic: &[u8; MAGIC_LEN], payload: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(payload)?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(magic);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_envelope<T: DeserializeOwned>(
    magic: &[u8; MAGIC_LEN],
    kind: &str,
    bytes: &[u8],
) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(StowageError::MalformedBlob(format!(
            "{} too short: {} bytes",
            kind,
            bytes.len()
        )));
    }

    if &bytes[..MAGIC_LEN] != magic {
        return Err(StowageError::MalformedBlob(format!("{} has wrong magic", kind)));
    }

    let version = bytes[MAGIC_LEN];
    if version != FORMAT_VERSION {
        return Err(StowageError::MalformedBlob(format!(
            "{} has unsupported format version {}",
            kind, version
        )));
    }

    serde_json::from_slice(&bytes[HEADER_LEN..]).map_err(|error| {
        StowageError::MalformedBlob(format!("{} payload is invalid: {}", kind, error))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ChunkDigest;
    use crate::model::{ArchiveRef, BackupType, ChunkEntry, parse_backup_time};

    fn sample_index() -> ChunkIndex {
        ChunkIndex::new(vec![
            ChunkEntry {
                digest: ChunkDigest::compute(b"first"),
                size: 4096,
            },
            ChunkEntry {
                digest: ChunkDigest::compute(b"second"),
                size: 117,
            },
            ChunkEntry {
                digest: ChunkDigest::compute(b"first"),
                size: 4096,
            },
        ])
    }

    fn assert_malformed<T: std::fmt::Debug>(result: Result<T>) {
        match result {
            Err(StowageError::MalformedBlob(_)) => {}
            other => panic!("expected MalformedBlob, got {:?}", other),
        }
    }

    #[test]
    fn test_index_round_trip() {
        let index = sample_index();
        let bytes = encode_index(&index).unwrap();
        assert_eq!(&bytes[..MAGIC_LEN], INDEX_MAGIC);
        assert_eq!(bytes[MAGIC_LEN], FORMAT_VERSION);
        assert_eq!(decode_index(&bytes).unwrap(), index);
    }

    #[test]
    fn test_empty_index_round_trip() {
        let index = ChunkIndex::default();
        let bytes = encode_index(&index).unwrap();
        assert_eq!(decode_index(&bytes).unwrap(), index);
    }

    #[test]
    fn test_manifest_round_trip() {
        let manifest = SnapshotManifest {
            backup_type: BackupType::Vm,
            backup_id: "100".to_string(),
            backup_time: parse_backup_time("2024-01-02T03:04:05Z").unwrap(),
            archives: vec![ArchiveRef {
                name: "drive-scsi0.img.idx".to_string(),
                size: 8192,
                chunk_count: 2,
            }],
        };
        let bytes = encode_manifest(&manifest).unwrap();
        assert_eq!(decode_manifest(&bytes).unwrap(), manifest);
    }

    #[test]
    fn test_altered_magic_is_rejected() {
        let mut bytes = encode_index(&sample_index()).unwrap();
        for position in 0..MAGIC_LEN {
            let original = bytes[position];
            bytes[position] ^= 0xff;
            assert_malformed(decode_index(&bytes));
            bytes[position] = original;
        }
    }

    #[test]
    fn test_missing_magic_is_rejected() {
        let bytes = encode_index(&sample_index()).unwrap();
        let payload_only = &bytes[HEADER_LEN..];
        assert_malformed(decode_index(payload_only));
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        let bytes = encode_index(&sample_index()).unwrap();
        for len in 0..HEADER_LEN {
            assert_malformed(decode_index(&bytes[..len]));
        }
    }

    #[test]
    fn test_xml_document_is_rejected() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>"#;
        assert_malformed(decode_index(xml));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let mut bytes = encode_index(&sample_index()).unwrap();
        bytes[MAGIC_LEN] = FORMAT_VERSION + 1;
        assert_malformed(decode_index(&bytes));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let bytes = encode_index(&sample_index()).unwrap();
        assert_malformed(decode_index(&bytes[..bytes.len() - 3]));
    }

    #[test]
    fn test_invalid_digest_in_payload_is_rejected() {
        let mut bytes = INDEX_MAGIC.to_vec();
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(br#"{"chunks":[{"digest":"not-hex","size":1}]}"#);
        assert_malformed(decode_index(&bytes));
    }

    #[test]
    fn test_manifest_is_not_an_index() {
        let manifest = SnapshotManifest {
            backup_type: BackupType::Host,
            backup_id: "db".to_string(),
            backup_time: parse_backup_time("2024-01-02T03:04:05Z").unwrap(),
            archives: Vec::new(),
        };
        let bytes = encode_manifest(&manifest).unwrap();
        assert_malformed(decode_index(&bytes));

        let index_bytes = encode_index(&sample_index()).unwrap();
        assert_malformed(decode_manifest(&index_bytes));
    }
}
