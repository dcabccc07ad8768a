//! Deterministic package hashing (spec §4.D).
//!
//! This crate performs no I/O beyond reading the bytes it is handed; it
//! never touches the network or a blob store.

use std::io::Read;

use sha2::{Digest, Sha256};
use skyport_types::StoreError;

/// Entries excluded from the ZIP manifest: directory markers and macOS
/// resource-fork junk that differs across otherwise-identical archives.
fn is_ignored_entry(path: &str) -> bool {
    path.ends_with('/') || path.starts_with("__MACOSX/") || path.contains("/__MACOSX/")
}

/// Hashes a single flat file's bytes: plain SHA-256, hex-encoded.
pub fn hash_flat_file(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// One entry in a ZIP bundle's manifest: archive-relative path paired with
/// the SHA-256 of that entry's decompressed contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestEntry {
    pub path: String,
    pub content_hash: String,
}

/// Reads every non-ignored entry out of a ZIP archive and hashes its
/// contents, without yet sorting or serialising them.
pub fn manifest_entries_from_zip<R: Read + std::io::Seek>(
    reader: R,
) -> Result<Vec<ManifestEntry>, StoreError> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| StoreError::MalformedRequest(format!("not a valid zip archive: {e}")))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| StoreError::MalformedRequest(format!("corrupt zip entry: {e}")))?;
        let path = file.name().to_string();
        if is_ignored_entry(&path) {
            continue;
        }
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| StoreError::MalformedRequest(format!("could not read zip entry '{path}': {e}")))?;
        entries.push(ManifestEntry {
            path,
            content_hash: hash_flat_file(&contents),
        });
    }
    Ok(entries)
}

/// Serialises manifest entries into the deterministic byte form every
/// reader (differ, client) must reproduce exactly: one `"path\0hash\n"`
/// record per entry, sorted by path so archive member order never affects
/// the result.
pub fn serialize_manifest(entries: &[ManifestEntry]) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort();

    let mut buf = Vec::new();
    for entry in &sorted {
        buf.extend_from_slice(entry.path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(entry.content_hash.as_bytes());
        buf.push(b'\n');
    }
    buf
}

/// The package hash for a ZIP bundle: SHA-256 of the serialised manifest.
/// Returns the manifest bytes too, since the release ingestor stores them
/// alongside the bundle for later recomputation (spec §4.D, §4.G).
pub fn hash_zip<R: Read + std::io::Seek>(reader: R) -> Result<(String, Vec<u8>), StoreError> {
    let entries = manifest_entries_from_zip(reader)?;
    let manifest = serialize_manifest(&entries);
    Ok((hash_flat_file(&manifest), manifest))
}
