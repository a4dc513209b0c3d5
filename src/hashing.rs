//! Hashing System - MD5 Checksums for Published Artifacts
//!
//! The MD5 checksum is kept for the download page and the ledger only.
//! It never decides whether a document changed; raster comparison does.

use md5::{Digest, Md5};
use sha2::Sha256;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read size used when streaming an artifact through the hasher.
pub const CHUNK_SIZE: usize = 4096;

/// Compute the MD5 checksum of a stream, return hex string.
///
/// The stream is consumed in `CHUNK_SIZE` pieces so memory use does not
/// grow with the artifact.
pub fn checksum_reader<R: Read>(reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    for_each_chunk(reader, |chunk| hasher.update(chunk))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Read a whole stream and checksum it in the same pass.
///
/// The returned checksum always describes exactly the returned bytes.
pub fn read_with_checksum<R: Read>(reader: R) -> io::Result<(Vec<u8>, String)> {
    let mut hasher = Md5::new();
    let mut bytes = Vec::new();
    for_each_chunk(reader, |chunk| {
        hasher.update(chunk);
        bytes.extend_from_slice(chunk);
    })?;
    Ok((bytes, hex::encode(hasher.finalize())))
}

/// Compute the MD5 checksum of a file on disk
pub fn checksum_file(path: &Path) -> io::Result<String> {
    checksum_reader(File::open(path)?)
}

/// Read a file once, returning its bytes and their checksum.
pub fn read_file_with_checksum(path: &Path) -> io::Result<(Vec<u8>, String)> {
    read_with_checksum(File::open(path)?)
}

fn for_each_chunk<R: Read>(mut reader: R, mut sink: impl FnMut(&[u8])) -> io::Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink(&buf[..n]);
    }
}

/// Compute the MD5 checksum of bytes already in memory
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Filesystem-safe key for per-artifact scratch directories.
///
/// Derived from the artifact id, never from its filename, so two
/// artifacts sharing a filename never share scratch space.
pub fn scratch_key(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    hex::encode(&digest[..12])
}
