//! SHA-256 content hashing, used for whole-file hashes, per-chunk stored-byte
//! hashes, and the deduplication key.

use sha2::{Digest, Sha256};
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt};

const STREAM_INCREMENT: usize = 4096;

/// Hash an in-memory buffer, hex-encoded.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a synchronous reader in 4 KiB increments.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_INCREMENT];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an async reader in 4 KiB increments (used for whole-file hashing of
/// uploaded temp files without blocking the executor).
pub async fn hash_async_reader<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_INCREMENT];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_known_vector() {
        // SHA-256("") well-known value.
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }

    #[test]
    fn hash_bytes_matches_hash_reader() {
        let data = b"the quick brown fox".repeat(1000);
        let a = hash_bytes(&data);
        let b = hash_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(a, b);
    }
}
