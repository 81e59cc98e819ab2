//! Authenticated symmetric encryption and compression for chunk payloads.
//!
//! The wire format is a Fernet-compatible token: a version byte, an 8-byte
//! big-endian unix timestamp, a 16-byte IV, AES-128-CBC ciphertext, and a
//! trailing HMAC-SHA256 over everything before it. The key material is
//! derived once via PBKDF2-HMAC-SHA256 (100,000 iterations) from a fixed
//! passphrase and a persisted random salt, split into a signing half and an
//! encryption half exactly as the Fernet spec does.

use crate::error::CoreError;
use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::io::Read;
use std::path::Path;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const FERNET_VERSION: u8 = 0x80;
const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;

/// Holds the derived signing/encryption halves of the coordinator's key.
/// Immutable after construction, safe to share behind an `Arc`.
#[derive(Clone)]
pub struct Cipher {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

impl Cipher {
    /// Load the persisted key, deriving and persisting it on first run.
    pub fn load_or_init(
        key_file: &Path,
        salt_file: &Path,
        passphrase: &str,
    ) -> Result<Self, CoreError> {
        let key_bytes = if key_file.exists() {
            let encoded = std::fs::read_to_string(key_file)
                .map_err(|e| CoreError::Crypto(format!("reading key file: {e}")))?;
            base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE, encoded.trim())
                .map_err(|e| CoreError::Crypto(format!("decoding key file: {e}")))?
        } else {
            let salt = if salt_file.exists() {
                std::fs::read(salt_file)
                    .map_err(|e| CoreError::Crypto(format!("reading salt file: {e}")))?
            } else {
                let mut salt = vec![0u8; SALT_LEN];
                rand::rng().fill_bytes(&mut salt);
                std::fs::write(salt_file, &salt)
                    .map_err(|e| CoreError::Crypto(format!("writing salt file: {e}")))?;
                salt
            };

            let mut derived = [0u8; 32];
            pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut derived);

            let encoded =
                base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE, derived);
            std::fs::write(key_file, &encoded)
                .map_err(|e| CoreError::Crypto(format!("writing key file: {e}")))?;
            derived.to_vec()
        };

        if key_bytes.len() != 32 {
            return Err(CoreError::Crypto("derived key must be 32 bytes".into()));
        }
        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&key_bytes[..16]);
        encryption_key.copy_from_slice(&key_bytes[16..]);

        Ok(Cipher {
            signing_key,
            encryption_key,
        })
    }

    /// Compress then encrypt, in that order.
    pub fn encrypt_compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CoreError> {
        let compressed = deflate(data, level)?;
        self.encrypt(&compressed)
    }

    /// Decrypt then decompress, in that order.
    pub fn decrypt_decompress(&self, token: &[u8]) -> Result<Vec<u8>, CoreError> {
        let compressed = self.decrypt(token)?;
        inflate(&compressed)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        let timestamp = now_unix_secs();

        let ciphertext =
            Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut signed = Vec::with_capacity(1 + 8 + IV_LEN + ciphertext.len());
        signed.push(FERNET_VERSION);
        signed.extend_from_slice(&timestamp.to_be_bytes());
        signed.extend_from_slice(&iv);
        signed.extend_from_slice(&ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| CoreError::Crypto(format!("bad signing key: {e}")))?;
        mac.update(&signed);
        let tag = mac.finalize().into_bytes();

        signed.extend_from_slice(&tag);
        Ok(signed)
    }

    fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>, CoreError> {
        if token.len() < 1 + 8 + IV_LEN + 32 {
            return Err(CoreError::Corruption("token too short".into()));
        }
        let (signed, tag) = token.split_at(token.len() - 32);
        if signed[0] != FERNET_VERSION {
            return Err(CoreError::Corruption("unsupported token version".into()));
        }

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| CoreError::Crypto(format!("bad signing key: {e}")))?;
        mac.update(signed);
        mac.verify_slice(tag)
            .map_err(|_| CoreError::Corruption("token authentication failed".into()))?;

        let iv = &signed[9..9 + IV_LEN];
        let ciphertext = &signed[9 + IV_LEN..];

        Aes128CbcDec::new(&self.encryption_key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CoreError::Corruption(format!("padding/decrypt failure: {e}")))
    }
}

fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>, CoreError> {
    let mut encoder = ZlibEncoder::new(data, Compression::new(level.min(9)));
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::Crypto(format!("compression failed: {e}")))?;
    Ok(out)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CoreError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::Corruption(format!("decompression failed: {e}")))?;
    Ok(out)
}

fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_cipher() -> Cipher {
        let dir = tempdir().unwrap();
        Cipher::load_or_init(
            &dir.path().join("key"),
            &dir.path().join("salt"),
            "test-passphrase",
        )
        .unwrap()
    }

    #[test]
    fn round_trips_through_compress_and_encrypt() {
        let cipher = test_cipher();
        let plaintext = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let token = cipher.encrypt_compress(&plaintext, 6).unwrap();
        let recovered = cipher.decrypt_decompress(&token).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn detects_tampering() {
        let cipher = test_cipher();
        let mut token = cipher.encrypt_compress(b"hello world", 6).unwrap();
        let last = token.len() - 1;
        token[last] ^= 0xff;
        assert!(cipher.decrypt_decompress(&token).is_err());
    }

    #[test]
    fn persists_key_across_loads() {
        let dir = tempdir().unwrap();
        let key_file = dir.path().join("key");
        let salt_file = dir.path().join("salt");
        let a = Cipher::load_or_init(&key_file, &salt_file, "pw").unwrap();
        let b = Cipher::load_or_init(&key_file, &salt_file, "pw").unwrap();
        let token = a.encrypt_compress(b"data", 4).unwrap();
        assert_eq!(b.decrypt_decompress(&token).unwrap(), b"data");
    }
}
