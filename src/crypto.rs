//! Password-based AES-256-GCM for the hidden blob
//!
//! The key is derived with HKDF-SHA256 from the password and a random 64-bit
//! salt that travels in the envelope. The stored blob is `iv || ciphertext || tag`.
//! The associated data binds the blob to the size fields of the envelope, so a
//! header edited after embedding fails authentication.

use crate::envelope::SALT_LEN;
use crate::error::{Result, StegoError};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Bytes added to the plaintext by [`encrypt`]
pub const OVERHEAD: usize = IV_LEN + TAG_LEN;

/// Domain separator for the HKDF expand step
const KEY_INFO: &[u8] = b"BITVEIL_HKDF_AES256_v1";

/// Two packed bytes: low byte of the compressed size, low byte of the original size.
pub fn associated_data(compressed_len: u64, original_len: u64) -> [u8; 2] {
    [compressed_len as u8, original_len as u8]
}

fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; 32]> {
    type HkdfSha256 = Hkdf<Sha256>;

    let hk = HkdfSha256::new(Some(&salt[..]), password.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(KEY_INFO, &mut okm[..])
        .expect("HKDF expand should never fail with valid length");
    okm
}

/// Encrypt under a fresh salt and IV; returns `(salt, iv || ciphertext || tag)`.
pub fn encrypt(plaintext: &[u8], aad: &[u8], password: &str) -> Result<([u8; SALT_LEN], Vec<u8>)> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&iv), Payload { msg: plaintext, aad })
        .map_err(|_| StegoError::CryptoFailure)?;

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok((salt, blob))
}

/// Inverse of [`encrypt`]. Any authentication failure is [`StegoError::CryptoFailure`].
pub fn decrypt(blob: &[u8], salt: &[u8; SALT_LEN], aad: &[u8], password: &str) -> Result<Vec<u8>> {
    if blob.len() < OVERHEAD {
        return Err(StegoError::CryptoFailure);
    }
    let (iv, ciphertext) = blob.split_at(IV_LEN);
    let key = derive_key(password, salt);
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key[..]));
    cipher
        .decrypt(GenericArray::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| StegoError::CryptoFailure)
}
