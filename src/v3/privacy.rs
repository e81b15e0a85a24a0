//! Privacy (encryption) protocols for SNMPv3 (RFC 3414, RFC 3826).
//!
//! Implements DES-CBC and AES-128-CFB.
//!
//! # Salt/IV construction
//!
//! ## DES-CBC
//! - Salt (privParameters): engineBoots (4 bytes) || counter (4 bytes)
//! - IV: pre-IV XOR salt (pre-IV is the last 8 bytes of the 16-byte key)
//!
//! ## AES-128-CFB
//! - Salt (privParameters): 64-bit counter
//! - IV: engineBoots (4) || engineTime (4) || salt (8), concatenated

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{auth, AuthProtocol, PrivProtocol};
use crate::error::{CryptoErrorKind, Error, Result};

/// Generate a random non-zero u64 for salt initialization.
fn random_nonzero_u64() -> u64 {
    let mut buf = [0u8; 8];
    loop {
        getrandom::getrandom(&mut buf).expect("getrandom failed");
        let val = u64::from_ne_bytes(buf);
        if val != 0 {
            return val;
        }
    }
}

/// Thread-safe salt counter shared across encryptions on one session.
pub struct SaltCounter(AtomicU64);

impl SaltCounter {
    /// Create a counter seeded from cryptographic randomness.
    pub fn new() -> Self {
        Self(AtomicU64::new(random_nonzero_u64()))
    }

    /// Create a counter at a specific value. Intended for tests.
    pub fn from_value(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Next salt value. Never returns zero; zero is skipped on wraparound
    /// (matches net-snmp) to avoid IV reuse.
    pub fn next(&self) -> u64 {
        let val = self.0.fetch_add(1, Ordering::SeqCst);
        if val == 0 {
            self.0.fetch_add(1, Ordering::SeqCst)
        } else {
            val
        }
    }
}

impl Default for SaltCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Privacy key for encryption/decryption.
///
/// Derived with the same localization as authentication keys; the protocol
/// determines how the key bytes are split:
/// - DES: first 8 bytes = key, last 8 bytes = pre-IV
/// - AES-128: first 16 bytes = key
///
/// Key material is zeroed on drop via the `zeroize` crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: PrivProtocol,
}

impl PrivKey {
    /// Derive a privacy key from a password and engine ID (RFC 3414 A.2).
    ///
    /// The privacy password is expanded and localized with the configured
    /// authentication protocol's hash; both MD5 and SHA-1 produce at least
    /// the 16 bytes DES and AES-128 need.
    pub fn from_password(
        auth_protocol: AuthProtocol,
        priv_protocol: PrivProtocol,
        password: &[u8],
        engine_id: &[u8],
    ) -> Self {
        let master = auth::password_to_key(auth_protocol, password);
        let localized = auth::localize_key(auth_protocol, &master, engine_id);
        Self {
            key: localized,
            protocol: priv_protocol,
        }
    }

    /// Create a privacy key from raw localized key bytes.
    pub fn from_bytes(protocol: PrivProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// The privacy protocol.
    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    /// Encrypt data, returning (ciphertext, privParameters).
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt_counter: &SaltCounter,
    ) -> Result<(Bytes, Bytes)> {
        let salt = salt_counter.next();

        match self.protocol {
            PrivProtocol::Des => self.encrypt_des(plaintext, engine_boots, salt),
            PrivProtocol::Aes128 => self.encrypt_aes128(plaintext, engine_boots, engine_time, salt),
        }
    }

    /// Decrypt data using the privParameters from the message.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Bytes> {
        if priv_params.len() != 8 {
            return Err(Error::decrypt(
                None,
                CryptoErrorKind::InvalidPrivParamsLength {
                    expected: 8,
                    actual: priv_params.len(),
                },
            ));
        }

        match self.protocol {
            PrivProtocol::Des => self.decrypt_des(ciphertext, priv_params),
            PrivProtocol::Aes128 => {
                self.decrypt_aes128(ciphertext, engine_boots, engine_time, priv_params)
            }
        }
    }

    /// DES-CBC encryption (RFC 3414 Section 8.1.1).
    fn encrypt_des(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        salt_int: u64,
    ) -> Result<(Bytes, Bytes)> {
        use cbc::cipher::{BlockEncryptMut, KeyIvInit};
        type DesCbc = cbc::Encryptor<des::Des>;

        if self.key.len() < 16 {
            return Err(Error::encrypt(None, CryptoErrorKind::InvalidKeyLength));
        }

        let key = &self.key[..8];
        let pre_iv = &self.key[8..16];

        // Salt = engineBoots (4 bytes MSB) || counter low 32 bits (MSB)
        let mut salt = [0u8; 8];
        salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
        salt[4..].copy_from_slice(&(salt_int as u32).to_be_bytes());

        // IV = pre-IV XOR salt
        let mut iv = [0u8; 8];
        for i in 0..8 {
            iv[i] = pre_iv[i] ^ salt[i];
        }

        // Zero-pad to an 8-byte boundary
        let padded_len = plaintext.len().div_ceil(8) * 8;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);

        let cipher = DesCbc::new_from_slices(key, &iv)
            .map_err(|_| Error::encrypt(None, CryptoErrorKind::InvalidKeyLength))?;

        let ciphertext = cipher
            .encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buffer, padded_len)
            .map_err(|_| Error::encrypt(None, CryptoErrorKind::CipherError))?;

        Ok((
            Bytes::copy_from_slice(ciphertext),
            Bytes::copy_from_slice(&salt),
        ))
    }

    /// DES-CBC decryption (RFC 3414 Section 8.1.1).
    fn decrypt_des(&self, ciphertext: &[u8], priv_params: &[u8]) -> Result<Bytes> {
        use cbc::cipher::{BlockDecryptMut, KeyIvInit};
        type DesCbc = cbc::Decryptor<des::Des>;

        if ciphertext.len() % 8 != 0 {
            return Err(Error::decrypt(
                None,
                CryptoErrorKind::InvalidCiphertextLength {
                    length: ciphertext.len(),
                    block_size: 8,
                },
            ));
        }

        if self.key.len() < 16 {
            return Err(Error::decrypt(None, CryptoErrorKind::InvalidKeyLength));
        }

        let key = &self.key[..8];
        let pre_iv = &self.key[8..16];

        // IV = pre-IV XOR salt
        let mut iv = [0u8; 8];
        for i in 0..8 {
            iv[i] = pre_iv[i] ^ priv_params[i];
        }

        let cipher = DesCbc::new_from_slices(key, &iv)
            .map_err(|_| Error::decrypt(None, CryptoErrorKind::InvalidKeyLength))?;

        let mut buffer = ciphertext.to_vec();
        let plaintext = cipher
            .decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buffer)
            .map_err(|_| Error::decrypt(None, CryptoErrorKind::CipherError))?;

        Ok(Bytes::copy_from_slice(plaintext))
    }

    /// AES-128-CFB encryption (RFC 3826 Section 3.1).
    fn encrypt_aes128(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: u64,
    ) -> Result<(Bytes, Bytes)> {
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
        type Aes128Cfb = cfb_mode::Encryptor<aes::Aes128>;

        let key = self
            .key
            .get(..16)
            .ok_or_else(|| Error::encrypt(None, CryptoErrorKind::InvalidKeyLength))?;

        let salt_bytes = salt.to_be_bytes();

        // IV = engineBoots (4) || engineTime (4) || salt (8), concatenated
        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
        iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
        iv[8..].copy_from_slice(&salt_bytes);

        let mut buffer = plaintext.to_vec();
        let cipher = Aes128Cfb::new_from_slices(key, &iv)
            .map_err(|_| Error::encrypt(None, CryptoErrorKind::InvalidKeyLength))?;
        cipher.encrypt(&mut buffer);

        Ok((Bytes::from(buffer), Bytes::copy_from_slice(&salt_bytes)))
    }

    /// AES-128-CFB decryption (RFC 3826 Section 3.1.4).
    fn decrypt_aes128(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Bytes> {
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
        type Aes128Cfb = cfb_mode::Decryptor<aes::Aes128>;

        let key = self
            .key
            .get(..16)
            .ok_or_else(|| Error::decrypt(None, CryptoErrorKind::InvalidKeyLength))?;

        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
        iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
        iv[8..].copy_from_slice(priv_params);

        let mut buffer = ciphertext.to_vec();
        let cipher = Aes128Cfb::new_from_slices(key, &iv)
            .map_err(|_| Error::decrypt(None, CryptoErrorKind::InvalidKeyLength))?;
        cipher.decrypt(&mut buffer);

        Ok(Bytes::from(buffer))
    }
}

impl std::fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_des_encrypt_decrypt_roundtrip() {
        let key = vec![
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // DES key
            0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, // pre-IV
        ];
        let priv_key = PrivKey::from_bytes(PrivProtocol::Des, key);
        let counter = SaltCounter::from_value(7);

        let plaintext = b"scoped pdu bytes here";
        let (ciphertext, priv_params) = priv_key.encrypt(plaintext, 100, 12345, &counter).unwrap();

        assert_ne!(ciphertext.as_ref(), plaintext.as_slice());
        assert_eq!(priv_params.len(), 8);
        // DES pads to the block boundary
        assert_eq!(ciphertext.len() % 8, 0);

        let decrypted = priv_key.decrypt(&ciphertext, 100, 12345, &priv_params).unwrap();
        assert_eq!(&decrypted[..plaintext.len()], plaintext);
    }

    #[test]
    fn test_aes128_encrypt_decrypt_roundtrip() {
        let key = vec![
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ];
        let priv_key = PrivKey::from_bytes(PrivProtocol::Aes128, key);
        let counter = SaltCounter::from_value(42);

        let plaintext = b"scoped pdu, unaligned length";
        let (ciphertext, priv_params) = priv_key.encrypt(plaintext, 200, 54321, &counter).unwrap();

        assert_ne!(ciphertext.as_ref(), plaintext.as_slice());
        assert_eq!(priv_params.len(), 8);
        // CFB is a stream mode, no padding
        assert_eq!(ciphertext.len(), plaintext.len());

        let decrypted = priv_key.decrypt(&ciphertext, 200, 54321, &priv_params).unwrap();
        assert_eq!(decrypted.as_ref(), plaintext.as_slice());
    }

    #[test]
    fn test_des_invalid_ciphertext_length() {
        let priv_key = PrivKey::from_bytes(PrivProtocol::Des, vec![0u8; 16]);

        let result = priv_key.decrypt(&[0u8; 13], 0, 0, &[0u8; 8]);
        assert!(matches!(result, Err(Error::DecryptionFailed { .. })));
    }

    #[test]
    fn test_invalid_priv_params_length() {
        let priv_key = PrivKey::from_bytes(PrivProtocol::Aes128, vec![0u8; 16]);

        let result = priv_key.decrypt(&[0u8; 16], 0, 0, &[0u8; 4]);
        assert!(matches!(result, Err(Error::DecryptionFailed { .. })));
    }

    #[test]
    fn test_salt_counter_increments() {
        let counter = SaltCounter::from_value(10);
        assert_eq!(counter.next(), 10);
        assert_eq!(counter.next(), 11);
        assert_eq!(counter.next(), 12);
    }

    #[test]
    fn test_salt_counter_skips_zero() {
        let counter = SaltCounter::from_value(u64::MAX);
        assert_eq!(counter.next(), u64::MAX);
        // Wraparound would produce 0; it must be skipped
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn test_multiple_encryptions_use_different_salts() {
        let priv_key = PrivKey::from_bytes(PrivProtocol::Aes128, vec![0u8; 16]);
        let counter = SaltCounter::new();

        let (_, salt1) = priv_key.encrypt(b"data", 0, 0, &counter).unwrap();
        let (_, salt2) = priv_key.encrypt(b"data", 0, 0, &counter).unwrap();
        assert_ne!(salt1, salt2);
    }

    #[test]
    fn test_from_password_roundtrip() {
        let engine_id = [0u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
        let priv_key = PrivKey::from_password(
            AuthProtocol::Sha1,
            PrivProtocol::Aes128,
            b"maplesyrup",
            &engine_id,
        );
        let counter = SaltCounter::from_value(1);

        let plaintext = b"test message";
        let (ciphertext, priv_params) = priv_key.encrypt(plaintext, 100, 200, &counter).unwrap();
        let decrypted = priv_key.decrypt(&ciphertext, 100, 200, &priv_params).unwrap();

        assert_eq!(decrypted.as_ref(), plaintext.as_slice());
    }

    #[test]
    fn test_wrong_key_produces_garbage() {
        let correct = PrivKey::from_bytes(PrivProtocol::Aes128, vec![0x11u8; 16]);
        let wrong = PrivKey::from_bytes(PrivProtocol::Aes128, vec![0x22u8; 16]);
        let counter = SaltCounter::from_value(5);

        let plaintext = b"secret payload";
        let (ciphertext, priv_params) = correct.encrypt(plaintext, 1, 2, &counter).unwrap();

        let garbage = wrong.decrypt(&ciphertext, 1, 2, &priv_params).unwrap();
        assert_ne!(garbage.as_ref(), plaintext.as_slice());

        let recovered = correct.decrypt(&ciphertext, 1, 2, &priv_params).unwrap();
        assert_eq!(recovered.as_ref(), plaintext.as_slice());
    }

    #[test]
    fn test_aes_wrong_engine_time_produces_garbage() {
        let priv_key = PrivKey::from_bytes(PrivProtocol::Aes128, vec![0x33u8; 16]);
        let counter = SaltCounter::from_value(9);

        let plaintext = b"time-coupled IV";
        let (ciphertext, priv_params) = priv_key.encrypt(plaintext, 200, 54321, &counter).unwrap();

        let garbage = priv_key
            .decrypt(&ciphertext, 200, 54322, &priv_params)
            .unwrap();
        assert_ne!(garbage.as_ref(), plaintext.as_slice());
    }
}
