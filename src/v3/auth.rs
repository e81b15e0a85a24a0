//! Authentication key derivation and HMAC operations (RFC 3414).
//!
//! Implements password-to-key derivation (1MB expansion + hash), key
//! localization (binding a key to an engine ID), and HMAC-96 message
//! authentication.

use digest::{Digest, KeyInit, Mac, OutputSizeUser};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::AuthProtocol;

/// Localized authentication key.
///
/// A key derived from a password and bound to a specific engine ID.
///
/// Key material is zeroed from memory on drop via the `zeroize` crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl LocalizedKey {
    /// Derive a localized key from a password and engine ID.
    ///
    /// RFC 3414 Section A.2:
    /// 1. Expand the password to 1MB by repetition
    /// 2. Hash the expansion to get the master key
    /// 3. Hash (master_key || engine_id || master_key) to localize
    ///
    /// Empty passwords produce an all-zero key of the digest length.
    pub fn from_password(protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Self {
        let master_key = password_to_key(protocol, password);
        let localized = localize_key(protocol, &master_key, engine_id);
        Self {
            key: localized,
            protocol,
        }
    }

    /// Create a localized key from raw bytes, e.g. from configuration.
    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// The protocol this key is for.
    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Truncated MAC length for this key's protocol.
    pub fn mac_len(&self) -> usize {
        self.protocol.mac_len()
    }

    /// Compute the HMAC over a message, truncated to 12 bytes (HMAC-96).
    pub fn compute_hmac(&self, data: &[u8]) -> Vec<u8> {
        match self.protocol {
            AuthProtocol::Md5 => compute_hmac_md5(&self.key, data, 12),
            AuthProtocol::Sha1 => compute_hmac_sha1(&self.key, data, 12),
        }
    }

    /// Verify an HMAC in constant time.
    pub fn verify_hmac(&self, data: &[u8], expected: &[u8]) -> bool {
        let computed = self.compute_hmac(data);
        if computed.len() != expected.len() {
            return false;
        }
        let mut result = 0u8;
        for (a, b) in computed.iter().zip(expected.iter()) {
            result |= a ^ b;
        }
        result == 0
    }
}

impl std::fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalizedKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Password to key transformation (RFC 3414 Section A.2.1).
pub(crate) fn password_to_key(protocol: AuthProtocol, password: &[u8]) -> Vec<u8> {
    const EXPANSION_SIZE: usize = 1_048_576; // 1MB

    match protocol {
        AuthProtocol::Md5 => password_to_key_impl::<md5::Md5>(password, EXPANSION_SIZE),
        AuthProtocol::Sha1 => password_to_key_impl::<sha1::Sha1>(password, EXPANSION_SIZE),
    }
}

fn password_to_key_impl<D>(password: &[u8], expansion_size: usize) -> Vec<u8>
where
    D: Digest + Default,
{
    if password.is_empty() {
        return vec![0u8; <D as OutputSizeUser>::output_size()];
    }

    let mut hasher = D::new();

    // Hash the 1MB expansion in 64-byte chunks (matches net-snmp).
    let mut buf = [0u8; 64];
    let password_len = password.len();
    let mut password_index = 0;
    let mut count = 0;

    while count < expansion_size {
        for byte in &mut buf {
            *byte = password[password_index];
            password_index = (password_index + 1) % password_len;
        }
        hasher.update(buf);
        count += 64;
    }

    hasher.finalize().to_vec()
}

/// Key localization (RFC 3414 Section A.2.2):
/// localized_key = H(master_key || engine_id || master_key)
pub(crate) fn localize_key(
    protocol: AuthProtocol,
    master_key: &[u8],
    engine_id: &[u8],
) -> Vec<u8> {
    match protocol {
        AuthProtocol::Md5 => localize_key_impl::<md5::Md5>(master_key, engine_id),
        AuthProtocol::Sha1 => localize_key_impl::<sha1::Sha1>(master_key, engine_id),
    }
}

fn localize_key_impl<D>(master_key: &[u8], engine_id: &[u8]) -> Vec<u8>
where
    D: Digest + Default,
{
    let mut hasher = D::new();
    hasher.update(master_key);
    hasher.update(engine_id);
    hasher.update(master_key);
    hasher.finalize().to_vec()
}

fn compute_hmac_md5(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacMd5 = hmac::Hmac<md5::Md5>;

    let mut mac = <HmacMd5 as KeyInit>::new_from_slice(key).expect("HMAC accepts any key size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

fn compute_hmac_sha1(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacSha1 = hmac::Hmac<sha1::Sha1>;

    let mut mac = <HmacSha1 as KeyInit>::new_from_slice(key).expect("HMAC accepts any key size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

/// Authenticate an outgoing message by computing and inserting the HMAC.
///
/// The auth params field must already hold placeholder zeros; the HMAC is
/// computed over the whole message with the zeros in place.
pub fn authenticate_message(
    key: &LocalizedKey,
    message: &mut [u8],
    auth_offset: usize,
    auth_len: usize,
) {
    let mac = key.compute_hmac(message);
    message[auth_offset..auth_offset + auth_len].copy_from_slice(&mac);
}

/// Verify the authentication of an incoming message.
pub fn verify_message(
    key: &LocalizedKey,
    message: &[u8],
    auth_offset: usize,
    auth_len: usize,
) -> bool {
    let received_mac = &message[auth_offset..auth_offset + auth_len];

    let mut msg_copy = message.to_vec();
    msg_copy[auth_offset..auth_offset + auth_len].fill(0);

    key.verify_hmac(&msg_copy, received_mac)
}
