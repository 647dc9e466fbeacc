//! Crypto primitives: AEAD seal/open for snapshots, slow key
//! derivation, and HMAC freshness tokens for the heartbeat protocol.
//!
//! ChaCha20-Poly1305 with a 96-bit random nonce per seal; keys are
//! derived once at startup with Argon2id from the configured secret and
//! a fixed salt. Freshness tokens bind `(license_id, issued_at)` under
//! HMAC-SHA256 and travel base64url encoded.

use crate::error::{Result, VigilError};
use argon2::{Argon2, Params, Version};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Size of derived keys in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of AEAD nonces in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the token MAC in bytes (full HMAC-SHA256).
const TOKEN_MAC_SIZE: usize = 32;

/// Token payload: 16-byte license id + 8-byte big-endian millis.
const TOKEN_PAYLOAD_SIZE: usize = 24;

/// A derived symmetric key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Debug)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Iterations.
    pub iterations: u32,
    /// Parallelism lanes.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests.
    pub fn fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Derive a symmetric key from a secret and a fixed salt with Argon2id.
pub fn derive_key(secret: &str, salt: &[u8; 16], params: &KdfParams) -> Result<DerivedKey> {
    let argon2_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| VigilError::Crypto(format!("key derivation parameters: {e}")))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret.as_bytes(), salt, &mut key_bytes)
        .map_err(|e| VigilError::Crypto(format!("key derivation: {e}")))?;

    Ok(DerivedKey::from_bytes(key_bytes))
}

/// An authenticated-encrypted blob: `{nonce, ciphertext||tag}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBlob {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the auth tag appended.
    pub ciphertext: Vec<u8>,
}

impl SealedBlob {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VigilError::Crypto("sealed blob too short".to_string()));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
        Ok(Self {
            nonce,
            ciphertext: bytes[NONCE_SIZE..].to_vec(),
        })
    }

    /// Base64 form used for snapshot transport.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| VigilError::Crypto(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

/// Encrypt plaintext under a derived key with a fresh random nonce.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<SealedBlob> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VigilError::Crypto(format!("encryption failed: {e}")))?;

    Ok(SealedBlob {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt and authenticate a sealed blob. Any tag mismatch fails
/// closed, with no partial plaintext.
pub fn open(key: &DerivedKey, blob: &SealedBlob) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&blob.nonce);

    cipher.decrypt(nonce, blob.ciphertext.as_ref()).map_err(|_| {
        VigilError::Crypto("authentication failed: corrupt or forged blob".to_string())
    })
}

/// Decoded freshness-token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClaims {
    pub license_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

impl TokenClaims {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.issued_at
    }
}

/// Issues and verifies heartbeat freshness tokens.
///
/// Wire format: `base64url(license_id || issued_at_ms_be || mac)` where
/// `mac = HMAC-SHA256(secret, license_id || issued_at_ms_be)`.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Issue a token bound to `(license_id, issued_at)`.
    pub fn issue(&self, license_id: Uuid, issued_at: DateTime<Utc>) -> String {
        let mut payload = [0u8; TOKEN_PAYLOAD_SIZE];
        payload[..16].copy_from_slice(license_id.as_bytes());
        payload[16..].copy_from_slice(&issued_at.timestamp_millis().to_be_bytes());

        // Qualified call: `KeyInit` is in scope for the AEAD and also
        // provides `new_from_slice` for Hmac.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        let mut token = Vec::with_capacity(TOKEN_PAYLOAD_SIZE + TOKEN_MAC_SIZE);
        token.extend_from_slice(&payload);
        token.extend_from_slice(&tag);
        URL_SAFE_NO_PAD.encode(token)
    }

    /// Decode and authenticate a token. Returns `Validation` for any
    /// malformed or forged input; the freshness-window check belongs to
    /// the caller.
    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| VigilError::Validation("token is not valid base64url".to_string()))?;

        if bytes.len() != TOKEN_PAYLOAD_SIZE + TOKEN_MAC_SIZE {
            return Err(VigilError::Validation(format!(
                "token has wrong length: {}",
                bytes.len()
            )));
        }

        let (payload, tag) = bytes.split_at(TOKEN_PAYLOAD_SIZE);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(payload);
        mac.verify_slice(tag)
            .map_err(|_| VigilError::Validation("token signature mismatch".to_string()))?;

        let license_id = Uuid::from_slice(&payload[..16])
            .map_err(|e| VigilError::Validation(format!("token license id: {e}")))?;

        let mut millis_bytes = [0u8; 8];
        millis_bytes.copy_from_slice(&payload[16..]);
        let millis = i64::from_be_bytes(millis_bytes);
        let issued_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| VigilError::Validation("token timestamp out of range".to_string()))?;

        Ok(TokenClaims {
            license_id,
            issued_at,
        })
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
