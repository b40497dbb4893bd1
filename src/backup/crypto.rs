//! Digest, MAC and cipher providers for backup archives
//!
//! Providers are looked up by algorithm name (case-insensitive) in a
//! [`CryptoProviders`] registry. The standard registry carries:
//!
//! | Kind   | Algorithm    | Crate      |
//! |--------|--------------|------------|
//! | digest | `SHA-256`    | sha2       |
//! | digest | `SHA-512`    | sha2       |
//! | digest | `CRC32`      | crc32fast  |
//! | MAC    | `HmacSHA256` | hmac       |
//! | cipher | `AES/GCM`    | aes-gcm    |

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const SHA256: &str = "SHA-256";
pub const SHA512: &str = "SHA-512";
pub const CRC32: &str = "CRC32";
pub const HMAC_SHA256: &str = "HmacSHA256";
pub const AES_GCM: &str = "AES/GCM";

const GCM_NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("invalid key for {algorithm}: {reason}")]
    InvalidKey { algorithm: String, reason: String },

    #[error("{algorithm} encryption failed")]
    Encrypt { algorithm: String },

    #[error("{algorithm} decryption failed: data is corrupt or the key is wrong")]
    Decrypt { algorithm: String },
}

/// Incremental hash or MAC computation.
pub trait Digester: Send {
    fn update(&mut self, data: &[u8]);
    fn finish(self: Box<Self>) -> Vec<u8>;
}

pub trait DigestProvider: Send + Sync {
    fn algorithm(&self) -> &str;
    fn digester(&self) -> Box<dyn Digester>;
}

pub trait MacProvider: Send + Sync {
    fn algorithm(&self) -> &str;
    fn signer(&self) -> Result<Box<dyn Digester>, CryptoError>;
}

pub trait CipherProvider: Send + Sync {
    fn algorithm(&self) -> &str;
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Constant-time comparison of two digests.
pub fn digests_match(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

struct ShaDigester<D: Digest + Send>(D);

impl<D: Digest + Send> Digester for ShaDigester<D> {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

pub struct Sha256Provider;

impl DigestProvider for Sha256Provider {
    fn algorithm(&self) -> &str {
        SHA256
    }

    fn digester(&self) -> Box<dyn Digester> {
        Box::new(ShaDigester(Sha256::new()))
    }
}

pub struct Sha512Provider;

impl DigestProvider for Sha512Provider {
    fn algorithm(&self) -> &str {
        SHA512
    }

    fn digester(&self) -> Box<dyn Digester> {
        Box::new(ShaDigester(Sha512::new()))
    }
}

struct Crc32Digester(crc32fast::Hasher);

impl Digester for Crc32Digester {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_be_bytes().to_vec()
    }
}

pub struct Crc32Provider;

impl DigestProvider for Crc32Provider {
    fn algorithm(&self) -> &str {
        CRC32
    }

    fn digester(&self) -> Box<dyn Digester> {
        Box::new(Crc32Digester(crc32fast::Hasher::new()))
    }
}

struct HmacDigester(Hmac<Sha256>);

impl Digester for HmacDigester {
    fn update(&mut self, data: &[u8]) {
        Mac::update(&mut self.0, data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        Mac::finalize(self.0).into_bytes().to_vec()
    }
}

pub struct HmacSha256Provider {
    key: Vec<u8>,
}

impl HmacSha256Provider {
    pub fn new(key: Vec<u8>) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::InvalidKey {
                algorithm: HMAC_SHA256.to_string(),
                reason: "key is empty".to_string(),
            });
        }
        Ok(Self { key })
    }
}

impl MacProvider for HmacSha256Provider {
    fn algorithm(&self) -> &str {
        HMAC_SHA256
    }

    fn signer(&self) -> Result<Box<dyn Digester>, CryptoError> {
        let mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key).map_err(|e| {
            CryptoError::InvalidKey {
                algorithm: HMAC_SHA256.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Box::new(HmacDigester(mac)))
    }
}

/// AES-256-GCM. The random nonce is prepended to the ciphertext.
pub struct AesGcmProvider {
    cipher: Aes256Gcm,
}

impl AesGcmProvider {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey {
            algorithm: AES_GCM.to_string(),
            reason: format!("expected 32 bytes, got {}", key.len()),
        })?;
        Ok(Self { cipher })
    }
}

impl CipherProvider for AesGcmProvider {
    fn algorithm(&self) -> &str {
        AES_GCM
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; GCM_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt {
                algorithm: AES_GCM.to_string(),
            })?;

        let mut out = Vec::with_capacity(GCM_NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let failed = || CryptoError::Decrypt {
            algorithm: AES_GCM.to_string(),
        };
        if ciphertext.len() < GCM_NONCE_LEN {
            return Err(failed());
        }
        let (nonce, sealed) = ciphertext.split_at(GCM_NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| failed())
    }
}

/// Providers keyed by algorithm name.
#[derive(Default, Clone)]
pub struct CryptoProviders {
    digests: HashMap<String, Arc<dyn DigestProvider>>,
    macs: HashMap<String, Arc<dyn MacProvider>>,
    ciphers: HashMap<String, Arc<dyn CipherProvider>>,
}

impl CryptoProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in digests, plus the MAC and cipher when their keys are given.
    pub fn standard(mac_key: Option<Vec<u8>>, cipher_key: Option<Vec<u8>>) -> Result<Self, CryptoError> {
        let mut providers = Self::new();
        providers.register_digest(Arc::new(Sha256Provider));
        providers.register_digest(Arc::new(Sha512Provider));
        providers.register_digest(Arc::new(Crc32Provider));
        if let Some(key) = mac_key {
            providers.register_mac(Arc::new(HmacSha256Provider::new(key)?));
        }
        if let Some(key) = cipher_key {
            providers.register_cipher(Arc::new(AesGcmProvider::new(&key)?));
        }
        Ok(providers)
    }

    pub fn register_digest(&mut self, provider: Arc<dyn DigestProvider>) {
        self.digests
            .insert(provider.algorithm().to_ascii_uppercase(), provider);
    }

    pub fn register_mac(&mut self, provider: Arc<dyn MacProvider>) {
        self.macs
            .insert(provider.algorithm().to_ascii_uppercase(), provider);
    }

    pub fn register_cipher(&mut self, provider: Arc<dyn CipherProvider>) {
        self.ciphers
            .insert(provider.algorithm().to_ascii_uppercase(), provider);
    }

    pub fn digest(&self, algorithm: &str) -> Result<Arc<dyn DigestProvider>, CryptoError> {
        self.digests
            .get(&algorithm.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| CryptoError::UnknownAlgorithm(algorithm.to_string()))
    }

    pub fn mac(&self, algorithm: &str) -> Result<Arc<dyn MacProvider>, CryptoError> {
        self.macs
            .get(&algorithm.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| CryptoError::UnknownAlgorithm(algorithm.to_string()))
    }

    pub fn cipher(&self, algorithm: &str) -> Result<Arc<dyn CipherProvider>, CryptoError> {
        self.ciphers
            .get(&algorithm.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| CryptoError::UnknownAlgorithm(algorithm.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_sha256_known_value() {
        let mut d = Sha256Provider.digester();
        d.update(b"abc");
        assert_eq!(
            hex(&d.finish()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_crc32_known_value() {
        let mut d = Crc32Provider.digester();
        d.update(b"123456789");
        assert_eq!(hex(&d.finish()), "cbf43926");
    }

    #[test]
    fn test_hmac_depends_on_key() {
        let a = HmacSha256Provider::new(b"key-a".to_vec()).unwrap();
        let b = HmacSha256Provider::new(b"key-b".to_vec()).unwrap();
        let sign = |p: &HmacSha256Provider| {
            let mut s = p.signer().unwrap();
            s.update(b"99-user.ldif");
            s.finish()
        };
        assert!(!digests_match(&sign(&a), &sign(&b)));
        assert!(digests_match(&sign(&a), &sign(&a)));
    }

    #[test]
    fn test_empty_mac_key_rejected() {
        assert!(HmacSha256Provider::new(Vec::new()).is_err());
    }

    #[test]
    fn test_aes_gcm_wrong_key_fails() {
        let cipher = AesGcmProvider::new(&[7u8; 32]).unwrap();
        let sealed = cipher.encrypt(b"dn: cn=schema").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"dn: cn=schema");

        let other = AesGcmProvider::new(&[8u8; 32]).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Decrypt { .. })));
    }

    #[test]
    fn test_aes_key_length_checked() {
        assert!(matches!(
            AesGcmProvider::new(&[0u8; 16]),
            Err(CryptoError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let providers = CryptoProviders::standard(None, None).unwrap();
        assert_eq!(providers.digest("sha-512").unwrap().algorithm(), SHA512);
        assert!(matches!(
            providers.mac(HMAC_SHA256),
            Err(CryptoError::UnknownAlgorithm(_))
        ));
    }
}
