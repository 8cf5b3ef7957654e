// Symmetric encryption of stored secrets and deterministic token digests
//
// Secrets (refresh tokens, custom-API keys, OAuth client secrets) are stored
// as AES-256-GCM ciphertext; `token_hash` gives a stable, non-reversible
// digest usable as a unique lookup key without storing plaintext.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Process-wide symmetric crypto primitive, keyed at startup.
#[derive(Clone)]
pub struct Crypto {
    cipher: Aes256Gcm,
}

impl Crypto {
    /// Derive a 256-bit key from an arbitrary-length passphrase via SHA-256.
    ///
    /// `production` refuses to start with the well-known default/empty key,
    /// matching the spec's requirement that a production deployment cannot
    /// run with a default encryption key.
    pub fn new(passphrase: &str, production: bool) -> Result<Self> {
        if production && (passphrase.is_empty() || passphrase == "changeme" || passphrase == "default") {
            bail!("TOKEN_ENCRYPT_KEY must be set to a non-default value in production");
        }
        if passphrase.is_empty() {
            bail!("TOKEN_ENCRYPT_KEY must not be empty");
        }

        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        let key_bytes = hasher.finalize();
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);

        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext` hex-encoded.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    /// Decrypt a value produced by [`Crypto::encrypt`].
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let raw = hex::decode(ciphertext_hex).context("ciphertext is not valid hex")?;
        if raw.len() < NONCE_LEN {
            bail!("ciphertext too short");
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))?;

        String::from_utf8(plaintext).context("decrypted plaintext is not valid UTF-8")
    }

    /// Stable digest of a secret (refresh token, API key) for unique lookup.
    /// Not reversible; never decrypt this, it isn't ciphertext.
    pub fn token_hash(&self, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}
