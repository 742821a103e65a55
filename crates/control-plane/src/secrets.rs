//! Sealing for uploaded signing material. Keystores and passwords are
//! encrypted with AES-256-GCM before they touch the database; the key comes
//! from `APPSHELL_SIGNING_KEY` (64 hex chars) and is never persisted.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

const NONCE_LEN: usize = 12;

pub struct Sealer {
    cipher: Aes256Gcm,
}

impl Sealer {
    pub fn from_hex_key(hex_key: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_key.trim()).context("signing key must be hex")?;
        anyhow::ensure!(bytes.len() == 32, "signing key must be 32 bytes (64 hex chars)");
        Ok(Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)) })
    }

    /// Returns base64(nonce || ciphertext).
    pub fn seal(&self, plaintext: &[u8]) -> anyhow::Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| anyhow::anyhow!("seal failed"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(B64.encode(out))
    }

    pub fn open(&self, sealed: &str) -> anyhow::Result<Vec<u8>> {
        let raw = B64.decode(sealed.trim()).context("sealed value is not base64")?;
        anyhow::ensure!(raw.len() > NONCE_LEN, "sealed value too short");
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("open failed: wrong key or corrupted value"))
    }
}
