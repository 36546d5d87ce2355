//! Passphrase-sealed files.
//!
//! Layout on disk: `salt (32) || nonce (12) || AES-256-GCM(MAGIC || payload)`.
//! The magic prefix lets a wrong passphrase be told apart from a damaged file.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, Params};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = SALT_LEN + NONCE_LEN;
const MAGIC: &[u8] = b"CYKEL_EVENTS_V1";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("sealing failed")]
    Seal,
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("sealed file is truncated or corrupted")]
    InvalidFormat,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    fn derive(passphrase: &str, salt: &[u8]) -> Result<Self, VaultError> {
        let params =
            Params::new(65536, 3, 1, Some(KEY_LEN)).map_err(|_| VaultError::KeyDerivation)?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = DerivedKey([0u8; KEY_LEN]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key.0)
            .map_err(|_| VaultError::KeyDerivation)?;
        Ok(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm, VaultError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|_| VaultError::KeyDerivation)
    }
}

/// A sealed file at a fixed path, opened with a passphrase held by the caller.
#[derive(Debug, Clone)]
pub struct Vault {
    path: PathBuf,
}

impl Vault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypt `payload` and replace the file contents.
    pub fn seal(&self, passphrase: &str, payload: &[u8]) -> Result<(), VaultError> {
        let bytes = seal_bytes(passphrase, payload)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }
        // Staged write, then rename over the target.
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, bytes).map_err(|e| self.io(e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.io(e))
    }

    pub fn open(&self, passphrase: &str) -> Result<Vec<u8>, VaultError> {
        let bytes = fs::read(&self.path).map_err(|e| self.io(e))?;
        open_bytes(passphrase, &bytes)
    }

    /// Remove the sealed file; missing files are fine.
    pub fn wipe(&self) -> Result<(), VaultError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io(e)),
        }
    }

    fn io(&self, source: std::io::Error) -> VaultError {
        VaultError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

pub fn seal_bytes(passphrase: &str, payload: &[u8]) -> Result<Vec<u8>, VaultError> {
    let mut header = [0u8; HEADER_LEN];
    rand::thread_rng().fill_bytes(&mut header);
    let (salt, nonce) = header.split_at(SALT_LEN);

    let cipher = DerivedKey::derive(passphrase, salt)?.cipher()?;

    let mut plaintext = Vec::with_capacity(MAGIC.len() + payload.len());
    plaintext.extend_from_slice(MAGIC);
    plaintext.extend_from_slice(payload);

    let sealed = cipher.encrypt(Nonce::from_slice(nonce), plaintext.as_slice());
    plaintext.zeroize();
    let ciphertext = sealed.map_err(|_| VaultError::Seal)?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open_bytes(passphrase: &str, sealed: &[u8]) -> Result<Vec<u8>, VaultError> {
    if sealed.len() <= HEADER_LEN + MAGIC.len() {
        return Err(VaultError::InvalidFormat);
    }
    let (header, ciphertext) = sealed.split_at(HEADER_LEN);
    let (salt, nonce) = header.split_at(SALT_LEN);

    let cipher = DerivedKey::derive(passphrase, salt)?.cipher()?;
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::WrongPassphrase)?;

    if !plaintext.starts_with(MAGIC) {
        plaintext.zeroize();
        return Err(VaultError::InvalidFormat);
    }
    Ok(plaintext.split_off(MAGIC.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn seal_and_open() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::new(dir.path().join("events.cykel"));
        assert!(!vault.exists());

        vault.seal("correct horse", br#"{"events":[]}"#).unwrap();
        assert!(vault.exists());
        assert_eq!(vault.open("correct horse").unwrap(), br#"{"events":[]}"#);
    }

    #[test]
    fn wrong_passphrase_is_reported() {
        let sealed = seal_bytes("right", b"payload").unwrap();
        assert!(matches!(
            open_bytes("wrong", &sealed),
            Err(VaultError::WrongPassphrase)
        ));
    }

    #[test]
    fn truncated_input_is_invalid() {
        assert!(matches!(
            open_bytes("any", &[0u8; 20]),
            Err(VaultError::InvalidFormat)
        ));
    }

    #[test]
    fn wipe_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::new(dir.path().join("events.cykel"));
        vault.wipe().unwrap();
        vault.seal("pw", b"x").unwrap();
        vault.wipe().unwrap();
        assert!(!vault.exists());
    }
}
