//! Store credential encryption
//!
//! API tokens are encrypted at rest with AES-256-GCM before they reach the
//! database. The 256-bit master key lives next to the database in
//! `credential.key` (hex), generated on first use. Ciphertexts carry their
//! random 12-byte nonce prepended and are hex-encoded for storage in a text
//! column. Plaintext tokens are only ever held in memory.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Nonce,
};
use rand::{thread_rng, Rng};
use std::path::Path;
use thiserror::Error;

const MASTER_KEY_LENGTH: usize = 32; // 256 bits
const NONCE_LENGTH: usize = 12; // 96 bits for AES-GCM
const KEY_FILE_NAME: &str = "credential.key";

#[derive(Error, Debug)]
pub enum CredentialError {
	#[error("Encryption error: {0}")]
	Encryption(String),

	#[error("Decryption error: {0}")]
	Decryption(String),

	#[error("Invalid key format")]
	InvalidKeyFormat,

	#[error("Invalid credential format")]
	InvalidFormat,

	#[error("Key file error: {0}")]
	KeyFile(#[from] std::io::Error),
}

/// Encrypts and decrypts per-store API tokens with a data-dir-local master key
pub struct CredentialVault {
	key: [u8; MASTER_KEY_LENGTH],
}

impl CredentialVault {
	/// Load the master key from `<data_dir>/credential.key`, generating and
	/// persisting a fresh one if the file does not exist yet
	pub fn load_or_create(data_dir: &Path) -> Result<Self, CredentialError> {
		let key_path = data_dir.join(KEY_FILE_NAME);

		if key_path.exists() {
			let key_hex = std::fs::read_to_string(&key_path)?;
			let key_bytes =
				hex::decode(key_hex.trim()).map_err(|_| CredentialError::InvalidKeyFormat)?;
			if key_bytes.len() != MASTER_KEY_LENGTH {
				return Err(CredentialError::InvalidKeyFormat);
			}

			let mut key = [0u8; MASTER_KEY_LENGTH];
			key.copy_from_slice(&key_bytes);
			return Ok(Self { key });
		}

		let mut key = [0u8; MASTER_KEY_LENGTH];
		thread_rng().fill(&mut key);

		std::fs::create_dir_all(data_dir)?;
		std::fs::write(&key_path, hex::encode(key))?;

		Ok(Self { key })
	}

	/// Encrypt a plaintext token into a hex ciphertext with the nonce prepended
	pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
		use aes_gcm::aead::rand_core::RngCore;

		let mut nonce_bytes = [0u8; NONCE_LENGTH];
		OsRng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from_slice(&nonce_bytes);

		let cipher = Aes256Gcm::new((&self.key).into());
		let ciphertext = cipher
			.encrypt(nonce, plaintext.as_bytes())
			.map_err(|e| CredentialError::Encryption(e.to_string()))?;

		let mut result = nonce.to_vec();
		result.extend_from_slice(&ciphertext);

		Ok(hex::encode(result))
	}

	/// Decrypt a hex ciphertext produced by [`encrypt`](Self::encrypt)
	pub fn decrypt(&self, cipher_hex: &str) -> Result<String, CredentialError> {
		let encrypted = hex::decode(cipher_hex).map_err(|_| CredentialError::InvalidFormat)?;
		if encrypted.len() < NONCE_LENGTH {
			return Err(CredentialError::Decryption(
				"Invalid ciphertext length".to_string(),
			));
		}

		let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LENGTH);
		let nonce = Nonce::from_slice(nonce_bytes);

		let cipher = Aes256Gcm::new((&self.key).into());
		let plaintext = cipher
			.decrypt(nonce, ciphertext)
			.map_err(|e| CredentialError::Decryption(e.to_string()))?;

		String::from_utf8(plaintext).map_err(|_| CredentialError::InvalidFormat)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_encrypt_decrypt_roundtrip() {
		let dir = TempDir::new().unwrap();
		let vault = CredentialVault::load_or_create(dir.path()).unwrap();

		let cipher_hex = vault.encrypt("shpat_0123456789abcdef").unwrap();
		assert_ne!(cipher_hex, "shpat_0123456789abcdef");

		let plaintext = vault.decrypt(&cipher_hex).unwrap();
		assert_eq!(plaintext, "shpat_0123456789abcdef");
	}

	#[test]
	fn test_key_persists_across_loads() {
		let dir = TempDir::new().unwrap();

		let vault1 = CredentialVault::load_or_create(dir.path()).unwrap();
		let cipher_hex = vault1.encrypt("token-a").unwrap();

		let vault2 = CredentialVault::load_or_create(dir.path()).unwrap();
		assert_eq!(vault2.decrypt(&cipher_hex).unwrap(), "token-a");
	}

	#[test]
	fn test_nonces_differ_per_encryption() {
		let dir = TempDir::new().unwrap();
		let vault = CredentialVault::load_or_create(dir.path()).unwrap();

		let a = vault.encrypt("same-token").unwrap();
		let b = vault.encrypt("same-token").unwrap();
		assert_ne!(a, b);
	}

	#[test]
	fn test_tampered_ciphertext_rejected() {
		let dir = TempDir::new().unwrap();
		let vault = CredentialVault::load_or_create(dir.path()).unwrap();

		let cipher_hex = vault.encrypt("token-b").unwrap();
		// Flip the last hex digit, which lands inside the auth tag.
		let tampered = {
			let mut chars: Vec<char> = cipher_hex.chars().collect();
			let last = chars.len() - 1;
			chars[last] = if chars[last] == '0' { '1' } else { '0' };
			chars.into_iter().collect::<String>()
		};

		assert!(matches!(
			vault.decrypt(&tampered),
			Err(CredentialError::Decryption(_))
		));
	}

	#[test]
	fn test_short_ciphertext_rejected() {
		let dir = TempDir::new().unwrap();
		let vault = CredentialVault::load_or_create(dir.path()).unwrap();

		assert!(matches!(
			vault.decrypt("abcd"),
			Err(CredentialError::Decryption(_))
		));
		assert!(matches!(
			vault.decrypt("not hex"),
			Err(CredentialError::InvalidFormat)
		));
	}
}
