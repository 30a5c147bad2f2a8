//
// Copyright (c) 2025 rustmailer.com (https://rustmailer.com)
//
// This file is part of the Groundwork Mail Sync Project
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, AES_256_GCM};
use ring::pbkdf2::{self, derive};
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use std::sync::{Arc, LazyLock};

use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const DEFAULT_ITERATIONS: u32 = 100_000;

pub static VAULT: LazyLock<Arc<CredentialVault>> = LazyLock::new(|| {
    Arc::new(CredentialVault::new(
        &SETTINGS.groundwork_encrypt_password,
        SETTINGS.groundwork_encrypt_iterations,
    ))
});

struct SingleNonceSequence([u8; NONCE_LEN]);

impl NonceSequence for SingleNonceSequence {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        Ok(Nonce::assume_unique_for_key(self.0))
    }
}

/// Symmetric encryption for OAuth tokens at rest.
///
/// Layout of the encoded value: `salt(32) || nonce(12) || ciphertext+tag`,
/// URL-safe base64. A fresh salt and nonce are drawn for every call, so
/// encrypting the same token twice never yields the same output.
pub struct CredentialVault {
    password: String,
    iterations: NonZeroU32,
    rng: SystemRandom,
}

impl CredentialVault {
    pub fn new(password: &str, iterations: u32) -> Self {
        Self {
            password: password.to_string(),
            iterations: NonZeroU32::new(iterations)
                .or(NonZeroU32::new(DEFAULT_ITERATIONS))
                .unwrap_or(NonZeroU32::MIN),
            rng: SystemRandom::new(),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> GroundworkResult<String> {
        self.seal(plaintext)
            .map_err(|_| raise_error!("Failed to encrypt string.".into(), ErrorCode::InternalError))
    }

    pub fn decrypt(&self, data: &str) -> GroundworkResult<String> {
        self.open(data).map_err(|_| {
            raise_error!(
                "Decryption failed, likely due to incorrect encryption key or corrupted data"
                    .into(),
                ErrorCode::DecryptionFailure
            )
        })
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            self.password.as_bytes(),
            &mut key,
        );
        key
    }

    fn seal(&self, plaintext: &str) -> Result<String, ring::error::Unspecified> {
        let mut salt = [0u8; SALT_LEN];
        self.rng.fill(&mut salt)?;
        let key = self.derive_key(&salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes)?;
        let unbound_key = ring::aead::UnboundKey::new(&AES_256_GCM, &key)?;
        let mut sealing_key = SealingKey::new(unbound_key, SingleNonceSequence(nonce_bytes));
        let mut in_out = plaintext.as_bytes().to_vec();
        sealing_key.seal_in_place_append_tag(Aad::empty(), &mut in_out)?;
        let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + in_out.len());
        result.extend_from_slice(&salt);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&in_out);
        Ok(general_purpose::URL_SAFE.encode(&result))
    }

    fn open(&self, data: &str) -> Result<String, ring::error::Unspecified> {
        let data = general_purpose::URL_SAFE
            .decode(data.trim())
            .map_err(|_| ring::error::Unspecified)?;
        if data.len() < SALT_LEN + NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(ring::error::Unspecified);
        }
        let salt = &data[..SALT_LEN];
        let nonce_bytes: [u8; NONCE_LEN] = data[SALT_LEN..SALT_LEN + NONCE_LEN]
            .try_into()
            .map_err(|_| ring::error::Unspecified)?;
        let key = self.derive_key(salt);
        let unbound_key = ring::aead::UnboundKey::new(&AES_256_GCM, &key)?;
        let mut opening_key = OpeningKey::new(unbound_key, SingleNonceSequence(nonce_bytes));
        let mut in_out = data[SALT_LEN + NONCE_LEN..].to_vec();
        let decrypted = opening_key.open_in_place(Aad::empty(), &mut in_out)?;
        String::from_utf8(decrypted.to_vec()).map_err(|_| ring::error::Unspecified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(password: &str) -> CredentialVault {
        CredentialVault::new(password, 1_000)
    }

    #[test]
    fn test_encrypt_decrypt() {
        let vault = vault("my_secure_password");
        let plaintext = "ya29.a0AfH6SMBx-refresh-token";
        let encrypted = vault.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(vault.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let vault = vault("pw");
        let a = vault.encrypt("token").unwrap();
        let b = vault.encrypt("token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_decryption_failure() {
        let encrypted = vault("right").encrypt("token").unwrap();
        let err = vault("wrong").decrypt(&encrypted).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecryptionFailure);
    }

    #[test]
    fn malformed_input_is_decryption_failure() {
        let vault = vault("pw");
        for input in ["", "not base64 !!", "c2hvcnQ="] {
            let err = vault.decrypt(input).unwrap_err();
            assert_eq!(err.code(), ErrorCode::DecryptionFailure);
        }
    }
}
