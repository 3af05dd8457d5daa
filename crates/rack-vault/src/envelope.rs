//! Envelope encryption under a KMS-wrapped data key.
//!
//! A fresh 32-byte data key is minted per seal; the payload is sealed with
//! XSalsa20-Poly1305 under a 24-byte random nonce. The persisted form is
//! JSON `{"c": ciphertext, "k": wrapped key, "n": nonce}` with every field
//! base64-encoded.

use std::sync::Arc;

use crypto_secretbox::XSalsa20Poly1305;
use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{Aead, KeyInit};
use rack_cloud::{CloudError, KeyManagement};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VaultError, VaultResult};

pub const KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "c", with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(rename = "k", with = "b64")]
    pub encrypted_key: Vec<u8>,
    #[serde(rename = "n", with = "b64")]
    pub nonce: Vec<u8>,
}

mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Seals and opens payloads with data keys from the key-management service.
#[derive(Clone)]
pub struct Crypt {
    kms: Arc<dyn KeyManagement>,
}

impl Crypt {
    pub fn new(kms: Arc<dyn KeyManagement>) -> Self {
        Self { kms }
    }

    pub async fn encrypt(&self, key_arn: &str, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let data_key = self.kms.generate_data_key(key_arn, KEY_LENGTH).await?;
        let nonce = self.kms.generate_random(NONCE_LENGTH).await?;
        if data_key.plaintext.len() < KEY_LENGTH || nonce.len() < NONCE_LENGTH {
            return Err(VaultError::EncryptFailed("short key material".to_string()));
        }

        let cipher = XSalsa20Poly1305::new_from_slice(&data_key.plaintext[..KEY_LENGTH])
            .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;
        let nonce = &nonce[..NONCE_LENGTH];
        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(nonce), plaintext)
            .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;

        let envelope = Envelope {
            ciphertext,
            encrypted_key: data_key.ciphertext,
            nonce: nonce.to_vec(),
        };
        debug!(%key_arn, bytes = plaintext.len(), "payload sealed");
        serde_json::to_vec(&envelope).map_err(|e| VaultError::EncryptFailed(e.to_string()))
    }

    pub async fn decrypt(&self, key_arn: &str, data: &[u8]) -> VaultResult<Vec<u8>> {
        let envelope: Envelope =
            serde_json::from_slice(data).map_err(|e| VaultError::DecryptFailed(e.to_string()))?;
        if envelope.nonce.len() != NONCE_LENGTH {
            return Err(VaultError::DecryptFailed("invalid nonce length".to_string()));
        }

        let key = match self.kms.decrypt(&envelope.encrypted_key).await {
            Ok(key) => key,
            // The service rejected the wrapped key itself.
            Err(CloudError::Api { message, .. }) => return Err(VaultError::DecryptFailed(message)),
            Err(e) => return Err(e.into()),
        };
        if key.len() < KEY_LENGTH {
            return Err(VaultError::DecryptFailed("invalid data key".to_string()));
        }

        let cipher = XSalsa20Poly1305::new_from_slice(&key[..KEY_LENGTH])
            .map_err(|e| VaultError::DecryptFailed(e.to_string()))?;
        let plaintext = cipher
            .decrypt(GenericArray::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| VaultError::DecryptFailed("authentication failed".to_string()))?;
        debug!(%key_arn, bytes = plaintext.len(), "payload opened");
        Ok(plaintext)
    }
}
