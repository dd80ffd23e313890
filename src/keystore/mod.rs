//! Enclave-sealed keystore.
//!
//! Two operations: [`SealedKeystore::setup`] (idempotent — generates once, reuses the sealed
//! file thereafter) and [`SealedKeystore::load_or_generate`] (read-or-regenerate on boot).
//! The signing seed and the RSA decryption keypair are the two long-lived secrets; both are
//! sealed to an enclave-derived symmetric key before ever touching disk.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::enclave::EnclaveClient;

const SEED_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const RSA_KEY_BITS: usize = 2048;
const DERIVE_PATH: &str = "promptmint-worker/keystore";
const DERIVE_SUBJECT: &str = "setup-record-v1";

#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("KEYSTORE_DERIVE_FAILED: {0}")]
    DeriveFailed(String),
    #[error("KEYSTORE_CORRUPT: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("pkcs8 error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),
    #[error("pkcs8 spki error: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),
}

/// The sealed setup record: everything the worker needs that must survive a restart and
/// must never appear on disk in plaintext (outside debug `plain-setup` mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupRecord {
    pub chain_rpc_url: String,
    pub factory_address: String,
    pub signing_seed: [u8; SEED_LEN],
    pub rsa_private_key_der: Vec<u8>,
    pub image_api_key: String,
    pub pinning_jwt: String,
    pub http_bind: Option<String>,
}

impl SetupRecord {
    pub fn rsa_private_key(&self) -> Result<RsaPrivateKey, KeystoreError> {
        Ok(RsaPrivateKey::from_pkcs8_der(&self.rsa_private_key_der)?)
    }

    pub fn rsa_public_key(&self) -> Result<RsaPublicKey, KeystoreError> {
        Ok(self.rsa_private_key()?.to_public_key())
    }
}

/// Inputs supplied at bootstrap time; sealed into the [`SetupRecord`] on first boot and
/// otherwise superseded by whatever the sealed file already contains — once sealed, the file
/// is authoritative over the environment it was first generated from.
pub struct SetupInputs<'a> {
    pub chain_rpc_url: &'a str,
    pub factory_address: &'a str,
    pub image_api_key: &'a str,
    pub pinning_jwt: &'a str,
    pub http_bind: Option<&'a str>,
}

pub struct SealedKeystore {
    path: PathBuf,
    plain_setup: bool,
    show_setup: bool,
}

impl SealedKeystore {
    pub fn new(path: impl Into<PathBuf>, plain_setup: bool, show_setup: bool) -> Self {
        Self {
            path: path.into(),
            plain_setup,
            show_setup,
        }
    }

    /// Idempotent: if the sealed file already exists, does nothing further than loading it.
    /// Otherwise generates fresh secrets and writes the sealed file.
    pub async fn setup(
        &self,
        enclave: &dyn EnclaveClient,
        inputs: SetupInputs<'_>,
    ) -> Result<SetupRecord, KeystoreError> {
        if self.path.exists() {
            return self.load(enclave).await;
        }
        self.generate_and_persist(enclave, inputs).await
    }

    /// Read the sealed file if present; on any decryption failure, regenerate. Note this
    /// destroys existing sealed data if the enclave identity changes, since the derived key
    /// used to unseal it will no longer match.
    pub async fn load_or_generate(
        &self,
        enclave: &dyn EnclaveClient,
        inputs: SetupInputs<'_>,
    ) -> Result<SetupRecord, KeystoreError> {
        if !self.path.exists() {
            return self.generate_and_persist(enclave, inputs).await;
        }
        match self.load(enclave).await {
            Ok(record) => Ok(record),
            Err(err) => {
                tracing::warn!(error = %err, "sealed keystore unreadable, regenerating");
                self.generate_and_persist(enclave, inputs).await
            }
        }
    }

    async fn load(&self, enclave: &dyn EnclaveClient) -> Result<SetupRecord, KeystoreError> {
        let bytes = std::fs::read(&self.path)?;
        let plaintext = if self.plain_setup {
            bytes
        } else {
            let key = enclave
                .derive_key(DERIVE_PATH, DERIVE_SUBJECT)
                .await
                .map_err(|e| KeystoreError::DeriveFailed(e.to_string()))?;
            decrypt(&key, &bytes).map_err(|e| KeystoreError::Corrupt(e.to_string()))?
        };
        let record: SetupRecord = serde_json::from_slice(&plaintext)?;
        if self.show_setup {
            tracing::info!(record = ?redacted(&record), "loaded sealed setup record");
        }
        Ok(record)
    }

    async fn generate_and_persist(
        &self,
        enclave: &dyn EnclaveClient,
        inputs: SetupInputs<'_>,
    ) -> Result<SetupRecord, KeystoreError> {
        let mut signing_seed = [0u8; SEED_LEN];
        rand::thread_rng().fill_bytes(&mut signing_seed);

        let mut rng = rand::rngs::OsRng;
        let rsa_private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
        let rsa_private_key_der = rsa_private_key.to_pkcs8_der()?.as_bytes().to_vec();

        let record = SetupRecord {
            chain_rpc_url: inputs.chain_rpc_url.to_string(),
            factory_address: inputs.factory_address.to_string(),
            signing_seed,
            rsa_private_key_der,
            image_api_key: inputs.image_api_key.to_string(),
            pinning_jwt: inputs.pinning_jwt.to_string(),
            http_bind: inputs.http_bind.map(str::to_string),
        };

        let plaintext = serde_json::to_vec(&record)?;

        if self.plain_setup {
            write_atomic(&self.path, &plaintext, 0o600)?;
        } else {
            let key = enclave
                .derive_key(DERIVE_PATH, DERIVE_SUBJECT)
                .await
                .map_err(|e| KeystoreError::DeriveFailed(e.to_string()))?;
            let sealed = encrypt(&key, &plaintext);
            write_atomic(&self.path, &sealed, 0o600)?;
        }

        if self.show_setup {
            tracing::info!(record = ?redacted(&record), "generated sealed setup record");
        }
        Ok(record)
    }
}

fn redacted(record: &SetupRecord) -> serde_json::Value {
    serde_json::json!({
        "chain_rpc_url": record.chain_rpc_url,
        "factory_address": record.factory_address,
        "signing_seed": "<redacted>",
        "rsa_private_key_der": "<redacted>",
        "image_api_key": "<redacted>",
        "pinning_jwt": "<redacted>",
        "http_bind": record.http_bind,
    })
}

/// Layout: `nonce(12) ‖ AEAD_ciphertext`.
fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-GCM encryption over bounded in-memory plaintext cannot fail");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

fn decrypt(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
    if sealed.len() < NONCE_LEN {
        return Err(aes_gcm::Error);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
}

fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(mode))?;
        }
        let _ = mode;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::SimulatedEnclaveClient;

    fn inputs() -> SetupInputs<'static> {
        SetupInputs {
            chain_rpc_url: "http://localhost:8545",
            factory_address: "0x0000000000000000000000000000000000000001",
            image_api_key: "img-key",
            pinning_jwt: "pin-jwt",
            http_bind: Some("127.0.0.1:9090"),
        }
    }

    #[tokio::test]
    async fn sealed_round_trip() {
        let dir = std::env::temp_dir().join(format!("ks-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sealed.bin");
        let enclave = SimulatedEnclaveClient::new([7u8; 32]);
        let keystore = SealedKeystore::new(&path, false, false);

        let written = keystore.setup(&enclave, inputs()).await.unwrap();
        let reloaded = keystore.load_or_generate(&enclave, inputs()).await.unwrap();
        assert_eq!(written.signing_seed, reloaded.signing_seed);
        assert_eq!(written.rsa_private_key_der, reloaded.rsa_private_key_der);
    }

    #[tokio::test]
    async fn wrong_enclave_identity_fails_cleanly_and_regenerates() {
        let dir = std::env::temp_dir().join(format!("ks-{}", std::process::id() + 1));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sealed.bin");
        let enclave_a = SimulatedEnclaveClient::new([1u8; 32]);
        let enclave_b = SimulatedEnclaveClient::new([2u8; 32]);
        let keystore = SealedKeystore::new(&path, false, false);

        let original = keystore.setup(&enclave_a, inputs()).await.unwrap();
        let regenerated = keystore
            .load_or_generate(&enclave_b, inputs())
            .await
            .unwrap();
        assert_ne!(original.signing_seed, regenerated.signing_seed);
    }

    #[tokio::test]
    async fn plain_setup_persists_unencrypted_json() {
        let dir = std::env::temp_dir().join(format!("ks-{}", std::process::id() + 2));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sealed.bin");
        let enclave = SimulatedEnclaveClient::new([9u8; 32]);
        let keystore = SealedKeystore::new(&path, true, false);

        keystore.setup(&enclave, inputs()).await.unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(serde_json::from_slice::<SetupRecord>(&bytes).is_ok());
    }
}
