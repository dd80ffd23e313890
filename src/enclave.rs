//! Client for the enclave's key-derivation and attestation service.
//!
//! Narrow trait, same shape the chain client uses: one production implementation backed by
//! HTTP, one in-process simulator for tests. Request shape (path/subject pair identifying
//! what's being derived) mirrors `rofl-app-core`'s `DeriveKeyRequest` (kind/scope/generation/
//! key-id) collapsed to the two fields this worker actually needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    #[error("enclave request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("enclave returned malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait EnclaveClient: Send + Sync {
    /// Derive a 32-byte symmetric key bound to `(path, subject)` and to the enclave's identity.
    async fn derive_key(&self, path: &str, subject: &str) -> Result<[u8; 32], EnclaveError>;

    /// Produce a remote attestation quote whose report data is exactly `report_data`.
    async fn quote(&self, report_data: &[u8]) -> Result<String, EnclaveError>;
}

#[derive(Debug, Serialize)]
struct DeriveKeyRequest<'a> {
    path: &'a str,
    subject: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeriveKeyResponse {
    key: String,
}

#[derive(Debug, Serialize)]
struct QuoteRequest<'a> {
    report_data: &'a str,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    quote: String,
}

pub struct HttpEnclaveClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpEnclaveClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EnclaveClient for HttpEnclaveClient {
    async fn derive_key(&self, path: &str, subject: &str) -> Result<[u8; 32], EnclaveError> {
        let url = format!("{}/derive-key", self.endpoint.trim_end_matches('/'));
        let response: DeriveKeyResponse = self
            .client
            .post(url)
            .json(&DeriveKeyRequest { path, subject })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let bytes = hex::decode(response.key.trim_start_matches("0x"))
            .map_err(|e| EnclaveError::Malformed(e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| EnclaveError::Malformed("derived key was not 32 bytes".to_string()))
    }

    async fn quote(&self, report_data: &[u8]) -> Result<String, EnclaveError> {
        let url = format!("{}/quote", self.endpoint.trim_end_matches('/'));
        let response: QuoteResponse = self
            .client
            .post(url)
            .json(&QuoteRequest {
                report_data: &hex::encode(report_data),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.quote)
    }
}

/// Deterministic in-process stand-in keyed by a fixed enclave identity, used by tests that
/// want to assert on sealed-file round-trips and identity-change behaviour without a live
/// enclave socket.
pub struct SimulatedEnclaveClient {
    identity: [u8; 32],
}

impl SimulatedEnclaveClient {
    pub fn new(identity: [u8; 32]) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl EnclaveClient for SimulatedEnclaveClient {
    async fn derive_key(&self, path: &str, subject: &str) -> Result<[u8; 32], EnclaveError> {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.identity);
        hasher.update(path.as_bytes());
        hasher.update(subject.as_bytes());
        Ok(hasher.finalize().into())
    }

    async fn quote(&self, report_data: &[u8]) -> Result<String, EnclaveError> {
        Ok(format!(
            "simulated-quote:{}:{}",
            hex::encode(self.identity),
            hex::encode(report_data)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn different_identity_yields_different_key() {
        let a = SimulatedEnclaveClient::new([1u8; 32]);
        let b = SimulatedEnclaveClient::new([2u8; 32]);
        let key_a = a.derive_key("p", "s").await.unwrap();
        let key_b = b.derive_key("p", "s").await.unwrap();
        assert_ne!(key_a, key_b);
    }

    #[tokio::test]
    async fn same_identity_and_params_is_deterministic() {
        let a = SimulatedEnclaveClient::new([5u8; 32]);
        let key_1 = a.derive_key("p", "s").await.unwrap();
        let key_2 = a.derive_key("p", "s").await.unwrap();
        assert_eq!(key_1, key_2);
    }
}
