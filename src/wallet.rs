//! Deterministic signing identity and typed-data mint signatures.
//!
//! Private scalar = keccak-256 of the signing seed. The wallet owns the single mutex
//! serialising transaction submission, keeping that concurrency assumption local instead of
//! leaking it into every caller; the guard is held only across the submit call itself —
//! never across signing.

use alloy_primitives::{Address, B256, Bytes, keccak256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use tokio::sync::Mutex;

sol! {
    #[derive(Debug)]
    struct Mint {
        address to;
        string uri;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("failed to construct signer from seed: {0}")]
    InvalidSeed(String),
    #[error("signing failed: {0}")]
    Signing(#[from] alloy_signer::Error),
}

pub struct Wallet {
    signer: PrivateKeySigner,
    submit_lock: Mutex<()>,
}

impl Wallet {
    /// `signing_seed` is the 32-byte seed sealed in the keystore. The private scalar is
    /// `keccak256(seed)`; any deviation from this derivation breaks the contract's `ecrecover`
    /// check and is a fatal bug.
    pub fn from_seed(signing_seed: &[u8; 32]) -> Result<Self, WalletError> {
        let scalar: B256 = keccak256(signing_seed);
        let signer = PrivateKeySigner::from_bytes(&scalar)
            .map_err(|e| WalletError::InvalidSeed(e.to_string()))?;
        Ok(Self {
            signer,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Build the per-collection EIP-712 domain from its published fields.
    pub fn domain(name: &str, version: &str, chain_id: u64, verifying_contract: Address) -> Eip712Domain {
        eip712_domain! {
            name: name,
            version: version,
            chain_id: chain_id,
            verifying_contract: verifying_contract,
        }
    }

    /// `SignMint(to, uri, domain) -> signature`. Byte-for-byte the signature the contract
    /// recovers against `Mint(address to,string uri)` under `domain`.
    pub async fn sign_mint(
        &self,
        to: Address,
        uri: &str,
        domain: &Eip712Domain,
    ) -> Result<Bytes, WalletError> {
        let mint = Mint {
            to,
            uri: uri.to_string(),
        };
        let hash = mint.eip712_signing_hash(domain);
        let signature = self.signer.sign_hash(&hash).await?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    /// Acquire the submission mutex. Hold the guard only across the single chain-submit call.
    pub async fn submit_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.submit_lock.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_mint_recovers_to_wallet_address() {
        let seed = [42u8; 32];
        let wallet = Wallet::from_seed(&seed).unwrap();
        let domain = Wallet::domain("C", "1", 1, Address::ZERO);
        let to = Address::repeat_byte(0x11);
        let sig_bytes = wallet.sign_mint(to, "ipfs://hash", &domain).await.unwrap();

        let mint = Mint {
            to,
            uri: "ipfs://hash".to_string(),
        };
        let hash = mint.eip712_signing_hash(&domain);
        let signature = alloy_primitives::PrimitiveSignature::try_from(sig_bytes.as_ref())
            .expect("65-byte signature");
        let recovered = signature.recover_address_from_prehash(&hash).unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[test]
    fn same_seed_yields_same_address() {
        let seed = [7u8; 32];
        let a = Wallet::from_seed(&seed).unwrap();
        let b = Wallet::from_seed(&seed).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn different_seed_yields_different_address() {
        let a = Wallet::from_seed(&[1u8; 32]).unwrap();
        let b = Wallet::from_seed(&[2u8; 32]).unwrap();
        assert_ne!(a.address(), b.address());
    }
}
