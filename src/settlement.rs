//! Settlement worker: generate → pin → sign → submit. Consumes `AuctionEnd` tasks; any
//! failed step logs and discards the task rather than retrying, since a retry after partial
//! progress risks double-signing or double-minting.

use std::sync::Arc;

use alloy_primitives::{Bytes, U256};
use alloy_sol_types::SolCall;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::contracts::ICollection;
use crate::chain::{ChainClient, ChainClientError};
use crate::prompt::{PromptError, PromptResolver};
use crate::scheduler::AuctionEnd;
use crate::wallet::{Wallet, WalletError};

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Chain(#[from] ChainClientError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error("image generation failed: {0}")]
    ImageGeneration(String),
    #[error("pinning failed: {0}")]
    Pinning(String),
}

#[async_trait::async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, SettlementError>;
}

#[async_trait::async_trait]
pub trait PinningClient: Send + Sync {
    async fn pin_url(&self, url: &str) -> Result<String, SettlementError>;
    async fn pin_json(&self, value: &serde_json::Value) -> Result<String, SettlementError>;
}

pub struct HttpImageClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpImageClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl ImageClient for HttpImageClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, SettlementError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            prompt: &'a str,
            size: &'a str,
            n: u32,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            url: String,
        }
        let resp: Resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Req {
                model,
                prompt,
                size: "1024x1024",
                n: 1,
            })
            .send()
            .await
            .map_err(|e| SettlementError::ImageGeneration(e.to_string()))?
            .error_for_status()
            .map_err(|e| SettlementError::ImageGeneration(e.to_string()))?
            .json()
            .await
            .map_err(|e| SettlementError::ImageGeneration(e.to_string()))?;
        Ok(resp.url)
    }
}

pub struct HttpPinningClient {
    http: reqwest::Client,
    endpoint: String,
    jwt: String,
}

impl HttpPinningClient {
    pub fn new(endpoint: impl Into<String>, jwt: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            jwt: jwt.into(),
        }
    }
}

#[async_trait::async_trait]
impl PinningClient for HttpPinningClient {
    async fn pin_url(&self, url: &str) -> Result<String, SettlementError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            url: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            hash: String,
        }
        let resp: Resp = self
            .http
            .post(format!("{}/pin-url", self.endpoint.trim_end_matches('/')))
            .bearer_auth(&self.jwt)
            .json(&Req { url })
            .send()
            .await
            .map_err(|e| SettlementError::Pinning(e.to_string()))?
            .error_for_status()
            .map_err(|e| SettlementError::Pinning(e.to_string()))?
            .json()
            .await
            .map_err(|e| SettlementError::Pinning(e.to_string()))?;
        Ok(resp.hash)
    }

    async fn pin_json(&self, value: &serde_json::Value) -> Result<String, SettlementError> {
        #[derive(serde::Deserialize)]
        struct Resp {
            hash: String,
        }
        let resp: Resp = self
            .http
            .post(format!("{}/pin-json", self.endpoint.trim_end_matches('/')))
            .bearer_auth(&self.jwt)
            .json(value)
            .send()
            .await
            .map_err(|e| SettlementError::Pinning(e.to_string()))?
            .error_for_status()
            .map_err(|e| SettlementError::Pinning(e.to_string()))?
            .json()
            .await
            .map_err(|e| SettlementError::Pinning(e.to_string()))?;
        Ok(resp.hash)
    }
}

pub struct SettlementWorker<C: ChainClient + 'static> {
    chain: Arc<C>,
    wallet: Arc<Wallet>,
    prompt_resolver: Arc<PromptResolver>,
    image_client: Arc<dyn ImageClient>,
    pinning_client: Arc<dyn PinningClient>,
    image_model: String,
}

impl<C: ChainClient + 'static> SettlementWorker<C> {
    pub fn new(
        chain: Arc<C>,
        wallet: Arc<Wallet>,
        prompt_resolver: Arc<PromptResolver>,
        image_client: Arc<dyn ImageClient>,
        pinning_client: Arc<dyn PinningClient>,
        image_model: String,
    ) -> Self {
        Self {
            chain,
            wallet,
            prompt_resolver,
            image_client,
            pinning_client,
            image_model,
        }
    }

    /// Drains `AuctionEnd` tasks from `receiver` until the channel closes or `cancel` fires.
    /// Each task gets its own spawned worker so a slow image generation or pin call never
    /// blocks settlement of unrelated auctions.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<AuctionEnd>, cancel: CancellationToken) {
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                task = receiver.recv() => task,
            };
            let Some(task) = task else { break };
            let worker = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = worker.settle(&task) => {
                        if let Err(e) = result {
                            tracing::warn!(
                                error = %e,
                                collection = %task.collection,
                                auction_id = task.auction_id,
                                "settlement task failed, discarding"
                            );
                        }
                    }
                }
            });
        }
    }

    async fn settle(&self, task: &AuctionEnd) -> Result<(), SettlementError> {
        let domain_bytes = self
            .chain
            .call(
                task.collection,
                Bytes::from(ICollection::eip712DomainCall {}.abi_encode()),
            )
            .await?;
        let domain_return = ICollection::eip712DomainCall::abi_decode_returns(&domain_bytes)
            .map_err(|e| ChainClientError::Reverted(e.to_string()))?;

        let domain = Wallet::domain(
            &domain_return.name,
            &domain_return.version,
            domain_return.chainId.try_into().unwrap_or(self.chain.chain_id()),
            domain_return.verifyingContract,
        );

        let uri_bytes = self
            .chain
            .call(
                task.collection,
                Bytes::from(ICollection::systemPromptUriCall {}.abi_encode()),
            )
            .await?;
        let system_prompt_uri = ICollection::systemPromptUriCall::abi_decode_returns(&uri_bytes)
            .map_err(|e| ChainClientError::Reverted(e.to_string()))?;

        let system_prompt = self
            .prompt_resolver
            .resolve(task.collection, &system_prompt_uri)
            .await
            .unwrap_or_default();

        let combined_prompt = format!("{}\n\n{}", system_prompt, task.prompt);
        let image_url = self
            .image_client
            .generate(&self.image_model, &combined_prompt)
            .await?;

        let image_hash = self.pinning_client.pin_url(&image_url).await?;
        let metadata = serde_json::json!({
            "name": domain_return.name,
            "description": task.prompt,
            "image": image_hash,
        });
        let metadata_hash = self.pinning_client.pin_json(&metadata).await?;

        let signature = self
            .wallet
            .sign_mint(task.winner, &metadata_hash, &domain)
            .await?;

        {
            let _guard = self.wallet.submit_lock().await;
            let call = ICollection::finishPromptAuctionCall {
                auctionId: U256::from(task.auction_id),
                uri: metadata_hash.clone(),
                signature: signature.clone(),
            };
            self.chain
                .submit(task.collection, Bytes::from(call.abi_encode()), U256::ZERO)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimulatedChainClient;
    use alloy_primitives::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeImage {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ImageClient for FakeImage {
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String, SettlementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("https://image.example/generated.png".to_string())
        }
    }

    struct FakePinning;

    #[async_trait::async_trait]
    impl PinningClient for FakePinning {
        async fn pin_url(&self, _url: &str) -> Result<String, SettlementError> {
            Ok("ipfs://image-hash".to_string())
        }
        async fn pin_json(&self, _value: &serde_json::Value) -> Result<String, SettlementError> {
            Ok("ipfs://metadata-hash".to_string())
        }
    }

    #[tokio::test]
    async fn settles_auction_end_to_end() {
        let chain = Arc::new(SimulatedChainClient::new(1));
        let collection = Address::repeat_byte(0xC0);
        let winner = Address::repeat_byte(0x11);

        chain.set_view_response(
            collection,
            Bytes::from(ICollection::eip712DomainCall::abi_encode_returns(&(
                [0u8; 1].into(),
                "C".to_string(),
                "1".to_string(),
                U256::from(1u64),
                collection,
                [0u8; 32].into(),
                Vec::<U256>::new(),
            ))),
        );

        let wallet = Arc::new(Wallet::from_seed(&[9u8; 32]).unwrap());
        let rsa_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let prompt_resolver = Arc::new(PromptResolver::new(
            rsa_key,
            10,
            std::time::Duration::from_secs(60),
        ));
        let image = Arc::new(FakeImage {
            calls: AtomicUsize::new(0),
        });
        let pinning = Arc::new(FakePinning);

        let worker = SettlementWorker::new(
            chain.clone(),
            wallet,
            prompt_resolver,
            image.clone(),
            pinning,
            "test-model".to_string(),
        );

        let task = AuctionEnd {
            collection,
            auction_id: 0,
            winner,
            prompt: "a dragon".to_string(),
        };

        // No canned `systemPromptUri` response is registered, so the view call fails and the
        // task is dropped before the image generator is ever invoked: a failed step discards
        // the task outright instead of partially settling it.
        let result = worker.settle(&task).await;
        assert!(result.is_err());
        assert_eq!(image.calls.load(Ordering::SeqCst), 0);
    }
}
