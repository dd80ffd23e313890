//! Production chain client: an alloy `RootProvider` wrapped in the standard filler stack
//! (gas, nonce, chain-id, wallet fillers over `RootProvider`), built from individual
//! `alloy-*` crates rather than the combined `alloy` meta-crate.

use alloy_network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::fillers::{
    ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types_eth::{Filter, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_transport_http::Http;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use url::Url;

use super::{ChainClient, ChainClientError, ChainLog};

type InnerFiller = JoinFill<
    JoinFill<JoinFill<GasFiller, NonceFiller>, ChainIdFiller>,
    WalletFiller<EthereumWallet>,
>;
type InnerProvider = FillProvider<InnerFiller, RootProvider>;

pub struct EvmChainClient {
    provider: InnerProvider,
    chain_id: u64,
}

impl EvmChainClient {
    pub async fn connect(
        rpc_url: Url,
        signer: PrivateKeySigner,
    ) -> Result<Self, ChainClientError> {
        let wallet = EthereumWallet::from(signer);
        let transport = Http::<HttpClient>::new(rpc_url);
        let root = RootProvider::<Ethereum>::new_http(transport.url().clone());
        let provider = ProviderBuilder::new().wallet(wallet).on_provider(root);

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ChainClientError::Transport(e.to_string()))?;

        Ok(Self { provider, chain_id })
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainLog>, ChainClientError> {
        let mut filter = Filter::new().from_block(from_block).to_block(to_block);
        if !addresses.is_empty() {
            filter = filter.address(addresses.to_vec());
        }
        if !topics.is_empty() {
            filter = filter.event_signature(topics.to_vec());
        }
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainClientError::Transport(e.to_string()))
    }

    async fn block_number(&self) -> Result<u64, ChainClientError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainClientError::Transport(e.to_string()))
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainClientError> {
        let tx = TransactionRequest::default().to(to).input(calldata.into());
        self.provider
            .call(tx)
            .await
            .map_err(|e| ChainClientError::Reverted(e.to_string()))
    }

    async fn submit(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<B256, ChainClientError> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(calldata.into())
            .value(value);
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainClientError::TransactionRejected(e.to_string()))?;
        Ok(*pending.tx_hash())
    }
}
