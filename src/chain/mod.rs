//! Chain client abstraction: a narrow interface the indexer, scheduler, and settlement
//! worker consume, backed in production by an RPC client and in tests by an in-process
//! simulator. No retries at this layer — callers log and continue on the next tick instead.

pub mod contracts;
pub mod evm;
pub mod sim;

use alloy_primitives::{Address, Bytes, U256};
use alloy_rpc_types_eth::Log;
use async_trait::async_trait;

pub use evm::EvmChainClient;
pub use sim::SimulatedChainClient;

#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("contract call reverted: {0}")]
    Reverted(String),
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),
}

/// One raw event log as returned by `eth_getLogs`; topics/data are decoded by the caller.
pub type ChainLog = Log;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Logs matching any of `topics` (first indexed topic, i.e. the event signature hash),
    /// emitted by any address in `addresses` (empty = no address filter), within
    /// `[from_block, to_block]` inclusive.
    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[alloy_primitives::B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainLog>, ChainClientError>;

    async fn block_number(&self) -> Result<u64, ChainClientError>;

    fn chain_id(&self) -> u64;

    /// View call, ABI-encoded input / raw output, so the trait stays codec-agnostic.
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainClientError>;

    /// Submit a transaction; returns once it's accepted by the node (not necessarily mined).
    async fn submit(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<alloy_primitives::B256, ChainClientError>;
}
