//! In-process chain simulator backing unit tests for the indexer, scheduler, and settlement
//! worker without a live RPC node.

use std::sync::Mutex;

use alloy_primitives::{Address, B256, Bytes, Log as PrimitiveLog, LogData, U256};
use alloy_rpc_types_eth::Log;
use async_trait::async_trait;

use super::{ChainClient, ChainClientError, ChainLog};

#[derive(Default)]
struct State {
    logs: Vec<Log>,
    block_number: u64,
    /// calldata-selector-agnostic canned responses for `call`, keyed by `to`.
    view_responses: std::collections::HashMap<Address, Bytes>,
    submitted: Vec<(Address, Bytes, U256)>,
}

/// A fake chain: tests push logs and canned view-call responses directly instead of mining
/// blocks or deploying bytecode.
pub struct SimulatedChainClient {
    state: Mutex<State>,
    chain_id: u64,
}

impl SimulatedChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            chain_id,
        }
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn set_block_number(&self, block_number: u64) {
        self.state.lock().unwrap().block_number = block_number;
    }

    /// Register the raw return bytes a `call()` to `to` should yield, regardless of calldata.
    /// Sufficient for tests that drive one view method per contract address at a time.
    pub fn set_view_response(&self, to: Address, response: Bytes) {
        self.state.lock().unwrap().view_responses.insert(to, response);
    }

    pub fn submitted_transactions(&self) -> Vec<(Address, Bytes, U256)> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl ChainClient for SimulatedChainClient {
    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainLog>, ChainClientError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let in_range = log
                    .block_number
                    .map(|bn| bn >= from_block && bn <= to_block)
                    .unwrap_or(true);
                let address_ok = addresses.is_empty() || addresses.contains(&log.inner.address);
                let topic_ok = topics.is_empty()
                    || log
                        .inner
                        .data
                        .topics()
                        .first()
                        .map(|t| topics.contains(t))
                        .unwrap_or(false);
                in_range && address_ok && topic_ok
            })
            .cloned()
            .collect())
    }

    async fn block_number(&self) -> Result<u64, ChainClientError> {
        Ok(self.state.lock().unwrap().block_number)
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn call(&self, to: Address, _calldata: Bytes) -> Result<Bytes, ChainClientError> {
        self.state
            .lock()
            .unwrap()
            .view_responses
            .get(&to)
            .cloned()
            .ok_or_else(|| ChainClientError::Reverted(format!("no canned response for {to}")))
    }

    async fn submit(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<B256, ChainClientError> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push((to, calldata, value));
        Ok(B256::from(U256::from(state.submitted.len() as u64)))
    }
}
