//! Auction scheduler: sweeps the collection cache on a ticker, derives expired virtual
//! auctions from each collection's parameters, and emits `AuctionEnd` tasks exactly once per
//! `(collection, auctionId)` for the process lifetime.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::contracts::ICollection;
use crate::chain::{ChainClient, ChainClientError};
use crate::clock::Clock;
use crate::indexer::IndexerState;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Chain(#[from] ChainClientError),
}

/// Produced by the scheduler, consumed by settlement workers.
#[derive(Debug, Clone)]
pub struct AuctionEnd {
    pub collection: Address,
    pub auction_id: u64,
    pub winner: Address,
    pub prompt: String,
}

pub struct Scheduler<C: ChainClient + 'static> {
    chain: Arc<C>,
    clock: Arc<dyn Clock>,
    state: Arc<IndexerState>,
    sender: mpsc::Sender<AuctionEnd>,
}

impl<C: ChainClient + 'static> Scheduler<C> {
    pub fn new(
        chain: Arc<C>,
        clock: Arc<dyn Clock>,
        state: Arc<IndexerState>,
        sender: mpsc::Sender<AuctionEnd>,
    ) -> Self {
        Self {
            chain,
            clock,
            state,
            sender,
        }
    }

    /// One sweep: for every ready collection, advance `nextAuctionId` past every window whose
    /// end time has passed, forking a settlement check per advanced id.
    pub async fn sweep_once(&self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let ready: Vec<Address> = {
            let cache = self.state.cache.read().await;
            cache
                .values()
                .filter(|c| c.is_ready())
                .map(|c| c.address)
                .collect()
        };

        for address in ready {
            // `next` is the window-start of `nextAuctionId`; looping here (instead of just
            // checking once) catches up every window the worker missed while it was down.
            loop {
                let (creation_timestamp, auction_duration, next_auction_id) = {
                    let cache = self.state.cache.read().await;
                    let Some(c) = cache.get(&address) else {
                        break;
                    };
                    (c.creation_timestamp, c.auction_duration, c.next_auction_id)
                };
                if auction_duration == 0 {
                    break;
                }
                let next = creation_timestamp + next_auction_id * auction_duration;
                if next > now {
                    break;
                }

                let settled_id = next_auction_id;
                {
                    let mut cache = self.state.cache.write().await;
                    if let Some(c) = cache.get_mut(&address) {
                        // Advance before forking: a crash loses at most this one task, which
                        // is re-derivable on restart from a later `PromptAuctionFinished`.
                        c.next_auction_id = settled_id + 1;
                    }
                }

                self.fork_settlement_check(address, settled_id, cancel.clone());
            }
        }
        Ok(())
    }

    fn fork_settlement_check(&self, collection: Address, auction_id: u64, cancel: CancellationToken) {
        let chain = self.chain.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                r = check_and_emit(chain, collection, auction_id, sender) => r,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, %collection, auction_id, "settlement check failed");
            }
        });
    }
}

async fn check_and_emit<C: ChainClient>(
    chain: Arc<C>,
    collection: Address,
    auction_id: u64,
    sender: mpsc::Sender<AuctionEnd>,
) -> Result<(), SchedulerError> {
    let call = ICollection::getAuctionCall {
        auctionId: alloy_primitives::U256::from(auction_id),
    };
    let bytes: Bytes = chain
        .call(collection, Bytes::from(call.abi_encode()))
        .await?;
    let auction = ICollection::getAuctionCall::abi_decode_returns(&bytes)
        .map_err(|e| ChainClientError::Reverted(e.to_string()))?;

    if auction.highestBidder.is_zero() {
        // No bidder means no token to mint, so there's nothing to settle.
        return Ok(());
    }

    let task = AuctionEnd {
        collection,
        auction_id,
        winner: auction.highestBidder,
        prompt: auction.prompt,
    };
    // Backpressure here is intentional: a full channel stalls this sweep rather than dropping
    // work, which is fine since the chain re-exposes the same unsettled state on the next sweep.
    let _ = sender.send(task).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimulatedChainClient;
    use crate::clock::SimulatedClock;
    use crate::indexer::Collection;

    fn ready_collection(address: Address, creation: u64, duration: u64) -> Collection {
        Collection {
            address,
            creation_timestamp: creation,
            auction_duration: duration,
            next_auction_id: 0,
            metadata_initialized: true,
            next_auction_id_initialized: true,
        }
    }

    #[tokio::test]
    async fn advances_next_auction_id_past_expired_windows() {
        let chain = Arc::new(SimulatedChainClient::new(1));
        let clock = Arc::new(SimulatedClock::new(10_000));
        let state = Arc::new(IndexerState::default());
        let (tx, mut rx) = mpsc::channel(10);
        let address = Address::repeat_byte(0xAB);

        state
            .cache
            .write()
            .await
            .insert(address, ready_collection(address, 0, 100));

        chain.set_view_response(
            address,
            Bytes::from(ICollection::getAuctionCall::abi_encode_returns(
                &ICollection::AuctionView {
                    finished: true,
                    highestBidder: Address::ZERO,
                    highestBid: alloy_primitives::U256::ZERO,
                    prompt: String::new(),
                },
            )),
        );

        let scheduler = Scheduler::new(chain, clock, state.clone(), tx);
        let cancel = CancellationToken::new();
        scheduler.sweep_once(&cancel).await.unwrap();

        let next_id = state.cache.read().await.get(&address).unwrap().next_auction_id;
        assert!(next_id >= 99);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn monotonic_and_at_most_once_per_auction_id() {
        let chain = Arc::new(SimulatedChainClient::new(1));
        let clock = Arc::new(SimulatedClock::new(50));
        let state = Arc::new(IndexerState::default());
        let (tx, _rx) = mpsc::channel(10);
        let address = Address::repeat_byte(0xCD);
        state
            .cache
            .write()
            .await
            .insert(address, ready_collection(address, 0, 100));

        chain.set_view_response(
            address,
            Bytes::from(ICollection::getAuctionCall::abi_encode_returns(
                &ICollection::AuctionView {
                    finished: false,
                    highestBidder: Address::ZERO,
                    highestBid: alloy_primitives::U256::ZERO,
                    prompt: String::new(),
                },
            )),
        );

        let scheduler = Scheduler::new(chain, clock, state.clone(), tx);
        let cancel = CancellationToken::new();
        scheduler.sweep_once(&cancel).await.unwrap();
        let id_before = state.cache.read().await.get(&address).unwrap().next_auction_id;
        scheduler.sweep_once(&cancel).await.unwrap();
        let id_after = state.cache.read().await.get(&address).unwrap().next_auction_id;
        assert_eq!(id_before, id_after);
    }
}
