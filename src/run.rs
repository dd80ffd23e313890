//! Bootstrap: wires every subsystem together and owns the cancellation tree.
//!
//! Construction order follows the dependency graph, leaves first: keystore → wallet → chain
//! client → indexer → scheduler → settlement workers → attestation API.

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::attestation::{self, AttestationState};
use crate::chain::EvmChainClient;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::enclave::HttpEnclaveClient;
use crate::indexer::Indexer;
use crate::keystore::{SealedKeystore, SetupInputs};
use crate::scheduler::Scheduler;
use crate::settlement::{HttpImageClient, HttpPinningClient, SettlementWorker};
use crate::sig_down::SigDown;
use crate::wallet::Wallet;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    crate::telemetry::init();

    let config = Config::load()?;
    tracing::info!("starting promptmint-worker");

    let enclave = Arc::new(HttpEnclaveClient::new(config.enclave_endpoint.clone()));
    let keystore = SealedKeystore::new(
        &config.sealed_file_path,
        config.debug_plain_setup,
        config.debug_show_setup,
    );
    let setup_record = keystore
        .load_or_generate(
            enclave.as_ref(),
            SetupInputs {
                chain_rpc_url: config.chain_rpc_url.as_str(),
                factory_address: &config.factory_address.to_string(),
                image_api_key: &config.image_api_key,
                pinning_jwt: &config.pinning_jwt,
                http_bind: config.http_bind.map(|a| a.to_string()).as_deref(),
            },
        )
        .await?;

    let wallet = Arc::new(Wallet::from_seed(&setup_record.signing_seed)?);
    tracing::info!(address = %wallet.address(), "wallet identity ready");

    let signer = alloy_signer_local::PrivateKeySigner::from_bytes(&alloy_primitives::keccak256(
        setup_record.signing_seed,
    ))?;
    let chain = Arc::new(EvmChainClient::connect(config.chain_rpc_url.clone(), signer).await?);

    let rsa_private_key = setup_record.rsa_private_key()?;
    let rsa_public_key = setup_record.rsa_public_key()?;

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();

    let indexer = Arc::new(Indexer::new(
        chain.clone(),
        config.factory_address,
        config.indexer_chunk_size,
        config.collection_init_pool_size,
    ));
    let indexer_handle = {
        let indexer = indexer.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.indexer_poll_interval_secs);
        tokio::spawn(async move { run_indexer_ticker(indexer, interval, cancel).await })
    };

    let (settlement_tx, settlement_rx) = mpsc::channel(config.settlement_channel_capacity);
    let scheduler = Arc::new(Scheduler::new(
        chain.clone(),
        Arc::new(SystemClock),
        indexer.state.clone(),
        settlement_tx,
    ));
    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.scheduler_sweep_interval_secs);
        tokio::spawn(async move { run_scheduler_ticker(scheduler, interval, cancel).await })
    };

    let prompt_resolver = Arc::new(crate::prompt::PromptResolver::new(
        rsa_private_key,
        config.prompt_cache_capacity,
        Duration::from_secs(config.prompt_cache_ttl_secs),
    ));
    let image_client = Arc::new(HttpImageClient::new(
        config.image_api_endpoint.clone(),
        config.image_api_key.clone(),
    ));
    let pinning_client = Arc::new(HttpPinningClient::new(
        config.pinning_api_endpoint.clone(),
        config.pinning_jwt.clone(),
    ));
    let settlement_worker = Arc::new(SettlementWorker::new(
        chain.clone(),
        wallet.clone(),
        prompt_resolver,
        image_client,
        pinning_client,
        config.image_model.clone(),
    ));
    let settlement_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { settlement_worker.run(settlement_rx, cancel).await })
    };

    let attestation_state = Arc::new(AttestationState {
        wallet,
        rsa_public_key,
        factory_address: config.factory_address,
        enclave,
    });
    let attestation_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            attestation::serve(config.http_bind, attestation_state, cancel).await
        })
    };

    sig_down.recv().await;
    tracing::info!("shutdown signal received, winding down");

    let _ = tokio::join!(
        indexer_handle,
        scheduler_handle,
        settlement_handle,
        attestation_handle
    );

    Ok(())
}

async fn run_indexer_ticker<C: crate::chain::ChainClient + 'static>(
    indexer: Arc<Indexer<C>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = indexer.scan_once().await {
                    tracing::warn!(error = %e, "indexer scan failed, retrying next tick");
                }
            }
        }
    }
}

async fn run_scheduler_ticker<C: crate::chain::ChainClient + 'static>(
    scheduler: Arc<Scheduler<C>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = scheduler.sweep_once(&cancel).await {
                    tracing::warn!(error = %e, "scheduler sweep failed, retrying next tick");
                }
            }
        }
    }
}
