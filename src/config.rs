//! Environment-driven configuration.
//!
//! This worker has exactly one chain and one signing identity sealed in the keystore, so
//! configuration is a flat list of environment variables rather than a nested per-chain
//! document, loaded with `clap`'s `env` feature so every field falls back to its environment
//! variable when not passed on the command line.

use std::net::SocketAddr;

use alloy_primitives::Address;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "promptmint-worker", author, version, about)]
pub struct Config {
    /// URL to the enclave key-derivation and attestation socket.
    #[arg(long, env = "ENCLAVE_ENDPOINT")]
    pub enclave_endpoint: String,

    /// HTTP endpoint to the chain node.
    #[arg(long, env = "CHAIN_RPC_URL")]
    pub chain_rpc_url: url::Url,

    /// 20-byte hex address of the factory contract.
    #[arg(long, env = "FACTORY_ADDRESS")]
    pub factory_address: Address,

    /// Filesystem path for the sealed setup blob.
    #[arg(long, env = "SEALED_FILE_PATH")]
    pub sealed_file_path: std::path::PathBuf,

    /// Credential for the image generation service.
    #[arg(long, env = "IMAGE_API_KEY")]
    pub image_api_key: String,

    /// Model identifier passed to the image service.
    #[arg(long, env = "IMAGE_MODEL")]
    pub image_model: String,

    /// Base URL of the image generation service's `generate` endpoint.
    #[arg(long, env = "IMAGE_API_ENDPOINT")]
    pub image_api_endpoint: String,

    /// Credential for the content-addressed storage service.
    #[arg(long, env = "PINNING_JWT")]
    pub pinning_jwt: String,

    /// Base URL of the pinning service (`pinURL`/`pinJSON` consumed relative to this).
    #[arg(long, env = "PINNING_API_ENDPOINT")]
    pub pinning_api_endpoint: String,

    /// `host:port` for the attestation API. Absent disables the server.
    #[arg(long, env = "HTTP_BIND")]
    pub http_bind: Option<SocketAddr>,

    /// Dev-only: bypass AEAD sealing and persist the setup record as plaintext JSON.
    #[arg(long, env = "DEBUG_PLAIN_SETUP", default_value_t = false)]
    pub debug_plain_setup: bool,

    /// Dev-only: log the decoded setup record after load/generate.
    #[arg(long, env = "DEBUG_SHOW_SETUP", default_value_t = false)]
    pub debug_show_setup: bool,

    /// Indexer chunk size in blocks.
    #[arg(long, env = "INDEXER_CHUNK_SIZE", default_value_t = 10_000)]
    pub indexer_chunk_size: u64,

    /// Indexer poll interval in seconds.
    #[arg(long, env = "INDEXER_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub indexer_poll_interval_secs: u64,

    /// Scheduler sweep interval in seconds.
    #[arg(long, env = "SCHEDULER_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub scheduler_sweep_interval_secs: u64,

    /// Bounded concurrency of the collection metadata-init pool.
    #[arg(long, env = "COLLECTION_INIT_POOL_SIZE", default_value_t = 100)]
    pub collection_init_pool_size: usize,

    /// Capacity of the scheduler-to-settlement channel.
    #[arg(long, env = "SETTLEMENT_CHANNEL_CAPACITY", default_value_t = 1000)]
    pub settlement_channel_capacity: usize,

    /// Prompt cache TTL in seconds (default 1h).
    #[arg(long, env = "PROMPT_CACHE_TTL_SECS", default_value_t = 3_600)]
    pub prompt_cache_ttl_secs: u64,

    /// Prompt cache capacity (entries).
    #[arg(long, env = "PROMPT_CACHE_CAPACITY", default_value_t = 1_000)]
    pub prompt_cache_capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] clap::Error),
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Config::try_parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_explicit_args() {
        let config = Config::try_parse_from([
            "promptmint-worker",
            "--enclave-endpoint",
            "http://127.0.0.1:9000",
            "--chain-rpc-url",
            "http://127.0.0.1:8545",
            "--factory-address",
            "0x0000000000000000000000000000000000000001",
            "--sealed-file-path",
            "/tmp/sealed.bin",
            "--image-api-key",
            "key",
            "--image-model",
            "model",
            "--image-api-endpoint",
            "http://127.0.0.1:9001/generate",
            "--pinning-jwt",
            "jwt",
            "--pinning-api-endpoint",
            "http://127.0.0.1:9002",
        ])
        .unwrap();
        assert_eq!(config.indexer_chunk_size, 10_000);
        assert_eq!(config.scheduler_sweep_interval_secs, 60);
        assert!(config.http_bind.is_none());
    }
}
