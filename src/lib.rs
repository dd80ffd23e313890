//! Confidential off-chain settlement worker for an on-chain prompt-auction NFT platform.
//!
//! The worker runs inside a confidential computing enclave and bridges the chain to two
//! external services: an image generator and a content-addressed pinning service. It owns
//! the only key authorised to mint, and that key never leaves enclave memory in plaintext.
//!
//! # Modules
//!
//! - [`config`] — environment-driven configuration.
//! - [`telemetry`] — structured logging setup.
//! - [`sig_down`] — SIGTERM/SIGINT-driven cancellation root.
//! - [`clock`] — pluggable time source (wall clock in production, simulated in tests).
//! - [`keystore`] — enclave-sealed signing seed and decryption keypair.
//! - [`enclave`] — client for the enclave key-derivation and attestation service.
//! - [`wallet`] — deterministic signing identity and typed-data mint signatures.
//! - [`chain`] — chain client abstraction, EVM implementation, contract bindings.
//! - [`indexer`] — chunked log scanning and the in-memory collection registry.
//! - [`scheduler`] — periodic sweep that derives expired virtual auctions.
//! - [`prompt`] — system-prompt resolution, decryption, and caching.
//! - [`settlement`] — the generate → pin → sign → submit pipeline.
//! - [`attestation`] — HTTP endpoints exposing the worker's identity and a quote.
//! - [`run`] — bootstrap: wires every module together and owns the cancellation tree.

pub mod attestation;
pub mod chain;
pub mod clock;
pub mod config;
pub mod enclave;
pub mod indexer;
pub mod keystore;
pub mod prompt;
pub mod run;
pub mod scheduler;
pub mod settlement;
pub mod sig_down;
pub mod telemetry;
pub mod wallet;

pub use run::run;
