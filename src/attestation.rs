//! Attestation HTTP API: three endpoints surfacing the worker's on-chain identity and a
//! remote attestation quote, so relying parties can verify who they're talking to before
//! trusting a prompt submission. Not started if no bind address is configured; shutdown is
//! hooked to the root cancellation token via `axum::serve(...).with_graceful_shutdown(...)`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::enclave::{EnclaveClient, EnclaveError};
use crate::wallet::Wallet;

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("failed to obtain attestation quote: {0}")]
    Quote(#[from] EnclaveError),
}

impl IntoResponse for AttestationError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "attestation request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub struct AttestationState {
    pub wallet: Arc<Wallet>,
    pub rsa_public_key: RsaPublicKey,
    pub factory_address: alloy_primitives::Address,
    pub enclave: Arc<dyn EnclaveClient>,
}

impl Clone for AttestationState {
    fn clone(&self) -> Self {
        Self {
            wallet: self.wallet.clone(),
            rsa_public_key: self.rsa_public_key.clone(),
            factory_address: self.factory_address,
            enclave: self.enclave.clone(),
        }
    }
}

pub fn routes() -> Router<Arc<AttestationState>> {
    Router::new()
        .route("/address", get(get_address))
        .route("/pubkey", get(get_pubkey))
        .route("/quote", get(get_quote))
}

#[instrument(skip_all)]
async fn get_address(State(state): State<Arc<AttestationState>>) -> impl IntoResponse {
    (StatusCode::OK, format!("{:#x}", state.wallet.address()))
}

#[instrument(skip_all)]
async fn get_pubkey(State(state): State<Arc<AttestationState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "modulus": state.rsa_public_key.n().to_str_radix(16),
        "exponent": state.rsa_public_key.e().to_str_radix(16),
    }))
}

#[instrument(skip_all)]
async fn get_quote(
    State(state): State<Arc<AttestationState>>,
) -> Result<impl IntoResponse, AttestationError> {
    // Report data binds the quote to both the signer identity and the contract it's
    // authorised against: wallet address ‖ factory address, big-endian.
    let mut report_data = Vec::with_capacity(40);
    report_data.extend_from_slice(state.wallet.address().as_slice());
    report_data.extend_from_slice(state.factory_address.as_slice());

    let quote = state.enclave.quote(&report_data).await?;
    Ok((StatusCode::OK, Json(serde_json::json!(quote))))
}

/// Starts the server if `bind` is configured; runs until `cancel` fires. Bind failure is
/// logged and non-fatal: the worker continues without the attestation API rather than dying
/// over a concern that isn't on the settlement critical path.
pub async fn serve(bind: Option<SocketAddr>, state: Arc<AttestationState>, cancel: CancellationToken) {
    let Some(addr) = bind else {
        tracing::info!("no HTTP bind address configured, attestation API disabled");
        return;
    };

    let router = routes().with_state(state).layer(TraceLayer::new_for_http());
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind attestation API, continuing without it");
            return;
        }
    };

    tracing::info!(%addr, "attestation API listening");
    let shutdown = async move { cancel.cancelled().await };
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "attestation API server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::SimulatedEnclaveClient;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<AttestationState> {
        let wallet = Arc::new(Wallet::from_seed(&[3u8; 32]).unwrap());
        let rsa_private_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        Arc::new(AttestationState {
            wallet,
            rsa_public_key: RsaPublicKey::from(&rsa_private_key),
            factory_address: alloy_primitives::Address::repeat_byte(0xAB),
            enclave: Arc::new(SimulatedEnclaveClient::new([1u8; 32])),
        })
    }

    #[tokio::test]
    async fn address_endpoint_returns_wallet_address() {
        let app = routes().with_state(state());
        let response = app
            .oneshot(Request::builder().uri("/address").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn quote_endpoint_returns_ok() {
        let app = routes().with_state(state());
        let response = app
            .oneshot(Request::builder().uri("/quote").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
