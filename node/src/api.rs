//! # Authority HTTP API
//!
//! The axum router exposing one authority's RPC surface. Every protocol
//! endpoint is a `POST` with a JSON body; the reply is always a
//! [`SignedEnvelope`] signed by this authority, or an unsigned
//! [`ErrorResponse`] with a non-2xx status.
//!
//! ## Endpoints
//!
//! | Method | Path                           | Body                      | Caller        |
//! |--------|--------------------------------|---------------------------|---------------|
//! | GET    | `/health`                      | none                      | orchestrators |
//! | POST   | `/ping`                        | `{}`                      | anyone        |
//! | POST   | `/generateDepositAddress`      | `{mintAddress}`           | anyone        |
//! | POST   | `/registerMintDepositAddress`  | `{mintAddress, ...}`      | anyone        |
//! | POST   | `/queryMintBalance`            | `{mintAddress}`           | anyone        |
//! | POST   | `/createMintTransaction`       | `{mintAddress}`           | anyone        |
//! | POST   | `/queryBurnHistory`            | `{burnAddress}`           | anyone        |
//! | POST   | `/submitWithdrawal`            | `{burnAddress, burnIndex}`| anyone        |
//! | POST   | `/stats`                       | `{}`                      | anyone        |
//! | POST   | `/triggerReconfigurationEvent` | envelope                  | coordinator   |
//! | POST   | `/approvePayouts[Test]`        | envelope                  | coordinator   |
//! | POST   | `/log`, `/computePendingPayouts`, `/computeUnspent`, `/dumpDatabase`, `/terminate` | envelope | any authority |
//!
//! Status codes: 401 for envelope failures, 409 for repeated registrations
//! and withdrawals, 500 for backend failures, 400 for everything else.

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use wgenix_protocol::authority::AuthorityService;
use wgenix_protocol::rpc::{Endpoint, ErrorResponse};
use wgenix_protocol::BridgeError;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuthorityService>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let mut router = Router::new().route("/health", get(health_handler));
    for endpoint in Endpoint::ALL {
        router = router.route(
            endpoint.path(),
            post(move |state: State<AppState>, body: Json<Value>| {
                authority_handler(state, endpoint, body)
            }),
        );
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn authority_handler(
    State(state): State<AppState>,
    endpoint: Endpoint,
    Json(body): Json<Value>,
) -> Response {
    let outcome = state.service.handle(endpoint, body).await;
    state.metrics.observe(endpoint, outcome.as_ref().map(|_| ()));
    state
        .metrics
        .stats_refreshes
        .set(i64::try_from(state.service.stats_refreshes()).unwrap_or(i64::MAX));

    match outcome {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Unsigned error body with the status the error kind maps to.
pub fn error_response(err: &BridgeError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse {
        kind: err.kind().to_string(),
        error: err.to_string(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use wgenix_protocol::amount::COIN;
    use wgenix_protocol::crypto::AuthorityWallet;
    use wgenix_protocol::envelope::{EnvelopeCodec, SignedEnvelope};
    use wgenix_protocol::ledger::LedgerClient;
    use wgenix_protocol::rpc::{DepositAddressResponse, Empty, PingResponse};
    use wgenix_protocol::settings::{AuthorityNode, GenixRpcSettings, NetworkSettings};
    use wgenix_protocol::sim::{SimChain, SimContract, SimLedger};
    use wgenix_protocol::storage::BridgeDB;

    use crate::metrics::BridgeMetrics;

    const MINT: &str = "0x000000000000000000000000000000000000000a";

    struct TestNode {
        router: Router,
        state: AppState,
        wallet: AuthorityWallet,
        ledger: Arc<dyn LedgerClient>,
    }

    fn settings(wallet: &AuthorityWallet) -> NetworkSettings {
        NetworkSettings {
            authority_nodes: vec![AuthorityNode {
                hostname: "http://127.0.0.1:8443".into(),
                wallet_address: wallet.address(),
                new_wallet_address: None,
            }],
            authority_threshold: 1,
            payout_coordinator: 0,
            deposit_confirmations: 1,
            change_confirmations: 1,
            tax_payout_addresses: vec!["gTax".into()],
            change_address: "gChange".into(),
            configuration_nonce: 0,
            new_authority_threshold: 1,
            new_min_burn_amount: 10 * COIN,
            support_reconfiguration: false,
            chain_id: 56,
            contract_address: "0x00000000000000000000000000000000000000cc".into(),
            provider: "http://indexer.invalid".into(),
            genix_rpc: GenixRpcSettings {
                url: "http://genix.invalid".into(),
                username: String::new(),
                password: String::new(),
            },
            authority_port: 8443,
            sync_delay_threshold: 15,
        }
    }

    fn test_node() -> TestNode {
        let chain = SimChain::new(100);
        let wallet = AuthorityWallet::from_seed(&[7; 32]);
        let ledger: Arc<dyn LedgerClient> = Arc::new(SimLedger::new(chain, 0));
        let service = Arc::new(AuthorityService::new(
            Arc::new(settings(&wallet)),
            BridgeDB::open_temporary().unwrap(),
            wallet.clone(),
            ledger.clone(),
            Arc::new(SimContract::new()),
        ));
        let state = AppState {
            service,
            metrics: Arc::new(BridgeMetrics::new().unwrap()),
        };
        TestNode {
            router: create_router(state.clone()),
            state,
            wallet,
            ledger,
        }
    }

    impl TestNode {
        fn codec(&self) -> EnvelopeCodec {
            EnvelopeCodec::new(self.ledger.clone(), self.wallet.clone(), 15)
        }
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let node = test_node();
        let (status, body) = get(&node.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn ping_reply_is_signed_by_the_authority() {
        let node = test_node();
        let (status, body) = post_json(&node.router, "/ping", json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let envelope: SignedEnvelope = serde_json::from_value(body).unwrap();
        let ping: PingResponse = node
            .codec()
            .verify(&envelope, &node.wallet.address())
            .await
            .unwrap();
        assert!(ping.timestamp > 0);
    }

    #[tokio::test]
    async fn every_endpoint_is_routed() {
        let node = test_node();
        for endpoint in Endpoint::ALL {
            let (status, _) = post_json(&node.router, endpoint.path(), json!({})).await;
            assert_ne!(status, StatusCode::NOT_FOUND, "{endpoint} not routed");
            assert_ne!(status, StatusCode::METHOD_NOT_ALLOWED, "{endpoint} not POST");
        }
    }

    #[tokio::test]
    async fn deposit_address_registration_over_http() {
        let node = test_node();
        let (status, generated) =
            post_json(&node.router, "/generateDepositAddress", json!({ "mintAddress": MINT })).await;
        assert_eq!(status, StatusCode::OK);

        let request = json!({
            "mintAddress": MINT,
            "generateDepositAddressResponses": [generated],
        });
        let (status, body) = post_json(&node.router, "/registerMintDepositAddress", request.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let envelope: SignedEnvelope = serde_json::from_value(body).unwrap();
        let registered: DepositAddressResponse = envelope.peek().unwrap();
        assert!(!registered.deposit_address.is_empty());

        let (status, body) = post_json(&node.router, "/registerMintDepositAddress", request).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(error.kind, "AlreadyRegistered");

        assert_eq!(node.state.metrics.deposit_addresses_registered_total.get(), 1);
        assert_eq!(
            node.state
                .metrics
                .requests_total
                .with_label_values(&["/registerMintDepositAddress", "409"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_mint_address_is_a_bad_request() {
        let node = test_node();
        let (status, body) =
            post_json(&node.router, "/queryMintBalance", json!({ "mintAddress": MINT })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(error.kind, "NotRegistered");
        assert_eq!(node.state.service.error_log().len(), 1);
    }

    #[tokio::test]
    async fn forged_envelope_is_unauthorized() {
        let node = test_node();
        let stranger = EnvelopeCodec::new(node.ledger.clone(), AuthorityWallet::from_seed(&[9; 32]), 15);
        let envelope = stranger.create(&Empty {}).await.unwrap();

        let (status, body) =
            post_json(&node.router, "/log", serde_json::to_value(&envelope).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let error: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(error.kind, "BadSignature");
        assert_eq!(node.state.metrics.envelopes_rejected_total.get(), 1);
    }

    #[tokio::test]
    async fn terminate_answers_then_signals() {
        let node = test_node();
        let shutdown = node.state.service.shutdown_signal();
        let envelope = node.codec().create(&Empty {}).await.unwrap();

        let (status, _) =
            post_json(&node.router, "/terminate", serde_json::to_value(&envelope).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        tokio::time::timeout(std::time::Duration::from_secs(1), shutdown.notified())
            .await
            .expect("shutdown signalled");
    }
}
