//! # Prometheus Metrics
//!
//! Operational metrics of one authority, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated registry under the
//! `wgenix_` prefix.
//!
//! | Metric                                     | Kind        | Labels             |
//! |--------------------------------------------|-------------|--------------------|
//! | `wgenix_requests_total`                    | counter     | `endpoint, status` |
//! | `wgenix_envelopes_rejected_total`          | counter     |                    |
//! | `wgenix_settlement_signatures_total`       | counter     | `mode`             |
//! | `wgenix_payouts_applied_total`             | counter     |                    |
//! | `wgenix_withdrawals_recorded_total`        | counter     |                    |
//! | `wgenix_deposit_addresses_registered_total`| counter     |                    |
//! | `wgenix_stats_refreshes`                   | gauge       |                    |
//! | `wgenix_ledger_height`                     | gauge       |                    |

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use wgenix_protocol::rpc::Endpoint;
use wgenix_protocol::settlement::ApprovalMode;
use wgenix_protocol::BridgeError;

#[derive(Clone)]
pub struct BridgeMetrics {
    registry: Registry,
    /// Answered requests by endpoint path and HTTP status.
    pub requests_total: IntCounterVec,
    /// Requests refused because their envelope failed validation.
    pub envelopes_rejected_total: IntCounter,
    /// Approval-chain signatures this authority has added, by round mode.
    pub settlement_signatures_total: IntCounterVec,
    /// Real approval rounds whose bookkeeping this authority committed.
    pub payouts_applied_total: IntCounter,
    pub withdrawals_recorded_total: IntCounter,
    pub deposit_addresses_registered_total: IntCounter,
    /// Aggregate statistics recomputations since start.
    pub stats_refreshes: IntGauge,
    /// Ledger tip as last seen by the height poller.
    pub ledger_height: IntGauge,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: C) -> prometheus::Result<C> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl BridgeMetrics {
    /// Create and register every metric. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("wgenix".into()), None)?;

        let requests_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("requests_total", "Requests answered, by endpoint and status"),
                &["endpoint", "status"],
            )?,
        )?;
        let envelopes_rejected_total = register(
            &registry,
            IntCounter::new(
                "envelopes_rejected_total",
                "Requests refused for an expired, forked, or badly signed envelope",
            )?,
        )?;
        let settlement_signatures_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "settlement_signatures_total",
                    "Signatures added to approval chains, by round mode",
                ),
                &["mode"],
            )?,
        )?;
        let payouts_applied_total = register(
            &registry,
            IntCounter::new("payouts_applied_total", "Real settlement rounds applied to the store")?,
        )?;
        let withdrawals_recorded_total = register(
            &registry,
            IntCounter::new("withdrawals_recorded_total", "Withdrawals accepted via /submitWithdrawal")?,
        )?;
        let deposit_addresses_registered_total = register(
            &registry,
            IntCounter::new(
                "deposit_addresses_registered_total",
                "Mint deposit addresses registered",
            )?,
        )?;
        let stats_refreshes = register(
            &registry,
            IntGauge::new("stats_refreshes", "Aggregate statistics recomputations since start")?,
        )?;
        let ledger_height = register(
            &registry,
            IntGauge::new("ledger_height", "Ledger tip height seen by this authority")?,
        )?;

        Ok(Self {
            registry,
            requests_total,
            envelopes_rejected_total,
            settlement_signatures_total,
            payouts_applied_total,
            withdrawals_recorded_total,
            deposit_addresses_registered_total,
            stats_refreshes,
            ledger_height,
        })
    }

    /// Account for one answered request.
    pub fn observe(&self, endpoint: Endpoint, outcome: Result<(), &BridgeError>) {
        let status = match outcome {
            Ok(()) => 200,
            Err(e) => e.status_code(),
        };
        self.requests_total
            .with_label_values(&[endpoint.path(), &status.to_string()])
            .inc();

        match outcome {
            Err(e) if e.is_authentication() => self.envelopes_rejected_total.inc(),
            Err(_) => {}
            Ok(()) => match endpoint {
                Endpoint::ApprovePayoutsTest => self.signed(ApprovalMode::Test),
                Endpoint::ApprovePayouts => {
                    self.signed(ApprovalMode::Real);
                    self.payouts_applied_total.inc();
                }
                Endpoint::SubmitWithdrawal => self.withdrawals_recorded_total.inc(),
                Endpoint::RegisterMintDepositAddress => self.deposit_addresses_registered_total.inc(),
                _ => {}
            },
        }
    }

    fn signed(&self, mode: ApprovalMode) {
        let label = match mode {
            ApprovalMode::Test => "test",
            ApprovalMode::Real => "real",
        };
        self.settlement_signatures_total.with_label_values(&[label]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<BridgeMetrics>;

/// Renders `/metrics`.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

pub fn metrics_router(metrics: SharedMetrics) -> axum::Router {
    axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(metrics)
}
