//! Payment provider seam, deferred lesson charges, refunds and webhooks.

mod error;
pub use error::{GatewayError, GatewayResult, PaymentError, PaymentResult};

mod gateway;
pub use gateway::{
    ChargeOutcome, ChargeRequest, CheckoutSession, CustomerInfo, IntentStatus, PaymentGateway,
    RefundOutcome, SetupSessionDetails, SetupSessionRequest, SubscriptionSessionRequest,
};

mod stripe;
pub use stripe::StripeGateway;

mod development;
pub use development::{DECLINE_MARKER, DevelopmentGateway, OUTAGE_MARKER};

mod retry;
pub use retry::RetryPolicy;

pub mod executor;
pub use executor::{ApprovalCharge, ExecutionReport, ExecutorSettings, PaymentExecutor};

pub mod refund;
pub mod scheduler;
pub mod setup;
pub mod webhook;

use std::sync::Arc;

/// Picks the gateway the configuration asks for.
pub fn gateway_from_config(config: &crate::config::Stripe) -> GatewayResult<Arc<dyn PaymentGateway>> {
    if config.development_mode() {
        tracing::warn!("stripe development mode: payments are simulated");
        return Ok(Arc::new(DevelopmentGateway::new(config.success_url())));
    }
    Ok(Arc::new(StripeGateway::new(config)?))
}
