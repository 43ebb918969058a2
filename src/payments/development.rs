//! Offline gateway used when `stripe.development_mode` is set.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use super::error::{GatewayError, GatewayResult};
use super::gateway::{
    ChargeOutcome, ChargeRequest, CheckoutSession, CustomerInfo, IntentStatus, PaymentGateway,
    RefundOutcome, SetupSessionDetails, SetupSessionRequest, SubscriptionSessionRequest,
};

const SETUP_PREFIX: &str = "cs_dev_setup_";

/// Payment methods containing this marker are declined.
pub const DECLINE_MARKER: &str = "decline";

/// Payment methods and intents containing this marker hit a simulated provider outage.
pub const OUTAGE_MARKER: &str = "unavailable";

fn outage() -> GatewayError {
    GatewayError::Api {
        status: 503,
        code: None,
        message: String::from("development mode: simulated outage"),
    }
}

/// Produces ids derived from the inputs so repeated calls agree with each other.
#[derive(Debug, Default)]
pub struct DevelopmentGateway {
    checkout_url: String,
    charges: AtomicUsize,
}

impl DevelopmentGateway {
    pub fn new(checkout_url: impl Into<String>) -> Self {
        Self {
            checkout_url: checkout_url.into(),
            charges: AtomicUsize::new(0),
        }
    }

    /// Number of charges that went through.
    pub fn charges(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn setup_session_id(reservation_id: Uuid) -> String {
        format!("{SETUP_PREFIX}{}", reservation_id.simple())
    }

    pub fn payment_method_id(reservation_id: Uuid) -> String {
        format!("pm_dev_{}", reservation_id.simple())
    }

    fn session(&self, session_id: String) -> CheckoutSession {
        let url = format!("{}?session_id={}", self.checkout_url, session_id);
        CheckoutSession {
            session_id,
            url: Some(url),
        }
    }
}

#[async_trait]
impl PaymentGateway for DevelopmentGateway {
    async fn ensure_customer(
        &self,
        existing: Option<&str>,
        customer: &CustomerInfo<'_>,
    ) -> GatewayResult<String> {
        Ok(existing
            .map(str::to_string)
            .unwrap_or_else(|| format!("cus_dev_{}", customer.user_id.simple())))
    }

    async fn create_setup_session(
        &self,
        request: &SetupSessionRequest<'_>,
    ) -> GatewayResult<CheckoutSession> {
        tracing::info!(reservation_id = %request.reservation_id, "development mode: mock setup session");
        Ok(self.session(Self::setup_session_id(request.reservation_id)))
    }

    async fn retrieve_setup_session(&self, session_id: &str) -> GatewayResult<SetupSessionDetails> {
        let reservation_id = session_id
            .strip_prefix(SETUP_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                code: Some(String::from("resource_missing")),
                message: format!("No such checkout.session: {session_id}"),
            })?;

        Ok(SetupSessionDetails {
            session_id: session_id.to_string(),
            customer_id: None,
            setup_intent_id: Some(format!("seti_dev_{}", reservation_id.simple())),
            payment_method_id: Some(Self::payment_method_id(reservation_id)),
            reservation_id: Some(reservation_id),
        })
    }

    async fn charge(&self, request: &ChargeRequest<'_>) -> GatewayResult<ChargeOutcome> {
        if request.payment_method_id.contains(OUTAGE_MARKER) {
            return Err(outage());
        }
        if request.payment_method_id.contains(DECLINE_MARKER) {
            return Err(GatewayError::CardDeclined(String::from(
                "Your card was declined. (generic_decline)",
            )));
        }

        self.charges.fetch_add(1, Ordering::SeqCst);
        tracing::info!(payment_id = %request.payment_id, amount = request.amount, "development mode: mock charge");
        Ok(ChargeOutcome {
            intent_id: format!("pi_dev_{}", request.payment_id.simple()),
            status: IntentStatus::Succeeded,
        })
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount: i64,
        _reason: &str,
        _idempotency_key: &str,
    ) -> GatewayResult<RefundOutcome> {
        if intent_id.contains(OUTAGE_MARKER) {
            return Err(outage());
        }
        Ok(RefundOutcome {
            refund_id: format!("re_dev_{intent_id}"),
            amount,
            status: String::from("succeeded"),
        })
    }

    async fn create_subscription_session(
        &self,
        request: &SubscriptionSessionRequest<'_>,
    ) -> GatewayResult<CheckoutSession> {
        Ok(self.session(format!(
            "cs_dev_sub_{}_{}",
            request.tier,
            request.user_id.simple()
        )))
    }
}
