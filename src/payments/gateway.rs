use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::booking::{PaymentStatus, SubscriptionTier};

use super::error::GatewayResult;

/// Who a new provider customer is created for.
#[derive(Debug, Clone)]
pub struct CustomerInfo<'a> {
    pub user_id: Uuid,
    pub username: &'a str,
    pub email: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct SetupSessionRequest<'a> {
    pub customer_id: &'a str,
    pub reservation_id: Uuid,
    pub student_id: Uuid,
    pub currency: &'a str,
}

#[derive(Debug, Clone)]
pub struct SubscriptionSessionRequest<'a> {
    pub customer_id: &'a str,
    pub user_id: Uuid,
    pub tier: SubscriptionTier,
    pub price_id: &'a str,
}

/// A hosted checkout page.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: Option<String>,
}

/// What a completed setup-mode session produced.
#[derive(Debug, Clone, Default)]
pub struct SetupSessionDetails {
    pub session_id: String,
    pub customer_id: Option<String>,
    pub setup_intent_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub reservation_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ChargeRequest<'a> {
    pub payment_id: Uuid,
    pub reservation_id: Uuid,
    pub amount: i64,
    pub currency: &'a str,
    pub customer_id: &'a str,
    pub payment_method_id: &'a str,
    pub idempotency_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentStatus {
    Succeeded,
    Processing,
    Failed(String),
}

impl IntentStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "succeeded" => Self::Succeeded,
            "processing" | "requires_capture" => Self::Processing,
            other => Self::Failed(format!("payment intent status {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub intent_id: String,
    pub status: IntentStatus,
}

impl ChargeOutcome {
    /// Payment row status for a charge that went through.
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        match self.status {
            IntentStatus::Succeeded => Some(PaymentStatus::Succeeded),
            IntentStatus::Processing => Some(PaymentStatus::Processing),
            IntentStatus::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub amount: i64,
    pub status: String,
}

/// The payment provider as seen by the rest of the application.
#[async_trait]
pub trait PaymentGateway: std::fmt::Debug + Send + Sync {
    /// Returns `existing` unchanged, or creates a customer when there is none.
    async fn ensure_customer(
        &self,
        existing: Option<&str>,
        customer: &CustomerInfo<'_>,
    ) -> GatewayResult<String>;

    async fn create_setup_session(
        &self,
        request: &SetupSessionRequest<'_>,
    ) -> GatewayResult<CheckoutSession>;

    async fn retrieve_setup_session(&self, session_id: &str) -> GatewayResult<SetupSessionDetails>;

    /// Creates and confirms an off-session payment intent.
    async fn charge(&self, request: &ChargeRequest<'_>) -> GatewayResult<ChargeOutcome>;

    async fn refund(
        &self,
        intent_id: &str,
        amount: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> GatewayResult<RefundOutcome>;

    async fn create_subscription_session(
        &self,
        request: &SubscriptionSessionRequest<'_>,
    ) -> GatewayResult<CheckoutSession>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn provider_status_mapping() {
        assert_eq!(IntentStatus::from_provider("succeeded"), IntentStatus::Succeeded);
        assert_eq!(IntentStatus::from_provider("processing"), IntentStatus::Processing);
        assert!(matches!(
            IntentStatus::from_provider("requires_payment_method"),
            IntentStatus::Failed(_)
        ));

        let outcome = ChargeOutcome {
            intent_id: "pi_1".into(),
            status: IntentStatus::Processing,
        };
        assert_eq!(outcome.payment_status(), Some(PaymentStatus::Processing));
    }
}
