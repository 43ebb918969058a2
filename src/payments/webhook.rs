//! Stripe webhook verification and event handling.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::booking::{ReservationStatus, SubscriptionTier};
use crate::model::entity::{Payment, Reservation, Subscription, SubscriptionSync, WebhookEvent};
use crate::model::{DatabaseError, ModelManager};

use super::error::{PaymentError, PaymentResult};
use super::gateway::PaymentGateway;
use super::setup;

type HmacSha256 = Hmac<Sha256>;

/// Accepted distance between the signed timestamp and now.
pub const TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("signature header missing")]
    MissingHeader,
    #[error("timestamp missing from signature header")]
    MissingTimestamp,
    #[error("no v1 signature in header")]
    MissingSignature,
    #[error("timestamp outside the tolerance window")]
    OutsideTolerance,
    #[error("no signature matches the payload")]
    Mismatch,
}

fn mac_for(payload: &[u8], secret: &str, timestamp: i64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let digest = mac_for(payload, secret, timestamp).finalize().into_bytes();
    format!("t={timestamp},v1={}", hex::encode(digest))
}

/// Checks `header` against `payload`. Any `v1` entry may match.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    let skew = now.checked_sub(timestamp).map(i64::unsigned_abs);
    if skew.is_none_or(|skew| skew > TOLERANCE_SECS.unsigned_abs()) {
        return Err(SignatureError::OutsideTolerance);
    }

    let mac = mac_for(payload, secret, timestamp);
    let matched = signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    mode: String,
    customer: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PriceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    price: PriceRef,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    items: SubscriptionItems,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PaymentErrorObject {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    last_payment_error: Option<PaymentErrorObject>,
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

impl SubscriptionObject {
    /// Periods moved onto the items in newer API versions.
    fn to_sync(&self, stripe: &crate::config::Stripe) -> SubscriptionSync {
        let item = self.items.data.first();
        let tier = item
            .and_then(|i| stripe.tier_for_price(&i.price.id))
            .or_else(|| self.metadata.get("tier").and_then(|t| t.parse().ok()));

        SubscriptionSync {
            stripe_subscription_id: self.id.clone(),
            tier,
            status: self.status.clone(),
            current_period_start: timestamp(
                self.current_period_start
                    .or(item.and_then(|i| i.current_period_start)),
            ),
            current_period_end: timestamp(
                self.current_period_end
                    .or(item.and_then(|i| i.current_period_end)),
            ),
            cancel_at_period_end: self.cancel_at_period_end,
        }
    }
}

impl PaymentIntentObject {
    fn failure_message(&self) -> String {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
            .unwrap_or_else(|| String::from("payment failed"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
}

fn object<T: serde::de::DeserializeOwned>(event: &StripeEvent) -> PaymentResult<T> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|e| PaymentError::InvalidPayload(format!("{}: {e}", event.event_type)))
}

/// Verifies, records and dispatches one delivery.
#[tracing::instrument(skip_all)]
pub async fn handle(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    stripe: &crate::config::Stripe,
    payload: &[u8],
    signature: Option<&str>,
    now: i64,
) -> PaymentResult<WebhookOutcome> {
    let signature = signature.ok_or(SignatureError::MissingHeader)?;
    if stripe.webhook_secret().is_empty() {
        if !stripe.development_mode() {
            return Err(PaymentError::WebhookSecretMissing);
        }
        tracing::warn!("development mode: webhook signature not verified");
    } else {
        verify_signature(payload, signature, stripe.webhook_secret(), now)?;
    }

    let event: StripeEvent =
        serde_json::from_slice(payload).map_err(|e| PaymentError::InvalidPayload(e.to_string()))?;

    if !WebhookEvent::record(mm, &event.id, &event.event_type).await? {
        tracing::info!(event_id = %event.id, "duplicate webhook event");
        return Ok(WebhookOutcome::Duplicate);
    }

    match dispatch(mm, gateway, stripe, &event).await {
        Ok(outcome) => {
            tracing::info!(event_id = %event.id, event_type = %event.event_type, ?outcome, "webhook handled");
            Ok(outcome)
        }
        Err(e) => {
            WebhookEvent::forget(mm, &event.id).await?;
            Err(e)
        }
    }
}

async fn dispatch(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    stripe: &crate::config::Stripe,
    event: &StripeEvent,
) -> PaymentResult<WebhookOutcome> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSessionObject = object(event)?;
            checkout_completed(mm, gateway, session).await
        }
        "customer.subscription.updated" => {
            let sub: SubscriptionObject = object(event)?;
            match Subscription::sync(mm, &sub.to_sync(stripe)).await? {
                Some(_) => Ok(WebhookOutcome::Processed),
                None => {
                    tracing::warn!(subscription_id = %sub.id, "update for unknown subscription");
                    Ok(WebhookOutcome::Ignored)
                }
            }
        }
        "customer.subscription.deleted" => {
            let sub: SubscriptionObject = object(event)?;
            match Subscription::downgrade(mm, &sub.id).await? {
                Some(_) => Ok(WebhookOutcome::Processed),
                None => Ok(WebhookOutcome::Ignored),
            }
        }
        "payment_intent.succeeded" => {
            let intent: PaymentIntentObject = object(event)?;
            let mut tx = mm.begin().await?;
            let outcome = match Payment::succeed_by_intent(&mut tx, &intent.id).await? {
                Some(reservation_id) => {
                    if !Reservation::confirm(&mut tx, reservation_id).await? {
                        let current = Reservation::status_in(&mut tx, reservation_id).await?;
                        if current != ReservationStatus::Confirmed {
                            tracing::error!(
                                %reservation_id,
                                status = %current,
                                "payment succeeded for a reservation that is no longer approved, refund required"
                            );
                        }
                    }
                    WebhookOutcome::Processed
                }
                None => WebhookOutcome::Ignored,
            };
            tx.commit().await?;
            Ok(outcome)
        }
        "payment_intent.payment_failed" => {
            let intent: PaymentIntentObject = object(event)?;
            let updated = Payment::fail_by_intent(mm, &intent.id, &intent.failure_message()).await?;
            Ok(if updated {
                WebhookOutcome::Processed
            } else {
                WebhookOutcome::Ignored
            })
        }
        other => {
            tracing::debug!(event_type = other, "unhandled webhook event");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

async fn checkout_completed(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    session: CheckoutSessionObject,
) -> PaymentResult<WebhookOutcome> {
    match session.mode.as_str() {
        "setup" => match setup::complete_setup(mm, gateway, &session.id, None).await {
            Ok(_) => Ok(WebhookOutcome::Processed),
            Err(PaymentError::Database(DatabaseError::NotFound)) => {
                tracing::warn!(session_id = %session.id, "setup session without payment");
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => Err(e),
        },
        "subscription" => {
            let user_id = session
                .metadata
                .get("user_id")
                .and_then(|id| id.parse::<Uuid>().ok());
            let tier = session
                .metadata
                .get("tier")
                .and_then(|t| t.parse::<SubscriptionTier>().ok());

            let (Some(user_id), Some(tier)) = (user_id, tier) else {
                tracing::warn!(session_id = %session.id, "subscription checkout without user metadata");
                return Ok(WebhookOutcome::Ignored);
            };

            Subscription::activate(
                mm,
                user_id,
                tier,
                session.customer.as_deref(),
                session.subscription.as_deref(),
            )
            .await?;
            Ok(WebhookOutcome::Processed)
        }
        _ => Ok(WebhookOutcome::Ignored),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_735_689_600;

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(payload, SECRET, NOW);
        assert_eq!(verify_signature(payload, &header, SECRET, NOW + 10), Ok(()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = signature_header(br#"{"amount":100}"#, SECRET, NOW);
        assert_eq!(
            verify_signature(br#"{"amount":999}"#, &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(br#"{"amount":100}"#, &header, "whsec_other", NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_timestamps_are_rejected() {
        let payload = b"{}";
        let header = signature_header(payload, SECRET, NOW - TOLERANCE_SECS - 1);
        assert_eq!(
            verify_signature(payload, &header, SECRET, NOW),
            Err(SignatureError::OutsideTolerance)
        );

        let header = signature_header(payload, SECRET, NOW - TOLERANCE_SECS);
        assert_eq!(verify_signature(payload, &header, SECRET, NOW), Ok(()));
    }

    #[test]
    fn any_v1_entry_may_match() {
        let payload = b"{}";
        let valid = signature_header(payload, SECRET, NOW);
        let v1 = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={NOW},v1=deadbeef,v0=ignored,v1={v1}");
        assert_eq!(verify_signature(payload, &header, SECRET, NOW), Ok(()));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            verify_signature(b"{}", "v1=abc", SECRET, NOW),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_signature(b"{}", &format!("t={NOW}"), SECRET, NOW),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            verify_signature(b"{}", "garbage", SECRET, NOW),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_signature(b"{}", &format!("t={},v1=00", i64::MIN), SECRET, NOW),
            Err(SignatureError::OutsideTolerance)
        );
        assert_eq!(
            verify_signature(b"{}", &format!("t={},v1=00", i64::MAX), SECRET, -NOW),
            Err(SignatureError::OutsideTolerance)
        );
    }

    #[test]
    fn subscription_update_reads_item_price_and_period() {
        let stripe: crate::config::Stripe = toml::from_str(
            r#"
            success_url = "http://localhost/success"
            cancel_url = "http://localhost/cancel"
            premium_price_id = "price_premium"
            "#,
        )
        .unwrap();

        let sub: SubscriptionObject = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "status": "active",
            "cancel_at_period_end": true,
            "items": {"data": [{
                "price": {"id": "price_premium"},
                "current_period_start": NOW,
                "current_period_end": NOW + 2_592_000
            }]}
        }))
        .unwrap();

        let sync = sub.to_sync(&stripe);
        assert_eq!(sync.tier, Some(SubscriptionTier::Premium));
        assert_eq!(sync.current_period_start, DateTime::from_timestamp(NOW, 0));
        assert!(sync.cancel_at_period_end);
    }

    #[test]
    fn failure_message_falls_back_to_code() {
        let intent: PaymentIntentObject = serde_json::from_value(serde_json::json!({
            "id": "pi_1",
            "last_payment_error": {"code": "card_declined"}
        }))
        .unwrap();
        assert_eq!(intent.failure_message(), "card_declined");
    }
}
