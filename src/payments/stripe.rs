//! Stripe REST client speaking the form-encoded v1 API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::error::{GatewayError, GatewayResult};
use super::gateway::{
    ChargeOutcome, ChargeRequest, CheckoutSession, CustomerInfo, IntentStatus, PaymentGateway,
    RefundOutcome, SetupSessionDetails, SetupSessionRequest, SubscriptionSessionRequest,
};

const USER_AGENT: &str = concat!("mued/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Form = Vec<(String, String)>;

#[derive(Debug, Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

/// A field Stripe returns either as an id or, when expanded, as the object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable<T> {
    Id(String),
    Object(T),
}

#[derive(Debug, Deserialize)]
struct SetupIntentObject {
    id: String,
    payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    url: Option<String>,
    customer: Option<String>,
    setup_intent: Option<Expandable<SetupIntentObject>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundObject {
    id: String,
    amount: i64,
    status: Option<String>,
}

fn field(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Appends Stripe's session id template to a return url.
fn with_session_template(url: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}session_id={{CHECKOUT_SESSION_ID}}")
}

async fn decode_error(response: Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = match response.json::<ErrorEnvelope>().await {
        Ok(envelope) => envelope.error,
        Err(e) => {
            return GatewayError::Api {
                status,
                code: None,
                message: e.to_string(),
            };
        }
    };

    let message = body.message.unwrap_or_else(|| String::from("unknown error"));
    if body.kind.as_deref() == Some("card_error") {
        let reason = body.decline_code.or(body.code).unwrap_or_default();
        return GatewayError::CardDeclined(format!("{message} ({reason})"));
    }

    GatewayError::Api {
        status,
        code: body.code,
        message,
    }
}

impl StripeGateway {
    pub fn new(config: &crate::config::Stripe) -> GatewayResult<Self> {
        if config.secret_key().is_empty() {
            return Err(GatewayError::NotConfigured("stripe.secret_key"));
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base().trim_end_matches('/').to_string(),
            secret_key: config.secret_key().to_string(),
            success_url: config.success_url().to_string(),
            cancel_url: config.cancel_url().to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<T> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(decode_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &Form,
        idempotency_key: Option<&str>,
    ) -> GatewayResult<T> {
        let mut request = self.request(Method::POST, path).form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        self.send(request).await
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[tracing::instrument(skip(self, customer), fields(user_id = %customer.user_id))]
    async fn ensure_customer(
        &self,
        existing: Option<&str>,
        customer: &CustomerInfo<'_>,
    ) -> GatewayResult<String> {
        if let Some(id) = existing {
            return Ok(id.to_string());
        }

        let mut form = vec![
            field("name", customer.username),
            field("metadata[user_id]", customer.user_id),
        ];
        if let Some(email) = customer.email {
            form.push(field("email", email));
        }

        let created: IdObject = self.post("/customers", &form, None).await?;
        tracing::info!(customer_id = %created.id, "stripe customer created");
        Ok(created.id)
    }

    async fn create_setup_session(
        &self,
        request: &SetupSessionRequest<'_>,
    ) -> GatewayResult<CheckoutSession> {
        let form = vec![
            field("mode", "setup"),
            field("customer", request.customer_id),
            field("currency", request.currency),
            field("payment_method_types[0]", "card"),
            field("success_url", with_session_template(&self.success_url)),
            field("cancel_url", &self.cancel_url),
            field("metadata[reservation_id]", request.reservation_id),
            field("metadata[student_id]", request.student_id),
        ];

        let session: SessionObject = self.post("/checkout/sessions", &form, None).await?;
        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }

    async fn retrieve_setup_session(&self, session_id: &str) -> GatewayResult<SetupSessionDetails> {
        let request = self
            .request(Method::GET, &format!("/checkout/sessions/{session_id}"))
            .query(&[("expand[]", "setup_intent")]);
        let session: SessionObject = self.send(request).await?;

        let (setup_intent_id, payment_method_id) = match session.setup_intent {
            Some(Expandable::Object(intent)) => (Some(intent.id), intent.payment_method),
            Some(Expandable::Id(id)) => (Some(id), None),
            None => (None, None),
        };

        Ok(SetupSessionDetails {
            session_id: session.id,
            customer_id: session.customer,
            setup_intent_id,
            payment_method_id,
            reservation_id: session
                .metadata
                .get("reservation_id")
                .and_then(|id| id.parse().ok()),
        })
    }

    #[tracing::instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn charge(&self, request: &ChargeRequest<'_>) -> GatewayResult<ChargeOutcome> {
        let form = vec![
            field("amount", request.amount),
            field("currency", request.currency),
            field("customer", request.customer_id),
            field("payment_method", request.payment_method_id),
            field("off_session", "true"),
            field("confirm", "true"),
            field("metadata[reservation_id]", request.reservation_id),
            field("metadata[payment_id]", request.payment_id),
        ];

        let intent: PaymentIntentObject = self
            .post("/payment_intents", &form, Some(request.idempotency_key))
            .await?;
        tracing::debug!(intent_id = %intent.id, status = %intent.status, "payment intent confirmed");

        Ok(ChargeOutcome {
            status: IntentStatus::from_provider(&intent.status),
            intent_id: intent.id,
        })
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> GatewayResult<RefundOutcome> {
        let form = vec![
            field("payment_intent", intent_id),
            field("amount", amount),
            field("reason", "requested_by_customer"),
            field("metadata[reason]", reason),
        ];

        let refund: RefundObject = self.post("/refunds", &form, Some(idempotency_key)).await?;
        Ok(RefundOutcome {
            refund_id: refund.id,
            amount: refund.amount,
            status: refund.status.unwrap_or_else(|| String::from("pending")),
        })
    }

    async fn create_subscription_session(
        &self,
        request: &SubscriptionSessionRequest<'_>,
    ) -> GatewayResult<CheckoutSession> {
        let form = vec![
            field("mode", "subscription"),
            field("customer", request.customer_id),
            field("line_items[0][price]", request.price_id),
            field("line_items[0][quantity]", 1),
            field("success_url", with_session_template(&self.success_url)),
            field("cancel_url", &self.cancel_url),
            field("metadata[user_id]", request.user_id),
            field("metadata[tier]", request.tier),
            field("subscription_data[metadata][user_id]", request.user_id),
            field("subscription_data[metadata][tier]", request.tier),
        ];

        let session: SessionObject = self.post("/checkout/sessions", &form, None).await?;
        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn session_template_is_appended() {
        assert_eq!(
            with_session_template("https://mued.jp/done"),
            "https://mued.jp/done?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(
            with_session_template("https://mued.jp/done?kind=setup"),
            "https://mued.jp/done?kind=setup&session_id={CHECKOUT_SESSION_ID}"
        );
    }

    #[test]
    fn expanded_setup_intent_is_read() {
        let raw = r#"{
            "id": "cs_1",
            "url": null,
            "customer": "cus_1",
            "setup_intent": {"id": "seti_1", "payment_method": "pm_1"},
            "metadata": {"reservation_id": "7f1c3f2e-2c55-4d4e-9d3a-5c1f0c8f1a11"}
        }"#;
        let session: SessionObject = serde_json::from_str(raw).unwrap();
        match session.setup_intent {
            Some(Expandable::Object(intent)) => {
                assert_eq!(intent.id, "seti_1");
                assert_eq!(intent.payment_method.as_deref(), Some("pm_1"));
            }
            other => panic!("unexpected setup intent: {other:?}"),
        }

        let raw = r#"{"id": "cs_2", "setup_intent": "seti_2"}"#;
        let session: SessionObject = serde_json::from_str(raw).unwrap();
        assert!(matches!(session.setup_intent, Some(Expandable::Id(id)) if id == "seti_2"));
    }

    #[test]
    fn missing_secret_key_is_refused() {
        let raw = r#"
            success_url = "http://localhost/success"
            cancel_url = "http://localhost/cancel"
        "#;
        let config: crate::config::Stripe = toml::from_str(raw).unwrap();
        assert!(matches!(
            StripeGateway::new(&config),
            Err(GatewayError::NotConfigured(_))
        ));
    }
}
