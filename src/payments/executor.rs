//! Deferred lesson charges: scan, claim, charge, record.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::booking::{PaymentStatus, timing};
use crate::error::log_error;
use crate::model::entity::{Payment, Reservation};
use crate::model::{DatabaseResult, ModelManager};

use super::error::GatewayError;
use super::gateway::{ChargeRequest, IntentStatus, PaymentGateway};
use super::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    window: Duration,
    lookback: Duration,
    retry: RetryPolicy,
    max_charge_runs: i32,
    immediate_on_approval: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &crate::config::Payments) -> Self {
        Self {
            window: config.charge_window(),
            lookback: config.lookback(),
            retry: RetryPolicy::from_config(config),
            max_charge_runs: config.max_charge_runs().max(1),
            immediate_on_approval: config.immediate_on_approval(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    /// Charged and the reservation confirmed.
    Charged,
    /// Accepted by the provider, final status follows by webhook.
    Pending,
    /// Another run claimed the payment first.
    Skipped,
    /// Transient failure, the next run tries again.
    Retrying,
    Failed,
    /// Money was captured but the reservation was no longer approved.
    RefundRequired,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ChargeResult {
    pub reservation_id: Uuid,
    pub payment_id: Uuid,
    pub state: ChargeState,
    pub amount: i64,
    pub payment_intent_id: Option<String>,
    pub error: Option<String>,
}

impl ChargeResult {
    fn new(payment: &Payment, state: ChargeState) -> Self {
        Self {
            reservation_id: payment.reservation_id(),
            payment_id: payment.id(),
            state,
            amount: payment.amount(),
            payment_intent_id: None,
            error: None,
        }
    }

    fn with_intent(mut self, intent_id: &str) -> Self {
        self.payment_intent_id = Some(intent_id.to_string());
        self
    }

    fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, ChargeState::Charged | ChargeState::Pending)
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ExecutionSummary {
    pub total_processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ExecutionReport {
    pub summary: ExecutionSummary,
    pub results: Vec<ChargeResult>,
}

impl ExecutionReport {
    fn new(results: Vec<ChargeResult>, executed_at: DateTime<Utc>) -> Self {
        let count = |state| results.iter().filter(|r| r.state == state).count();
        let summary = ExecutionSummary {
            total_processed: results.len(),
            success_count: results.iter().filter(|r| r.is_success()).count(),
            error_count: count(ChargeState::Failed)
                + count(ChargeState::Retrying)
                + count(ChargeState::RefundRequired),
            skipped_count: count(ChargeState::Skipped),
            executed_at,
        };
        Self { summary, results }
    }
}

/// What approving a reservation meant for its payment.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalCharge {
    /// The student has not saved a payment method yet.
    AwaitingSetup,
    Scheduled { execute_at: DateTime<Utc> },
    Executed { result: ChargeResult },
}

/// How a failed charge leaves the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Release,
    Fail,
}

fn disposition(error: &GatewayError, runs: i32, max_runs: i32) -> Disposition {
    if error.is_retryable() && runs < max_runs {
        Disposition::Release
    } else {
        Disposition::Fail
    }
}

/// Stable within one claimed run, so retries of that run never charge twice.
pub fn idempotency_key(payment_id: Uuid, run: i32) -> String {
    format!("mued-charge-{payment_id}-{run}")
}

#[derive(Debug, Clone)]
pub struct PaymentExecutor {
    mm: ModelManager,
    gateway: Arc<dyn PaymentGateway>,
    settings: ExecutorSettings,
}

impl PaymentExecutor {
    pub fn new(mm: ModelManager, gateway: Arc<dyn PaymentGateway>, settings: ExecutorSettings) -> Self {
        Self {
            mm,
            gateway,
            settings,
        }
    }

    /// One pass over every payment due within the charge window.
    #[tracing::instrument(skip(self))]
    pub async fn execute_due(&self, now: DateTime<Utc>) -> DatabaseResult<ExecutionReport> {
        let (from, to) = timing::scan_window(now, self.settings.window, self.settings.lookback);
        let due = Payment::due_for_charge(&self.mm, from, to).await?;
        tracing::info!(candidates = due.len(), %from, %to, "executing due payments");

        let mut results = Vec::with_capacity(due.len());
        for candidate in due {
            let payment = candidate.payment;
            let result = match self.charge(&payment, now).await {
                Ok(result) => result,
                Err(e) => {
                    log_error(&e);
                    ChargeResult::new(&payment, ChargeState::Failed).with_error(e)
                }
            };
            results.push(result);
        }

        let report = ExecutionReport::new(results, now);
        tracing::info!(
            success = report.summary.success_count,
            errors = report.summary.error_count,
            skipped = report.summary.skipped_count,
            "payment execution finished"
        );
        Ok(report)
    }

    /// Charges right away when the lesson is inside the window, otherwise reports when it will be.
    pub async fn after_approval(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ApprovalCharge> {
        let payment = match Payment::find_by_reservation(&self.mm, reservation.id()).await? {
            Some(p) if p.status() == PaymentStatus::SetupCompleted => p,
            _ => return Ok(ApprovalCharge::AwaitingSetup),
        };

        let start = reservation.booked_start_time();
        if !self.settings.immediate_on_approval
            || !timing::should_execute_now(start, now, self.settings.window)
        {
            return Ok(ApprovalCharge::Scheduled {
                execute_at: timing::execution_time(start, self.settings.window),
            });
        }

        let result = self.charge(&payment, now).await?;
        Ok(ApprovalCharge::Executed { result })
    }

    /// Claims and charges one payment. A payment claimed elsewhere comes back as skipped.
    #[tracing::instrument(skip(self, payment), fields(payment_id = %payment.id()))]
    pub async fn charge(&self, payment: &Payment, now: DateTime<Utc>) -> DatabaseResult<ChargeResult> {
        let Some(claimed) = Payment::claim(&self.mm, payment.id(), now).await? else {
            tracing::debug!("payment already claimed");
            return Ok(ChargeResult::new(payment, ChargeState::Skipped));
        };

        let (Some(customer_id), Some(payment_method_id)) =
            (claimed.stripe_customer_id(), claimed.stripe_payment_method_id())
        else {
            let error = "payment method missing";
            Payment::mark_failed(&self.mm, claimed.id(), error, None).await?;
            return Ok(ChargeResult::new(&claimed, ChargeState::Failed).with_error(error));
        };

        let key = idempotency_key(claimed.id(), claimed.attempts());
        let request = ChargeRequest {
            payment_id: claimed.id(),
            reservation_id: claimed.reservation_id(),
            amount: claimed.amount(),
            currency: claimed.currency(),
            customer_id,
            payment_method_id,
            idempotency_key: &key,
        };

        let outcome = self
            .settings
            .retry
            .run(|_| self.gateway.charge(&request))
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return self.record_failure(&claimed, e).await,
        };

        let status = match (&outcome.status, outcome.payment_status()) {
            (_, Some(status)) => status,
            (IntentStatus::Failed(reason), None) => {
                Payment::mark_failed(&self.mm, claimed.id(), reason, Some(&outcome.intent_id)).await?;
                return Ok(ChargeResult::new(&claimed, ChargeState::Failed)
                    .with_intent(&outcome.intent_id)
                    .with_error(reason));
            }
            (_, None) => PaymentStatus::Processing,
        };

        // reservation row first, in the same order cancellation locks them
        let mut tx = self.mm.begin().await?;
        let state = if status != PaymentStatus::Succeeded {
            ChargeState::Pending
        } else if Reservation::confirm(&mut tx, claimed.reservation_id()).await? {
            ChargeState::Charged
        } else {
            let current = Reservation::status_in(&mut tx, claimed.reservation_id()).await?;
            tracing::error!(
                reservation_id = %claimed.reservation_id(),
                status = %current,
                "charge captured for a reservation that is no longer approved, refund required"
            );
            ChargeState::RefundRequired
        };
        Payment::record_charge(&mut tx, claimed.id(), &outcome.intent_id, status).await?;
        tx.commit().await?;

        tracing::info!(intent_id = %outcome.intent_id, amount = claimed.amount(), ?state, "payment charged");
        Ok(ChargeResult::new(&claimed, state).with_intent(&outcome.intent_id))
    }

    async fn record_failure(&self, claimed: &Payment, error: GatewayError) -> DatabaseResult<ChargeResult> {
        let message = error.to_string();
        let state = match disposition(&error, claimed.attempts(), self.settings.max_charge_runs) {
            Disposition::Release => {
                Payment::release_claim(&self.mm, claimed.id(), &message).await?;
                ChargeState::Retrying
            }
            Disposition::Fail => {
                Payment::mark_failed(&self.mm, claimed.id(), &message, None).await?;
                ChargeState::Failed
            }
        };

        tracing::warn!(attempts = claimed.attempts(), error = %message, ?state, "payment charge failed");
        Ok(ChargeResult::new(claimed, state).with_error(message))
    }
}
