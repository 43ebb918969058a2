use serde::Serialize;
use uuid::Uuid;

use crate::booking::{BookingError, CancelReason, PaymentStatus, ReservationStatus};
use crate::model::entity::{Payment, Reservation};
use crate::model::{DatabaseError, ModelManager};

use super::error::PaymentResult;
use super::gateway::{PaymentGateway, RefundOutcome};

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RefundReport {
    pub payment: Payment,
    pub refund: RefundOutcome,
}

/// How much of `refundable` a request for `requested` actually refunds.
pub fn refund_amount(requested: Option<i64>, refundable: i64) -> i64 {
    requested
        .map(|amount| amount.clamp(0, refundable))
        .unwrap_or(refundable)
}

/// Refunds a charged lesson and cancels its reservation when still possible.
/// The provider call runs between two short transactions, the payment stays reserved in between.
#[tracing::instrument(skip(mm, gateway))]
pub async fn refund_reservation(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    reservation_id: Uuid,
    requested: Option<i64>,
    reason: &str,
    admin_id: Uuid,
) -> PaymentResult<RefundReport> {
    let mut tx = mm.begin().await?;
    let payment = Payment::lock_by_reservation(&mut tx, reservation_id)
        .await?
        .ok_or(DatabaseError::NotFound)?;

    let intent_id = match payment.stripe_payment_intent_id() {
        Some(id) if payment.status() == PaymentStatus::Succeeded && payment.refunded_at().is_none() => {
            id.to_string()
        }
        _ => return Err(BookingError::NothingToRefund.into()),
    };

    let amount = refund_amount(requested, payment.refundable());
    if amount <= 0 {
        return Err(BookingError::NothingToRefund.into());
    }
    Payment::start_refund(&mut tx, payment.id()).await?;
    tx.commit().await?;

    let key = format!("mued-refund-{}", payment.id());
    let refund = match gateway.refund(&intent_id, amount, reason, &key).await {
        Ok(refund) => refund,
        Err(e) => {
            Payment::abort_refund(mm, payment.id()).await?;
            return Err(e.into());
        }
    };

    let mut tx = mm.begin().await?;
    let status = Reservation::status_in(&mut tx, reservation_id).await?;
    if status.can_transition_to(ReservationStatus::Canceled) {
        let note = format!("refunded {amount}: {reason}");
        Reservation::cancel_in(
            &mut tx,
            reservation_id,
            admin_id,
            CancelReason::AdminRequest,
            Some(&note),
        )
        .await?;
    }
    let payment = Payment::record_refund(&mut tx, payment.id(), amount, reason).await?;
    tx.commit().await?;

    tracing::info!(refund_id = %refund.refund_id, amount, "payment refunded");
    Ok(RefundReport { payment, refund })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn requested_amount_is_clamped() {
        assert_eq!(refund_amount(None, 5000), 5000);
        assert_eq!(refund_amount(Some(2000), 5000), 2000);
        assert_eq!(refund_amount(Some(9000), 5000), 5000);
        assert_eq!(refund_amount(Some(-1), 5000), 0);
        assert_eq!(refund_amount(None, 0), 0);
    }
}
