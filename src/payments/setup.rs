//! Saving a payment method for later charges, and subscription checkout.

use uuid::Uuid;

use crate::booking::{BookingError, PaymentStatus, ReservationStatus, SubscriptionTier};
use crate::model::entity::{Payment, Reservation, UserEntity};
use crate::model::{DatabaseError, ModelManager};

use super::error::{GatewayError, PaymentError, PaymentResult};
use super::gateway::{
    CheckoutSession, CustomerInfo, PaymentGateway, SetupSessionRequest, SubscriptionSessionRequest,
};

async fn customer_for(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    user: &UserEntity,
) -> PaymentResult<String> {
    let info = CustomerInfo {
        user_id: user.id(),
        username: user.username(),
        email: user.email(),
    };
    let created = gateway
        .ensure_customer(user.stripe_customer_id(), &info)
        .await?;
    Ok(UserEntity::attach_stripe_customer(mm, user.id(), &created).await?)
}

/// Opens a setup-mode checkout for the student of `reservation`.
#[tracing::instrument(skip_all, fields(reservation_id = %reservation.id()))]
pub async fn start_setup(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    currency: &str,
    reservation: &Reservation,
    student: &UserEntity,
) -> PaymentResult<CheckoutSession> {
    let status = reservation.status();
    if !matches!(
        status,
        ReservationStatus::PendingApproval | ReservationStatus::Approved
    ) {
        return Err(BookingError::NotPayable(status).into());
    }

    if let Some(existing) = Payment::find_by_reservation(mm, reservation.id()).await? {
        if !matches!(existing.status(), PaymentStatus::Pending | PaymentStatus::Failed) {
            return Err(BookingError::SetupAlreadyCompleted.into());
        }
    }

    let customer_id = customer_for(mm, gateway, student).await?;
    let session = gateway
        .create_setup_session(&SetupSessionRequest {
            customer_id: &customer_id,
            reservation_id: reservation.id(),
            student_id: student.id(),
            currency,
        })
        .await?;

    Payment::upsert_pending(
        mm,
        reservation.id(),
        reservation.total_amount(),
        currency,
        &customer_id,
        &session.session_id,
    )
    .await?;

    tracing::info!(session_id = %session.session_id, "payment setup started");
    Ok(session)
}

/// Stores the payment method a finished setup session produced.
/// `student` restricts the session to that user's reservation; webhooks pass `None`.
/// Repeating the call for a completed session returns the payment unchanged.
#[tracing::instrument(skip(mm, gateway))]
pub async fn complete_setup(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    session_id: &str,
    student: Option<Uuid>,
) -> PaymentResult<Payment> {
    let payment = Payment::find_by_session(mm, session_id)
        .await?
        .ok_or(DatabaseError::NotFound)?;

    if let Some(student) = student {
        let reservation = Reservation::find_by_id(mm, payment.reservation_id())
            .await?
            .ok_or(DatabaseError::NotFound)?;
        if reservation.student_id() != student {
            return Err(DatabaseError::Forbidden.into());
        }
    }

    if payment.status() != PaymentStatus::Pending {
        return Ok(payment);
    }

    let details = gateway.retrieve_setup_session(session_id).await?;
    if details
        .reservation_id
        .is_some_and(|id| id != payment.reservation_id())
    {
        return Err(DatabaseError::Forbidden.into());
    }

    let setup_intent = details
        .setup_intent_id
        .ok_or(PaymentError::SetupIncomplete("setup intent missing"))?;
    let payment_method = details
        .payment_method_id
        .ok_or(PaymentError::SetupIncomplete("payment method missing"))?;

    match Payment::complete_setup(mm, payment.id(), &setup_intent, &payment_method).await? {
        Some(updated) => {
            tracing::info!(payment_id = %updated.id(), "payment setup completed");
            Ok(updated)
        }
        None => Ok(Payment::find_by_session(mm, session_id)
            .await?
            .ok_or(DatabaseError::NotFound)?),
    }
}

/// Subscription-mode checkout for a paid tier.
pub async fn start_subscription_checkout(
    mm: &ModelManager,
    gateway: &dyn PaymentGateway,
    stripe: &crate::config::Stripe,
    user: &UserEntity,
    tier: SubscriptionTier,
) -> PaymentResult<CheckoutSession> {
    if !tier.is_paid() {
        return Err(BookingError::InvalidValue(format!("tier {tier} cannot be purchased")).into());
    }

    let dev_price;
    let price_id = match stripe.price_id(tier) {
        Some(id) => id,
        None if stripe.development_mode() => {
            dev_price = format!("price_dev_{tier}");
            &dev_price
        }
        None => return Err(GatewayError::NotConfigured("stripe price id").into()),
    };

    let customer_id = customer_for(mm, gateway, user).await?;
    let session = gateway
        .create_subscription_session(&SubscriptionSessionRequest {
            customer_id: &customer_id,
            user_id: user.id(),
            tier,
            price_id,
        })
        .await?;
    Ok(session)
}
