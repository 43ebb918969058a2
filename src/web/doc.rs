use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::web::middlewares::AUTH_TOKEN;
use crate::web::routes::{
    cron, mentors, notes, payments, reservations, slots, subscriptions, user, webhooks,
};

pub struct SecurityModifier;

impl Modify for SecurityModifier {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(schema) = openapi.components.as_mut() {
            schema.add_security_scheme(
                "cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    AUTH_TOKEN,
                    "Session JWT of the signed in user",
                ))),
            );
            schema.add_security_scheme(
                "cron",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "MUED API", description = "Lesson booking, payments and the MUEDnote journal"),
    paths(
        user::user_signup_handler,
        user::user_signin_handler,
        user::user_me_handler,
        user::user_list_handler,
        user::user_update_handler,
        user::user_role_handler,
        user::user_delete_handler,
        slots::slot_create_handler,
        slots::slot_recurring_handler,
        slots::slot_list_handler,
        slots::slot_get_handler,
        slots::slot_update_handler,
        slots::slot_cancel_handler,
        slots::slot_delete_handler,
        slots::slot_series_cancel_handler,
        reservations::reservation_create_handler,
        reservations::reservation_list_handler,
        reservations::reservation_get_handler,
        reservations::reservation_approve_handler,
        reservations::reservation_reject_handler,
        reservations::reservation_cancel_handler,
        reservations::reservation_complete_handler,
        reservations::reservation_policy_handler,
        reservations::reservation_setup_payment_handler,
        reservations::reservation_complete_setup_handler,
        payments::payment_get_handler,
        payments::payment_refund_handler,
        subscriptions::subscription_me_handler,
        subscriptions::subscription_checkout_handler,
        webhooks::stripe_webhook_handler,
        cron::execute_payments_handler,
        notes::session_create_handler,
        notes::session_list_handler,
        notes::session_get_handler,
        notes::session_update_handler,
        notes::session_delete_handler,
        notes::fragment_create_handler,
        notes::fragment_list_handler,
        notes::fragment_update_handler,
        notes::fragment_delete_handler,
        notes::project_create_handler,
        notes::project_list_handler,
        notes::project_update_handler,
        notes::project_delete_handler,
        mentors::mentor_search_handler,
    ),
    modifiers(&SecurityModifier),
)]
pub struct ApiDoc;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_api_group_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/account/signup",
            "/api/v1/slots/recurring",
            "/api/v1/reservations/{id}/approve",
            "/api/v1/payments/reservations/{id}/refund",
            "/api/v1/subscriptions/me",
            "/api/v1/webhooks/stripe",
            "/api/v1/cron/execute-payments",
            "/api/v1/muednote/fragments",
            "/api/v1/muednote/projects/{id}",
            "/api/v1/mentors/search",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
