mod common;
use chrono::{Duration, Utc};
use mued::model::entity::Payment;
use mued::payments::executor::ChargeState;
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::common::{
    Action, Flow, FlowContext, FlowDatabase, setup_app, setup_server, setup_test_db, signin_action,
    signup_action, signup_mentor_action,
};

fn id_of(ctx: &FlowContext, key: &str) -> String {
    ctx.get(key)["id"]
        .as_str()
        .expect("saved body without id")
        .to_string()
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).expect("Invalid JSON format")
}

fn reservation_uuid(ctx: &FlowContext) -> Uuid {
    id_of(ctx, "reservation").parse().unwrap()
}

fn payment_path(ctx: &FlowContext) -> String {
    format!("/api/v1/payments/reservations/{}", id_of(ctx, "reservation"))
}

/// Approved before the student saved a card, so the lesson waits for the next cron run.
fn approved_then_set_up() -> Flow {
    let start = Utc::now() + Duration::minutes(60);

    Flow::new()
        .step(signup_mentor_action("mentor_due", "pw-mentor"))
        .step(
            Action::new("create_slot", "POST", "/api/v1/slots")
                .with_body(json!({
                    "start_time": start,
                    "end_time": start + Duration::hours(1),
                    "price": 6000,
                }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("slot"),
        )
        .step(signup_action("student_due", "pw-student").with_clear_cookies(true))
        .step(
            Action::new("book", "POST", "/api/v1/reservations")
                .with_dyn_body(|ctx| json!({ "slot_id": id_of(ctx, "slot") }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("reservation"),
        )
        .step(signin_action("mentor_due", "pw-mentor").with_clear_cookies(true))
        .step(
            Action::new("approve", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/approve", id_of(ctx, "reservation"))
                })
                .assert_body(|body| {
                    let approved = parse(body);
                    assert_eq!(approved["payment"]["kind"], "awaiting_setup");
                    assert_eq!(approved["reservation"]["status"], "APPROVED");
                }),
        )
        .step(signin_action("student_due", "pw-student").with_clear_cookies(true))
        .step(
            Action::new("setup_payment", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/setup-payment", id_of(ctx, "reservation"))
                })
                .with_save_as("setup"),
        )
        .step(
            Action::new("complete_setup", "POST", "/api/v1/reservations/complete-setup")
                .with_dyn_body(|ctx| json!({ "session_id": ctx.get("setup")["session_id"] }))
                .assert_body(|body| assert_eq!(parse(body)["status"], "SETUP_COMPLETED")),
        )
}

fn cron_action(name: &'static str) -> Action {
    Action::new(name, "POST", "/api/v1/cron/execute-payments")
        .with_header("authorization", "Bearer local-cron-secret")
}

async fn set_payment_method(db: &FlowDatabase, reservation_id: Uuid, method: &str) {
    sqlx::query("UPDATE payments SET stripe_payment_method_id = $2 WHERE reservation_id = $1")
        .bind(reservation_id)
        .bind(method)
        .execute(db.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn due_charge_confirms_reservation() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let ctx = approved_then_set_up().run(&mut server, &db).await;

    Flow::new()
        .step(cron_action("cron").assert_body(|body| {
            let report = parse(body);
            assert_eq!(report["summary"]["total_processed"], 1);
            assert_eq!(report["summary"]["success_count"], 1);
            assert_eq!(report["summary"]["error_count"], 0);
            assert_eq!(report["results"][0]["state"], "charged");
            assert_eq!(report["results"][0]["amount"], 6000);
        }))
        .step(
            Action::new("payment_succeeded", "GET", "dynamic")
                .with_dyn_path(payment_path)
                .assert_body(|body| {
                    let payment = parse(body);
                    assert_eq!(payment["status"], "SUCCEEDED");
                    assert_eq!(payment["attempts"], 1);
                }),
        )
        .step(
            Action::new("reservation_confirmed", "GET", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/reservations/{}", id_of(ctx, "reservation")))
                .assert_body(|body| assert_eq!(parse(body)["status"], "CONFIRMED")),
        )
        .step(cron_action("cron_again").assert_body(|body| {
            assert_eq!(parse(body)["summary"]["total_processed"], 0);
        }))
        .resume(&mut server, &db, ctx)
        .await;
}

#[tokio::test]
async fn claimed_payment_is_skipped() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let (state, mut server) = setup_app(&db).await;
    let ctx = approved_then_set_up().run(&mut server, &db).await;

    let payment = Payment::find_by_reservation(state.pool(), reservation_uuid(&ctx))
        .await
        .unwrap()
        .unwrap();
    let now = Utc::now();
    let claimed = Payment::claim(state.pool(), payment.id(), now).await.unwrap();
    assert!(claimed.is_some());
    // a second claim on the same row loses
    assert!(Payment::claim(state.pool(), payment.id(), now).await.unwrap().is_none());

    let result = state.executor().charge(&payment, now).await.unwrap();
    assert_eq!(result.state, ChargeState::Skipped);
    assert!(result.payment_intent_id.is_none());

    Flow::new()
        .step(cron_action("cron_after_claim").assert_body(|body| {
            assert_eq!(parse(body)["summary"]["total_processed"], 0);
        }))
        .step(
            Action::new("payment_processing", "GET", "dynamic")
                .with_dyn_path(payment_path)
                .assert_body(|body| {
                    let payment = parse(body);
                    assert_eq!(payment["status"], "PROCESSING");
                    assert_eq!(payment["attempts"], 1);
                }),
        )
        .resume(&mut server, &db, ctx)
        .await;
}

#[tokio::test]
async fn transient_failures_retry_until_runs_are_used_up() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let ctx = approved_then_set_up().run(&mut server, &db).await;
    set_payment_method(&db, reservation_uuid(&ctx), "pm_dev_unavailable").await;

    let released = |name| {
        Action::new(name, "GET", "dynamic")
            .with_dyn_path(payment_path)
            .assert_body(|body| {
                let payment = parse(body);
                assert_eq!(payment["status"], "SETUP_COMPLETED");
                assert!(payment["last_error"].as_str().is_some());
            })
    };

    Flow::new()
        .step(cron_action("first_run").assert_body(|body| {
            let report = parse(body);
            assert_eq!(report["results"][0]["state"], "retrying");
            assert_eq!(report["summary"]["error_count"], 1);
        }))
        .step(released("released_after_first_run"))
        .step(cron_action("second_run").assert_body(|body| {
            assert_eq!(parse(body)["results"][0]["state"], "retrying");
        }))
        .step(released("released_after_second_run"))
        .step(cron_action("third_run").assert_body(|body| {
            assert_eq!(parse(body)["results"][0]["state"], "failed");
        }))
        .step(
            Action::new("payment_failed", "GET", "dynamic")
                .with_dyn_path(payment_path)
                .assert_body(|body| {
                    let payment = parse(body);
                    assert_eq!(payment["status"], "FAILED");
                    assert_eq!(payment["attempts"], 3);
                }),
        )
        .step(cron_action("nothing_left").assert_body(|body| {
            assert_eq!(parse(body)["summary"]["total_processed"], 0);
        }))
        .resume(&mut server, &db, ctx)
        .await;
}

#[tokio::test]
async fn declined_card_fails_at_once() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let ctx = approved_then_set_up().run(&mut server, &db).await;
    set_payment_method(&db, reservation_uuid(&ctx), "pm_dev_decline").await;

    Flow::new()
        .step(cron_action("cron").assert_body(|body| {
            let report = parse(body);
            assert_eq!(report["results"][0]["state"], "failed");
            assert!(report["results"][0]["error"].as_str().is_some());
            assert_eq!(report["summary"]["error_count"], 1);
        }))
        .step(
            Action::new("payment_failed", "GET", "dynamic")
                .with_dyn_path(payment_path)
                .assert_body(|body| {
                    let payment = parse(body);
                    assert_eq!(payment["status"], "FAILED");
                    assert_eq!(payment["attempts"], 1);
                }),
        )
        .step(
            Action::new("reservation_still_approved", "GET", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/reservations/{}", id_of(ctx, "reservation")))
                .assert_body(|body| assert_eq!(parse(body)["status"], "APPROVED")),
        )
        .resume(&mut server, &db, ctx)
        .await;
}

#[tokio::test]
async fn cancel_waits_for_running_charge() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let ctx = approved_then_set_up().run(&mut server, &db).await;

    // the executor claimed the payment and is talking to the provider
    sqlx::query(
        "UPDATE payments SET status = 'PROCESSING', charge_executed_at = now() WHERE reservation_id = $1",
    )
    .bind(reservation_uuid(&ctx))
    .execute(db.pool())
    .await
    .unwrap();

    Flow::new()
        .step(
            Action::new("cancel_during_charge", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/cancel", id_of(ctx, "reservation"))
                })
                .with_body(json!({ "reason": "EMERGENCY" }))
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("reservation_untouched", "GET", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/reservations/{}", id_of(ctx, "reservation")))
                .assert_body(|body| assert_eq!(parse(body)["status"], "APPROVED")),
        )
        .step(
            Action::new("payment_untouched", "GET", "dynamic")
                .with_dyn_path(payment_path)
                .assert_body(|body| assert_eq!(parse(body)["status"], "PROCESSING")),
        )
        .resume(&mut server, &db, ctx)
        .await;
}
