mod common;
use chrono::{DateTime, Duration, DurationRound, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::common::{
    Action, Flow, FlowContext, setup_server, setup_test_db, signin_action, signup_action,
    signup_mentor_action,
};

fn lesson_start(days: i64) -> DateTime<Utc> {
    let start = Utc::now() + Duration::days(days);
    start.duration_trunc(Duration::hours(1)).unwrap_or(start)
}

fn id_of(ctx: &FlowContext, key: &str) -> String {
    ctx.get(key)["id"]
        .as_str()
        .expect("saved body without id")
        .to_string()
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).expect("Invalid JSON format")
}

#[tokio::test]
async fn slot_rules() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let start = lesson_start(3);

    Flow::new()
        .step(signup_mentor_action("mentor_slots", "pw-mentor"))
        .step(
            Action::new("create_slot", "POST", "/api/v1/slots")
                .with_body(json!({
                    "start_time": start,
                    "end_time": start + Duration::hours(1),
                    "price": 6000,
                    "max_capacity": 2,
                    "tags": ["piano"],
                }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("slot")
                .assert_body(|body| {
                    let slot = parse(body);
                    assert_eq!(slot["status"], "available");
                    assert_eq!(slot["current_capacity"], 0);
                }),
        )
        // half-open ranges: overlapping is refused, touching is fine
        .step(
            Action::new("overlapping_slot", "POST", "/api/v1/slots")
                .with_body(json!({
                    "start_time": start + Duration::minutes(30),
                    "end_time": start + Duration::minutes(90),
                    "price": 6000,
                }))
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("adjacent_slot", "POST", "/api/v1/slots")
                .with_body(json!({
                    "start_time": start + Duration::hours(1),
                    "end_time": start + Duration::hours(2),
                    "price": 6000,
                }))
                .with_expect(StatusCode::CREATED),
        )
        .step(
            Action::new("inverted_slot", "POST", "/api/v1/slots")
                .with_body(json!({
                    "start_time": start + Duration::hours(5),
                    "end_time": start + Duration::hours(4),
                    "price": 6000,
                }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("list_available", "GET", "/api/v1/slots")
                .with_param("available", "true")
                .with_param("limit", "10")
                .assert_body(|body| assert_eq!(parse(body)["total"], 2)),
        )
        .step(
            Action::new("update_price", "PUT", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/slots/{}", id_of(ctx, "slot")))
                .with_body(json!({
                    "start_time": start,
                    "end_time": start + Duration::hours(1),
                    "price": 7000,
                    "max_capacity": 2,
                }))
                .assert_body(|body| assert_eq!(parse(body)["price"], 7000)),
        )
        // students do not publish slots
        .step(signup_action("student_slots", "pw-student").with_clear_cookies(true))
        .step(
            Action::new("student_creates_slot", "POST", "/api/v1/slots")
                .with_body(json!({
                    "start_time": start + Duration::days(1),
                    "end_time": start + Duration::days(1) + Duration::hours(1),
                    "price": 1000,
                }))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(
            Action::new("student_cancels_slot", "POST", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/slots/{}/cancel", id_of(ctx, "slot")))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .run(&mut server, &db)
        .await;
}

#[tokio::test]
async fn recurring_series() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let first_day = (Utc::now() + Duration::days(7)).date_naive();
    let last_day = first_day + Duration::days(13);

    Flow::new()
        .step(signup_mentor_action("mentor_series", "pw-mentor"))
        .step(
            Action::new("create_series", "POST", "/api/v1/slots/recurring")
                .with_body(json!({
                    "start_time": "18:00",
                    "end_time": "19:00",
                    "days_of_week": [0, 1, 2, 3, 4, 5, 6],
                    "start_date": first_day,
                    "end_date": last_day,
                    "price": 4000,
                }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("series")
                .assert_body(|body| {
                    let series = parse(body);
                    assert_eq!(series["slots"].as_array().map(Vec::len), Some(14));
                }),
        )
        // any clash aborts the whole batch
        .step(
            Action::new("clashing_series", "POST", "/api/v1/slots/recurring")
                .with_body(json!({
                    "start_time": "18:30",
                    "end_time": "19:30",
                    "days_of_week": [1],
                    "start_date": first_day,
                    "end_date": last_day,
                    "price": 4000,
                }))
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("bad_time", "POST", "/api/v1/slots/recurring")
                .with_body(json!({
                    "start_time": "25:00",
                    "end_time": "26:00",
                    "days_of_week": [1],
                    "start_date": first_day,
                    "end_date": last_day,
                    "price": 4000,
                }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("cancel_series", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    let id = ctx.get("series")["recurring_id"].as_str().unwrap().to_string();
                    format!("/api/v1/slots/recurring/{id}/cancel")
                })
                .assert_body(|body| assert_eq!(parse(body)["cancelled"], 14)),
        )
        .run(&mut server, &db)
        .await;
}

#[tokio::test]
async fn reservation_workflow() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let start = lesson_start(3);

    Flow::new()
        .step(signup_mentor_action("mentor_flow", "pw-mentor"))
        .step(
            Action::new("create_slot", "POST", "/api/v1/slots")
                .with_body(json!({
                    "start_time": start,
                    "end_time": start + Duration::hours(1),
                    "price": 6000,
                    "max_capacity": 1,
                }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("slot"),
        )
        // mentors cannot book themselves
        .step(
            Action::new("self_booking", "POST", "/api/v1/reservations")
                .with_dyn_body(|ctx| json!({ "slot_id": id_of(ctx, "slot") }))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(signup_action("student_flow", "pw-student").with_clear_cookies(true))
        .step(
            Action::new("outside_slot", "POST", "/api/v1/reservations")
                .with_dyn_body(move |ctx| {
                    json!({
                        "slot_id": id_of(ctx, "slot"),
                        "booked_start_time": start - Duration::minutes(30),
                        "booked_end_time": start + Duration::minutes(30),
                    })
                })
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("book_half", "POST", "/api/v1/reservations")
                .with_dyn_body(move |ctx| {
                    json!({
                        "slot_id": id_of(ctx, "slot"),
                        "booked_start_time": start,
                        "booked_end_time": start + Duration::minutes(30),
                        "notes": "scales please",
                    })
                })
                .with_expect(StatusCode::CREATED)
                .with_save_as("reservation")
                .assert_body(|body| {
                    let reservation = parse(body);
                    assert_eq!(reservation["status"], "PENDING_APPROVAL");
                    assert_eq!(reservation["total_amount"], 3000);
                }),
        )
        // slot is full now
        .step(
            Action::new("book_full_slot", "POST", "/api/v1/reservations")
                .with_dyn_body(|ctx| json!({ "slot_id": id_of(ctx, "slot") }))
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("own_list", "GET", "/api/v1/reservations")
                .with_param("status", "PENDING_APPROVAL")
                .assert_body(|body| assert_eq!(parse(body)["total"], 1)),
        )
        .step(
            Action::new("policy", "GET", "dynamic")
                .with_dyn_path(|ctx| {
                    format!(
                        "/api/v1/reservations/{}/cancellation-policy",
                        id_of(ctx, "reservation")
                    )
                })
                .assert_body(|body| {
                    let policy = parse(body);
                    assert_eq!(policy["actor"], "student");
                    assert_eq!(policy["can_cancel"], true);
                    assert_eq!(policy["cancellation_fee"], 0);
                }),
        )
        .step(
            Action::new("student_approves", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/approve", id_of(ctx, "reservation"))
                })
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(signin_action("mentor_flow", "pw-mentor").with_clear_cookies(true))
        .step(
            Action::new("approve", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/approve", id_of(ctx, "reservation"))
                })
                .assert_body(|body| {
                    let approved = parse(body);
                    assert_eq!(approved["reservation"]["status"], "APPROVED");
                    assert_eq!(approved["payment"]["kind"], "awaiting_setup");
                }),
        )
        .step(
            Action::new("approve_twice", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/approve", id_of(ctx, "reservation"))
                })
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("complete_unconfirmed", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/complete", id_of(ctx, "reservation"))
                })
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("mentor_uses_student_reason", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/cancel", id_of(ctx, "reservation"))
                })
                .with_body(json!({ "reason": "STUDENT_REQUEST" }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("mentor_cancels", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/cancel", id_of(ctx, "reservation"))
                })
                .with_body(json!({ "reason": "MENTOR_REQUEST", "notes": "sick" }))
                .assert_body(|body| {
                    let canceled = parse(body);
                    assert_eq!(canceled["reservation"]["status"], "CANCELED");
                    assert_eq!(canceled["reservation"]["cancel_reason"], "MENTOR_REQUEST");
                    assert_eq!(canceled["cancellation_fee"], 0);
                    assert!(canceled["refund"].is_null());
                }),
        )
        // the seat is free again
        .step(
            Action::new("slot_released", "GET", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/slots/{}", id_of(ctx, "slot")))
                .assert_body(|body| {
                    let slot = parse(body);
                    assert_eq!(slot["current_capacity"], 0);
                    assert_eq!(slot["status"], "available");
                }),
        )
        // canceled reservations still count as history, so the slot cannot be deleted
        .step(
            Action::new("delete_slot", "DELETE", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/slots/{}", id_of(ctx, "slot")))
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("cancel_slot", "POST", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/slots/{}/cancel", id_of(ctx, "slot")))
                .assert_body(|body| assert_eq!(parse(body)["status"], "cancelled")),
        )
        .run(&mut server, &db)
        .await;
}

#[tokio::test]
async fn reject_and_quota() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let start = lesson_start(5);

    let slot_body = move |hours: i64| {
        json!({
            "start_time": start + Duration::hours(hours),
            "end_time": start + Duration::hours(hours + 1),
            "price": 5000,
        })
    };

    Flow::new()
        .step(signup_mentor_action("mentor_quota", "pw-mentor"))
        .step(
            Action::new("slot_a", "POST", "/api/v1/slots")
                .with_body(slot_body(0))
                .with_expect(StatusCode::CREATED)
                .with_save_as("slot_a"),
        )
        .step(
            Action::new("slot_b", "POST", "/api/v1/slots")
                .with_body(slot_body(2))
                .with_expect(StatusCode::CREATED)
                .with_save_as("slot_b"),
        )
        .step(signup_action("student_quota", "pw-student").with_clear_cookies(true))
        .step(
            Action::new("limits_before", "GET", "/api/v1/subscriptions/me").assert_body(|body| {
                let me = parse(body);
                assert!(me["subscription"].is_null());
                assert_eq!(me["limits"]["tier"], "freemium");
                assert_eq!(me["limits"]["reservations_limit"], 1);
                assert_eq!(me["limits"]["can_create_reservation"], true);
            }),
        )
        .step(
            Action::new("book_a", "POST", "/api/v1/reservations")
                .with_dyn_body(|ctx| json!({ "slot_id": id_of(ctx, "slot_a") }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("reservation"),
        )
        // freemium allows a single reservation
        .step(
            Action::new("book_b", "POST", "/api/v1/reservations")
                .with_dyn_body(|ctx| json!({ "slot_id": id_of(ctx, "slot_b") }))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(
            Action::new("limits_after", "GET", "/api/v1/subscriptions/me").assert_body(|body| {
                let me = parse(body);
                assert_eq!(me["limits"]["reservations_used"], 1);
                assert_eq!(me["limits"]["reservations_remaining"], 0);
            }),
        )
        .step(
            Action::new("checkout_freemium", "POST", "/api/v1/subscriptions/checkout")
                .with_body(json!({ "tier": "freemium" }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("checkout_unknown", "POST", "/api/v1/subscriptions/checkout")
                .with_body(json!({ "tier": "platinum" }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("checkout_basic", "POST", "/api/v1/subscriptions/checkout")
                .with_body(json!({ "tier": "basic" }))
                .assert_body(|body| assert!(parse(body)["url"].is_string())),
        )
        .step(signin_action("mentor_quota", "pw-mentor").with_clear_cookies(true))
        .step(
            Action::new("reject", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/reject", id_of(ctx, "reservation"))
                })
                .with_body(json!({ "reason": "fully booked that week" }))
                .assert_body(|body| {
                    let rejected = parse(body);
                    assert_eq!(rejected["status"], "REJECTED");
                    assert_eq!(rejected["rejected_reason"], "fully booked that week");
                }),
        )
        .step(
            Action::new("cancel_rejected", "POST", "dynamic")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/reservations/{}/cancel", id_of(ctx, "reservation"))
                })
                .with_body(json!({ "reason": "MENTOR_REQUEST" }))
                .with_expect(StatusCode::CONFLICT),
        )
        .step(
            Action::new("slot_a_free", "GET", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/slots/{}", id_of(ctx, "slot_a")))
                .assert_body(|body| assert_eq!(parse(body)["current_capacity"], 0)),
        )
        .run(&mut server, &db)
        .await;
}
