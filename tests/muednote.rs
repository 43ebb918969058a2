mod common;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::common::{
    Action, Flow, FlowContext, setup_server, setup_test_db, signin_action, signup_action,
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

#[tokio::test]
async fn sessions_and_fragments() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;

    Flow::new()
        .step(signup_action("composer", "pw-composer"))
        .step(
            Action::new("untitled_session", "POST", "/api/v1/muednote/sessions")
                .with_body(json!({ "type": "practice", "title": "   " }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("create_session", "POST", "/api/v1/muednote/sessions")
                .with_body(json!({
                    "type": "composition",
                    "title": "Nocturne sketches",
                    "project_name": "op. 1",
                }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("session")
                .assert_body(|body| {
                    let session = parse(body);
                    assert_eq!(session["session_type"], "composition");
                    assert_eq!(session["status"], "draft");
                }),
        )
        .step(
            Action::new("empty_fragment", "POST", "/api/v1/muednote/fragments")
                .with_body(json!({ "content": "" }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("loose_fragment", "POST", "/api/v1/muednote/fragments")
                .with_body(json!({ "content": "try a suspended fourth" }))
                .with_expect(StatusCode::CREATED)
                .assert_body(|body| {
                    let fragment = parse(body);
                    assert!(fragment["session_id"].is_null());
                    assert_eq!(fragment["importance"], "medium");
                    assert_eq!(fragment["status"], "pending");
                }),
        )
        .step(
            Action::new("session_fragment", "POST", "/api/v1/muednote/fragments")
                .with_dyn_body(|ctx| {
                    json!({
                        "session_id": id_of(ctx, "session"),
                        "content": "bridge modulates to E flat",
                        "importance": "high",
                    })
                })
                .with_expect(StatusCode::CREATED)
                .with_save_as("fragment"),
        )
        .step(
            Action::new("fragments_of_session", "GET", "/api/v1/muednote/fragments")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/muednote/fragments?session_id={}", id_of(ctx, "session"))
                })
                .assert_body(|body| {
                    let page = parse(body);
                    assert_eq!(page["total"], 1);
                    assert_eq!(page["items"][0]["importance"], "high");
                }),
        )
        .step(
            Action::new("all_fragments", "GET", "/api/v1/muednote/fragments")
                .assert_body(|body| assert_eq!(parse(body)["total"], 2)),
        )
        .step(
            Action::new("update_fragment", "PUT", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/muednote/fragments/{}", id_of(ctx, "fragment")))
                .with_body(json!({ "content": "bridge modulates to A flat", "status": "completed" }))
                .assert_body(|body| {
                    let fragment = parse(body);
                    assert_eq!(fragment["content"], "bridge modulates to A flat");
                    assert_eq!(fragment["status"], "completed");
                }),
        )
        .step(
            Action::new("update_session", "PUT", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/muednote/sessions/{}", id_of(ctx, "session")))
                .with_body(json!({
                    "type": "composition",
                    "title": "Nocturne in E flat",
                    "status": "completed",
                }))
                .assert_body(|body| {
                    let session = parse(body);
                    assert_eq!(session["title"], "Nocturne in E flat");
                    assert_eq!(session["status"], "completed");
                }),
        )
        // journals are private
        .step(signup_action("eavesdropper", "pw-other").with_clear_cookies(true))
        .step(
            Action::new("foreign_session", "GET", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/muednote/sessions/{}", id_of(ctx, "session")))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(
            Action::new("attach_to_foreign_session", "POST", "/api/v1/muednote/fragments")
                .with_dyn_body(|ctx| {
                    json!({ "session_id": id_of(ctx, "session"), "content": "mine now" })
                })
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(
            Action::new("foreign_fragment_delete", "DELETE", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/muednote/fragments/{}", id_of(ctx, "fragment")))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(
            Action::new("own_list_empty", "GET", "/api/v1/muednote/sessions")
                .assert_body(|body| assert_eq!(parse(body)["total"], 0)),
        )
        .step(signin_action("composer", "pw-composer").with_clear_cookies(true))
        .step(
            Action::new("delete_session", "DELETE", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/muednote/sessions/{}", id_of(ctx, "session"))),
        )
        .step(
            Action::new("session_gone", "GET", "dynamic")
                .with_dyn_path(|ctx| format!("/api/v1/muednote/sessions/{}", id_of(ctx, "session")))
                .with_expect(StatusCode::NOT_FOUND),
        )
        .run(&mut server, &db)
        .await;
}

#[tokio::test]
async fn projects_group_fragments() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let mut server = setup_server(&db).await;
    let project_path = |ctx: &FlowContext| format!("/api/v1/muednote/projects/{}", id_of(ctx, "project"));

    Flow::new()
        .step(signup_action("producer", "pw-producer"))
        .step(
            Action::new("nameless_project", "POST", "/api/v1/muednote/projects")
                .with_body(json!({ "description": "no name" }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("bad_color", "POST", "/api/v1/muednote/projects")
                .with_body(json!({ "name": "EP", "color": "blue" }))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("create_project", "POST", "/api/v1/muednote/projects")
                .with_body(json!({ "name": "  Summer EP  " }))
                .with_expect(StatusCode::CREATED)
                .with_save_as("project")
                .assert_body(|body| {
                    let project = parse(body);
                    assert_eq!(project["name"], "Summer EP");
                    assert_eq!(project["color"], "#6366F1");
                    assert_eq!(project["icon"], "folder");
                    assert_eq!(project["is_active"], true);
                }),
        )
        .step(
            Action::new("fragment_in_project", "POST", "/api/v1/muednote/fragments")
                .with_dyn_body(|ctx| json!({ "content": "bassline in D", "project_id": id_of(ctx, "project") }))
                .with_expect(StatusCode::CREATED)
                .assert_body(|body| assert!(parse(body)["project_id"].is_string())),
        )
        .step(
            Action::new("archived_fragment", "POST", "/api/v1/muednote/fragments")
                .with_dyn_body(|ctx| {
                    json!({
                        "content": "old hook",
                        "project_id": id_of(ctx, "project"),
                        "status": "archived",
                    })
                })
                .with_expect(StatusCode::CREATED),
        )
        .step(
            Action::new("list_projects", "GET", "/api/v1/muednote/projects").assert_body(|body| {
                let projects = parse(body);
                assert_eq!(projects.as_array().unwrap().len(), 1);
                assert_eq!(projects[0]["name"], "Summer EP");
                // archived fragments are not counted
                assert_eq!(projects[0]["fragment_count"], 1);
            }),
        )
        .step(
            Action::new("fragments_of_project", "GET", "/api/v1/muednote/fragments")
                .with_dyn_path(|ctx| {
                    format!("/api/v1/muednote/fragments?project_id={}", id_of(ctx, "project"))
                })
                .assert_body(|body| assert_eq!(parse(body)["total"], 2)),
        )
        .step(
            Action::new("empty_update", "PUT", "dynamic")
                .with_dyn_path(project_path)
                .with_body(json!({}))
                .with_expect(StatusCode::BAD_REQUEST),
        )
        .step(
            Action::new("recolor", "PUT", "dynamic")
                .with_dyn_path(project_path)
                .with_body(json!({ "color": "#10B981" }))
                .assert_body(|body| {
                    let project = parse(body);
                    assert_eq!(project["color"], "#10B981");
                    assert_eq!(project["name"], "Summer EP");
                }),
        )
        .step(signup_action("intruder", "pw-intruder").with_clear_cookies(true))
        .step(
            Action::new("foreign_update", "PUT", "dynamic")
                .with_dyn_path(project_path)
                .with_body(json!({ "name": "mine now" }))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(
            Action::new("fragment_in_foreign_project", "POST", "/api/v1/muednote/fragments")
                .with_dyn_body(|ctx| json!({ "content": "sneaky", "project_id": id_of(ctx, "project") }))
                .with_expect(StatusCode::FORBIDDEN),
        )
        .step(
            Action::new("no_projects", "GET", "/api/v1/muednote/projects")
                .assert_body(|body| assert!(parse(body).as_array().unwrap().is_empty())),
        )
        .step(signin_action("producer", "pw-producer").with_clear_cookies(true))
        .step(
            Action::new("delete_project", "DELETE", "dynamic").with_dyn_path(project_path),
        )
        .step(
            Action::new("deleted_projects_are_hidden", "GET", "/api/v1/muednote/projects")
                .assert_body(|body| assert!(parse(body).as_array().unwrap().is_empty())),
        )
        .step(
            Action::new("missing_project", "DELETE", "/api/v1/muednote/projects/00000000-0000-0000-0000-000000000000")
                .with_expect(StatusCode::NOT_FOUND),
        )
        .run(&mut server, &db)
        .await;
}
