mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, id_of, read_json, TestApp};
use serde_json::{json, Value};
use supportdesk::effects::NotificationKind;
use supportdesk::jobs::JOB_SUMMARIZE_TICKET;
use uuid::Uuid;

struct Fixture {
    org: Uuid,
    loc1: Uuid,
    loc2: Uuid,
    employee1: String,
    employee2: String,
    org_admin: String,
    technician_id: Uuid,
    technician: String,
    super_admin: String,
    read_only: String,
    outsider: String,
}

async fn seed(app: &TestApp) -> Result<Fixture> {
    let org = app.insert_organization("Acme Foods", "ACME").await?;
    let loc1 = app.insert_location(org, "Downtown").await?;
    let loc2 = app.insert_location(org, "Airport").await?;

    let e1 = app.insert_principal("e1@acme.test", None).await?;
    app.add_membership(e1, org, "employee").await?;
    app.assign_location(e1, loc1).await?;

    let e2 = app.insert_principal("e2@acme.test", None).await?;
    app.add_membership(e2, org, "employee").await?;
    app.assign_location(e2, loc2).await?;

    let admin = app.insert_principal("boss@acme.test", None).await?;
    app.add_membership(admin, org, "org_admin").await?;

    let technician_id = app.insert_principal("tech@portal.test", Some("technician")).await?;
    app.insert_principal("root@portal.test", Some("super_admin")).await?;
    app.insert_principal("auditor@portal.test", Some("read_only")).await?;

    let other_org = app.insert_organization("Globex", "GLBX").await?;
    let other_loc = app.insert_location(other_org, "HQ").await?;
    let outsider = app.insert_principal("x@globex.test", None).await?;
    app.add_membership(outsider, other_org, "org_admin").await?;
    app.assign_location(outsider, other_loc).await?;

    Ok(Fixture {
        org,
        loc1,
        loc2,
        employee1: app.login_token("e1@acme.test").await?,
        employee2: app.login_token("e2@acme.test").await?,
        org_admin: app.login_token("boss@acme.test").await?,
        technician_id,
        technician: app.login_token("tech@portal.test").await?,
        super_admin: app.login_token("root@portal.test").await?,
        read_only: app.login_token("auditor@portal.test").await?,
        outsider: app.login_token("x@globex.test").await?,
    })
}

#[tokio::test]
async fn created_ticket_roundtrips_with_single_created_event() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let created = app.create_ticket(&fx.employee1, fx.loc1, "Freezer alarm").await?;
    let ticket_id = id_of(&created)?;

    assert_eq!(created["status"], "open");
    assert_eq!(created["ticket_number"], "ACME-000001");
    assert_eq!(created["organization_id"], json!(fx.org));
    assert_eq!(created["priority"], "high");

    let response = app.get(&format!("/api/tickets/{ticket_id}"), Some(&fx.employee1)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Value = read_json(response).await?;
    assert_eq!(fetched, created);

    let response = app
        .get(&format!("/api/tickets/{ticket_id}/events"), Some(&fx.employee1))
        .await?;
    let events: Vec<Value> = read_json(response).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], "created");

    let second = app.create_ticket(&fx.employee1, fx.loc1, "Door sensor").await?;
    assert_eq!(second["ticket_number"], "ACME-000002");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn create_rejects_missing_fields_and_foreign_locations() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let response = app
        .post_json(
            "/api/tickets",
            &json!({ "location_id": fx.loc1, "description": "no title" }),
            Some(&fx.employee1),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/tickets",
            &json!({ "location_id": fx.loc2, "title": "x", "description": "y" }),
            Some(&fx.employee1),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            "/api/tickets",
            &json!({
                "organization_id": Uuid::new_v4(),
                "location_id": fx.loc1,
                "title": "x",
                "description": "y",
            }),
            Some(&fx.employee1),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn edit_requires_org_admin_and_appends_one_event() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let created = app.create_ticket(&fx.employee2, fx.loc2, "Coffee machine").await?;
    let ticket_id = id_of(&created)?;
    let path = format!("/api/tickets/{ticket_id}");

    let response = app
        .put_json(&path, &json!({ "title": "Hijacked" }), Some(&fx.employee1))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let before = app.load_events(ticket_id).await?.len();

    let response = app
        .put_json(
            &path,
            &json!({ "title": "Coffee machine leaking", "priority": "urgent" }),
            Some(&fx.org_admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = read_json(response).await?;
    assert_eq!(updated["title"], "Coffee machine leaking");
    assert_eq!(updated["priority"], "urgent");

    let events = app.load_events(ticket_id).await?;
    assert_eq!(events.len(), before + 1);
    let last = events.last().unwrap();
    assert_eq!(last.event_type, "updated");
    assert!(last.metadata["changes"].get("title").is_some());
    assert!(last.metadata["changes"].get("priority").is_some());

    let response = app
        .put_json(
            &path,
            &json!({ "title": "Coffee machine leaking" }),
            Some(&fx.org_admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.load_events(ticket_id).await?.len(), before + 1);

    let response = app
        .put_json(&path, &json!({ "title": null }), Some(&fx.org_admin))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .put_json(
            &format!("/api/tickets/{}", Uuid::new_v4()),
            &json!({ "title": "Ghost" }),
            Some(&fx.org_admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn out_of_scope_callers_are_forbidden_from_mutations() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let created = app.create_ticket(&fx.employee1, fx.loc1, "Oven").await?;
    let ticket_id = id_of(&created)?;

    for token in [&fx.outsider, &fx.read_only] {
        let base = format!("/api/tickets/{ticket_id}");
        let checks = [
            app.put_json(&base, &json!({ "title": "x" }), Some(token)).await?,
            app.post_json(&format!("{base}/acknowledge"), &json!({}), Some(token)).await?,
            app.post_json(
                &format!("{base}/assign"),
                &json!({ "assignee_id": fx.technician_id }),
                Some(token),
            )
            .await?,
            app.post_json(
                &format!("{base}/status"),
                &json!({ "status": "in_progress" }),
                Some(token),
            )
            .await?,
            app.post_json(&format!("{base}/comments"), &json!({ "body": "hi" }), Some(token))
                .await?,
            app.delete(&base, Some(token)).await?,
        ];
        for response in checks {
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    // Nothing changed.
    let events = app.load_events(ticket_id).await?;
    assert_eq!(events.len(), 1);

    let response = app
        .get(&format!("/api/tickets/{ticket_id}"), Some(&fx.outsider))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get(&format!("/api/tickets/{ticket_id}"), Some(&fx.read_only))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn acknowledging_twice_keeps_first_timestamp() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let created = app.create_ticket(&fx.employee1, fx.loc1, "Dishwasher").await?;
    let ticket_id = id_of(&created)?;
    let path = format!("/api/tickets/{ticket_id}/acknowledge");

    let response = app.post_json(&path, &json!({}), Some(&fx.employee1)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.post_json(&path, &json!({}), Some(&fx.technician)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let first: Value = read_json(response).await?;
    let acknowledged_at = first["acknowledged_at"].clone();
    assert!(acknowledged_at.is_string());

    let response = app.post_json(&path, &json!({}), Some(&fx.technician)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stored = app.load_ticket(ticket_id).await?.unwrap();
    assert_eq!(
        json!(supportdesk::utils::time::to_iso(stored.acknowledged_at.unwrap())),
        acknowledged_at
    );

    let events = app.load_events(ticket_id).await?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, "updated");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn platform_admin_delete_removes_ticket_everywhere() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let created = app.create_ticket(&fx.employee1, fx.loc1, "Fryer").await?;
    let ticket_id = id_of(&created)?;
    let kept = app.create_ticket(&fx.employee1, fx.loc1, "Grill").await?;
    app.post_json(
        &format!("/api/tickets/{ticket_id}/comments"),
        &json!({ "body": "Still broken" }),
        Some(&fx.employee1),
    )
    .await?;

    let response = app
        .delete(&format!("/api/tickets/{ticket_id}"), Some(&fx.org_admin))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/tickets/{ticket_id}"), Some(&fx.super_admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .get(&format!("/api/tickets/{ticket_id}"), Some(&fx.super_admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/tickets", Some(&fx.super_admin)).await?;
    let listed: Vec<Value> = read_json(response).await?;
    let ids: Vec<Uuid> = listed.iter().map(id_of).collect::<Result<_>>()?;
    assert_eq!(ids, vec![id_of(&kept)?]);

    let ledger = app.load_events(ticket_id).await?;
    let kinds: Vec<&str> = ledger.iter().map(|event| event.event_type.as_str()).collect();
    assert_eq!(kinds, vec!["created", "comment_added"]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn lifecycle_sets_timestamps_notifies_and_queues_summary() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let created = app.create_ticket(&fx.employee1, fx.loc1, "Ice machine").await?;
    let ticket_id = id_of(&created)?;
    let base = format!("/api/tickets/{ticket_id}");

    let response = app
        .post_json(
            &format!("{base}/assign"),
            &json!({ "assignee_id": fx.technician_id }),
            Some(&fx.org_admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Submitters may only cancel.
    assert_eq!(
        app.set_status(&fx.employee1, ticket_id, "resolved").await?,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        app.set_status(&fx.technician, ticket_id, "in_progress").await?,
        StatusCode::OK
    );
    assert_eq!(
        app.set_status(&fx.technician, ticket_id, "in_progress").await?,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        app.set_status(&fx.technician, ticket_id, "resolved").await?,
        StatusCode::OK
    );
    assert_eq!(
        app.set_status(&fx.technician, ticket_id, "closed").await?,
        StatusCode::OK
    );
    assert_eq!(
        app.set_status(&fx.technician, ticket_id, "open").await?,
        StatusCode::BAD_REQUEST
    );

    let ticket = app.load_ticket(ticket_id).await?.unwrap();
    assert_eq!(ticket.status, "closed");
    assert!(ticket.first_response_at.is_some());
    assert!(ticket.resolved_at.is_some());
    assert!(ticket.closed_at.is_some());

    let events = app.load_events(ticket_id).await?;
    assert!(events.windows(2).all(|pair| pair[0].created_at < pair[1].created_at));

    assert_eq!(app.jobs_by_type(JOB_SUMMARIZE_TICKET).await?.len(), 1);
    app.run_jobs().await?;

    let sent = app.notifier().sent().await;
    assert!(sent
        .iter()
        .any(|n| n.kind == NotificationKind::Assigned && n.recipient_id == fx.technician_id));
    assert!(sent
        .iter()
        .any(|n| n.kind == NotificationKind::StatusChanged && n.recipient_id == ticket.submitted_by));

    let ticket = app.load_ticket(ticket_id).await?.unwrap();
    assert_eq!(
        ticket.closed_summary.as_deref(),
        Some("Summary of ACME-000001: Ice machine")
    );

    let response = app
        .post_json(&format!("{base}/comments"), &json!({ "body": "late" }), Some(&fx.employee1))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn internal_comments_are_hidden_from_employees() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    let created = app.create_ticket(&fx.employee1, fx.loc1, "Walk-in cooler").await?;
    let ticket_id = id_of(&created)?;
    let comments = format!("/api/tickets/{ticket_id}/comments");

    let response = app
        .post_json(&comments, &json!({ "body": "psst", "is_internal": true }), Some(&fx.employee1))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &comments,
            &json!({ "body": "Vendor is slow, escalate", "is_internal": true }),
            Some(&fx.org_admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(&comments, &json!({ "body": "Technician on the way" }), Some(&fx.org_admin))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let employee_view: Vec<Value> = read_json(app.get(&comments, Some(&fx.employee1)).await?).await?;
    assert_eq!(employee_view.len(), 1);
    assert_eq!(employee_view[0]["body"], "Technician on the way");

    let admin_view: Vec<Value> = read_json(app.get(&comments, Some(&fx.org_admin)).await?).await?;
    assert_eq!(admin_view.len(), 2);

    let events_path = format!("/api/tickets/{ticket_id}/events");
    let employee_events: Vec<Value> =
        read_json(app.get(&events_path, Some(&fx.employee1)).await?).await?;
    assert_eq!(employee_events.len(), 2);
    let admin_events: Vec<Value> = read_json(app.get(&events_path, Some(&fx.org_admin)).await?).await?;
    assert_eq!(admin_events.len(), 3);
    assert!(admin_events.iter().all(|event| event["comment"] != "Vendor is slow, escalate"));

    let ticket = app.load_ticket(ticket_id).await?.unwrap();
    assert!(ticket.first_response_at.is_some());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn listings_follow_scope() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;

    app.create_ticket(&fx.employee1, fx.loc1, "One").await?;
    app.create_ticket(&fx.employee2, fx.loc2, "Two").await?;

    let mine: Vec<Value> = read_json(app.get("/api/tickets", Some(&fx.employee1)).await?).await?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["title"], "One");

    let all: Vec<Value> = read_json(app.get("/api/tickets", Some(&fx.org_admin)).await?).await?;
    assert_eq!(all.len(), 2);

    let none: Vec<Value> = read_json(app.get("/api/tickets", Some(&fx.outsider)).await?).await?;
    assert!(none.is_empty());

    let open: Vec<Value> = read_json(
        app.get(
            &format!("/api/tickets?status=open&location_id={}", fx.loc2),
            Some(&fx.technician),
        )
        .await?,
    )
    .await?;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["title"], "Two");

    let response = app.get("/api/tickets?status=bogus", Some(&fx.technician)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
