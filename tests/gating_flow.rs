mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use common::{acquire_db_lock, body_to_vec, id_of, read_json, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

async fn submit_for_hardware(
    app: &TestApp,
    token: &str,
    location_id: Uuid,
    hardware_id: Uuid,
) -> Result<StatusCode> {
    let response = app
        .post_json(
            "/api/tickets",
            &json!({
                "location_id": location_id,
                "hardware_id": hardware_id,
                "title": "Fryer not heating",
                "description": "Oil stays cold after twenty minutes.",
            }),
            Some(token),
        )
        .await?;
    Ok(response.status())
}

#[tokio::test]
async fn tickets_for_gated_hardware_require_current_acknowledgments() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let org = app.insert_organization("Acme Foods", "ACME").await?;
    let loc = app.insert_location(org, "Downtown").await?;
    let fryer = app.insert_hardware(loc, "Fryer").await?;
    let mixer = app.insert_hardware(loc, "Mixer").await?;

    let employee = app.insert_principal("e1@acme.test", None).await?;
    app.add_membership(employee, org, "employee").await?;
    app.assign_location(employee, loc).await?;
    let admin = app.insert_principal("boss@acme.test", None).await?;
    app.add_membership(admin, org, "org_admin").await?;

    let employee_token = app.login_token("e1@acme.test").await?;
    let admin_token = app.login_token("boss@acme.test").await?;

    let response = app
        .post_json(
            &format!("/api/organizations/{org}/procedures"),
            &json!({
                "title": "Hot oil safety",
                "body": "Wear gloves. Switch the unit off before draining.",
                "hardware_ids": [fryer],
            }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let procedure: Value = read_json(response).await?;
    let procedure_id = id_of(&procedure)?;
    assert_eq!(procedure["version"], 1);

    // Ungated hardware goes straight through.
    assert_eq!(
        submit_for_hardware(&app, &employee_token, loc, mixer).await?,
        StatusCode::CREATED
    );
    assert_eq!(
        submit_for_hardware(&app, &employee_token, loc, fryer).await?,
        StatusCode::FORBIDDEN
    );

    let response = app
        .get(&format!("/api/hardware/{fryer}/procedures"), Some(&employee_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let presented: Value = read_json(response).await?;
    assert_eq!(presented["scroll_threshold_px"], 10);
    assert_eq!(presented["procedures"].as_array().map(Vec::len), Some(1));
    assert_eq!(presented["procedures"][0]["id"], json!(procedure_id));

    let acks = format!("/api/hardware/{fryer}/acknowledgments");
    let current = json!([{ "id": procedure_id, "version": 1 }]);

    let declined = json!({ "procedures": current, "scrolled_to_end": true, "confirmed": false });
    let response = app.post_json(&acks, &declined, Some(&employee_token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unread = json!({ "procedures": current, "scrolled_to_end": false, "confirmed": true });
    let response = app.post_json(&acks, &unread, Some(&employee_token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = json!({
        "procedures": [{ "id": procedure_id, "version": 7 }],
        "scrolled_to_end": true,
        "confirmed": true,
    });
    let response = app.post_json(&acks, &stale, Some(&employee_token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // None of the rejected attempts left anything behind.
    assert_eq!(
        submit_for_hardware(&app, &employee_token, loc, fryer).await?,
        StatusCode::FORBIDDEN
    );

    let accepted = json!({ "procedures": current, "scrolled_to_end": true, "confirmed": true });
    let response = app.post_json(&acks, &accepted, Some(&employee_token)).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let stored: Vec<Value> = read_json(response).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["procedure_version"], 1);

    assert_eq!(
        submit_for_hardware(&app, &employee_token, loc, fryer).await?,
        StatusCode::CREATED
    );

    let response = app
        .put_json(
            &format!("/api/procedures/{procedure_id}"),
            &json!({ "body": "Wear gloves and a face shield." }),
            Some(&employee_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .put_json(
            &format!("/api/procedures/{procedure_id}"),
            &json!({ "body": "Wear gloves and a face shield." }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let revised: Value = read_json(response).await?;
    assert_eq!(revised["version"], 2);

    assert_eq!(
        submit_for_hardware(&app, &employee_token, loc, fryer).await?,
        StatusCode::FORBIDDEN
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn procedure_hardware_must_belong_to_the_organization() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let org = app.insert_organization("Acme Foods", "ACME").await?;
    let loc = app.insert_location(org, "Downtown").await?;
    let oven = app.insert_hardware(loc, "Oven").await?;
    let other_org = app.insert_organization("Globex", "GLBX").await?;
    let other_loc = app.insert_location(other_org, "HQ").await?;
    let foreign = app.insert_hardware(other_loc, "Server rack").await?;

    let admin = app.insert_principal("boss@acme.test", None).await?;
    app.add_membership(admin, org, "org_admin").await?;
    let token = app.login_token("boss@acme.test").await?;

    let procedure_id = app.insert_procedure(org, "Oven lockout", oven).await?;
    let path = format!("/api/procedures/{procedure_id}/hardware");

    let response = app
        .put_json(&path, &json!({ "hardware_ids": [oven, foreign] }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .put_json(&path, &json!({ "hardware_ids": [oven, oven] }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let linked: Value = read_json(response).await?;
    assert_eq!(linked["hardware_ids"], json!([oven]));

    let response = app
        .get(&format!("/api/hardware/{foreign}/procedures"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn csv_template_is_served_to_authenticated_callers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_principal("root@portal.test", Some("super_admin")).await?;
    let token = app.login_token("root@portal.test").await?;

    let response = app.get("/api/hardware/csv-template", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/hardware/csv-template", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()?
        .contains("hardware_template.csv"));

    let body = String::from_utf8(body_to_vec(response.into_body()).await?)?;
    let mut lines = body.lines();
    assert_eq!(
        lines.next(),
        Some(
            "organization_name,location_name,name,hardware_type,manufacturer,model_number,\
             serial_number,status,installation_date,warranty_expiration,internal_notes"
        )
    );
    assert_eq!(lines.count(), 2);

    app.cleanup().await?;
    Ok(())
}
