use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::access::{Access, AccessScope};
use crate::error::{AppError, AppResult};
use crate::gating::{self, AcknowledgmentSubmission};
use crate::models::{Hardware, ProcedureAcknowledgment};
use crate::schema::{hardware, locations};
use crate::state::AppState;
use crate::utils::time::to_iso;

const CSV_TEMPLATE_HEADER: [&str; 11] = [
    "organization_name",
    "location_name",
    "name",
    "hardware_type",
    "manufacturer",
    "model_number",
    "serial_number",
    "status",
    "installation_date",
    "warranty_expiration",
    "internal_notes",
];

const CSV_TEMPLATE_ROWS: [[&str; 11]; 2] = [
    [
        "Acme Foods",
        "Downtown Store",
        "Walk-in Freezer 1",
        "refrigeration",
        "ColdCo",
        "WF-2000",
        "CC-48213",
        "active",
        "2023-03-15",
        "2026-03-15",
        "Door gasket replaced 2024-01",
    ],
    [
        "Acme Foods",
        "Airport Kiosk",
        "Espresso Machine",
        "beverage",
        "BrewMaster",
        "BM-PRO",
        "BM-99120",
        "active",
        "2024-06-01",
        "",
        "",
    ],
];

#[derive(Serialize)]
pub struct PresentedProcedureResponse {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub version: i32,
}

#[derive(Serialize)]
pub struct HardwareProceduresResponse {
    pub hardware_id: Uuid,
    pub scroll_threshold_px: u32,
    pub procedures: Vec<PresentedProcedureResponse>,
}

#[derive(Serialize)]
pub struct AcknowledgmentResponse {
    pub procedure_id: Uuid,
    pub procedure_version: i32,
    pub acknowledged_at: String,
}

impl From<ProcedureAcknowledgment> for AcknowledgmentResponse {
    fn from(ack: ProcedureAcknowledgment) -> Self {
        Self {
            procedure_id: ack.procedure_id,
            procedure_version: ack.procedure_version,
            acknowledged_at: to_iso(ack.acknowledged_at),
        }
    }
}

fn render_csv_template() -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_TEMPLATE_HEADER)?;
    for row in CSV_TEMPLATE_ROWS {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

pub async fn csv_template() -> AppResult<impl IntoResponse> {
    let body = render_csv_template()?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"hardware_template.csv\"",
            ),
        ],
        body,
    ))
}

/// Loads a hardware item together with its owning organization. Items outside
/// the caller's organizations are reported as missing.
fn load_reachable(
    conn: &mut PgConnection,
    scope: &AccessScope,
    hardware_id: Uuid,
) -> AppResult<(Hardware, Uuid)> {
    let (item, organization_id): (Hardware, Uuid) = hardware::table
        .inner_join(locations::table)
        .filter(hardware::id.eq(hardware_id))
        .select((hardware::all_columns, locations::organization_id))
        .first(conn)?;

    if scope.require_member(organization_id, Access::Read).is_err() {
        return Err(AppError::not_found());
    }
    Ok((item, organization_id))
}

pub async fn list_procedures(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(hardware_id): Path<Uuid>,
) -> AppResult<Json<HardwareProceduresResponse>> {
    let mut conn = state.db()?;
    let (item, _) = load_reachable(&mut conn, &scope, hardware_id)?;
    let procedures = gating::procedures_for_hardware(&mut conn, item.id)?;

    Ok(Json(HardwareProceduresResponse {
        hardware_id: item.id,
        scroll_threshold_px: state.config.procedure_scroll_threshold_px,
        procedures: procedures
            .into_iter()
            .map(|procedure| PresentedProcedureResponse {
                id: procedure.id,
                title: procedure.title,
                body: procedure.body,
                version: procedure.version,
            })
            .collect(),
    }))
}

pub async fn acknowledge_procedures(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(hardware_id): Path<Uuid>,
    Json(payload): Json<AcknowledgmentSubmission>,
) -> AppResult<(StatusCode, Json<Vec<AcknowledgmentResponse>>)> {
    let mut conn = state.db()?;
    let (item, organization_id) = load_reachable(&mut conn, &scope, hardware_id)?;
    scope.require_location(organization_id, item.location_id, Access::Write)?;

    let stored = gating::record_acknowledgments(
        &mut conn,
        scope.principal_id(),
        item.id,
        &payload,
        state.config.procedure_scroll_threshold_px,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(stored.into_iter().map(AcknowledgmentResponse::from).collect()),
    ))
}
