use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::upsert::excluded;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{Access, AccessScope, OrgRole};
use crate::effects::{dispatch, OutgoingEmail, SideEffect};
use crate::error::{AppError, AppResult};
use crate::gating;
use crate::models::{
    Hardware, Location, NewHardware, NewLocation, NewLocationAssignment, NewMembership,
    NewOrganization, Organization, Principal, Procedure,
};
use crate::schema::{
    hardware, location_assignments, locations, memberships, organizations, principals,
    procedures,
};
use crate::state::AppState;
use crate::utils::time::to_iso;

const MAX_PREFIX_LENGTH: usize = 8;

#[derive(Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub ticket_prefix: String,
    pub contact_email: Option<String>,
}

#[derive(Serialize)]
pub struct OrganizationResponse {
    pub id: Uuid,
    pub name: String,
    pub ticket_prefix: String,
    pub contact_email: Option<String>,
    pub created_at: String,
}

impl From<Organization> for OrganizationResponse {
    fn from(org: Organization) -> Self {
        Self {
            id: org.id,
            name: org.name,
            ticket_prefix: org.ticket_prefix,
            contact_email: org.contact_email,
            created_at: to_iso(org.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub principal_id: Uuid,
    pub role: String,
}

#[derive(Serialize)]
pub struct MemberResponse {
    pub principal_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
}

#[derive(Deserialize)]
pub struct CreateLocationRequest {
    pub name: String,
    pub address: Option<String>,
}

#[derive(Serialize)]
pub struct LocationResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub address: Option<String>,
}

impl From<Location> for LocationResponse {
    fn from(location: Location) -> Self {
        Self {
            id: location.id,
            organization_id: location.organization_id,
            name: location.name,
            address: location.address,
        }
    }
}

#[derive(Deserialize)]
pub struct AssignLocationRequest {
    pub principal_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateHardwareRequest {
    pub name: String,
    pub hardware_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub status: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub warranty_expiration: Option<NaiveDate>,
    pub internal_notes: Option<String>,
}

#[derive(Serialize)]
pub struct HardwareResponse {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub hardware_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub status: String,
    pub installation_date: Option<NaiveDate>,
    pub warranty_expiration: Option<NaiveDate>,
    pub internal_notes: Option<String>,
}

impl From<Hardware> for HardwareResponse {
    fn from(item: Hardware) -> Self {
        Self {
            id: item.id,
            location_id: item.location_id,
            name: item.name,
            hardware_type: item.hardware_type,
            manufacturer: item.manufacturer,
            model_number: item.model_number,
            serial_number: item.serial_number,
            status: item.status,
            installation_date: item.installation_date,
            warranty_expiration: item.warranty_expiration,
            internal_notes: item.internal_notes,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateProcedureRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub hardware_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateProcedureRequest {
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Deserialize)]
pub struct ReplaceProcedureHardwareRequest {
    pub hardware_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct ProcedureResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub body: String,
    pub version: i32,
    pub updated_at: String,
}

impl From<Procedure> for ProcedureResponse {
    fn from(procedure: Procedure) -> Self {
        Self {
            id: procedure.id,
            organization_id: procedure.organization_id,
            title: procedure.title,
            body: procedure.body,
            version: procedure.version,
            updated_at: to_iso(procedure.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct ProcedureHardwareResponse {
    pub procedure_id: Uuid,
    pub hardware_ids: Vec<Uuid>,
}

fn required(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn normalize_prefix(value: &str) -> AppResult<String> {
    let prefix = value.trim().to_ascii_uppercase();
    if prefix.is_empty()
        || prefix.len() > MAX_PREFIX_LENGTH
        || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(AppError::bad_request(format!(
            "ticket_prefix must be 1-{MAX_PREFIX_LENGTH} letters or digits"
        )));
    }
    Ok(prefix)
}

fn welcome_email(org: &Organization, to: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("Welcome to the support portal, {}", org.name),
        body: format!(
            "Your organization {} is now set up on the support portal.\n\
             Tickets you submit will be numbered {}-000001 onwards.",
            org.name, org.ticket_prefix
        ),
    }
}

fn load_location(conn: &mut PgConnection, location_id: Uuid) -> AppResult<Location> {
    Ok(locations::table.find(location_id).first(conn)?)
}

fn load_procedure(conn: &mut PgConnection, procedure_id: Uuid) -> AppResult<Procedure> {
    Ok(procedures::table.find(procedure_id).first(conn)?)
}

pub async fn create_organization(
    State(state): State<AppState>,
    scope: AccessScope,
    Json(payload): Json<CreateOrganizationRequest>,
) -> AppResult<(StatusCode, Json<OrganizationResponse>)> {
    scope.require_platform_admin()?;

    let name = required(&payload.name, "name")?;
    let ticket_prefix = normalize_prefix(&payload.ticket_prefix)?;
    let contact_email = payload
        .contact_email
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty());

    let mut conn = state.db()?;
    let new_org = NewOrganization {
        id: Uuid::new_v4(),
        name,
        ticket_prefix,
        contact_email,
    };

    let org: Organization = match diesel::insert_into(organizations::table)
        .values(&new_org)
        .get_result(&mut conn)
    {
        Ok(org) => org,
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::bad_request("organization name already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    };
    drop(conn);

    info!(
        target: "access",
        actor_id = %scope.principal_id(),
        organization_id = %org.id,
        "organization created"
    );

    if let Some(email) = org.contact_email.as_deref() {
        dispatch(&state, vec![SideEffect::Email(welcome_email(&org, email))]);
    }

    Ok((StatusCode::CREATED, Json(OrganizationResponse::from(org))))
}

pub async fn list_organizations(
    State(state): State<AppState>,
    scope: AccessScope,
) -> AppResult<Json<Vec<OrganizationResponse>>> {
    let mut conn = state.db()?;
    let mut query = organizations::table.into_boxed();
    if !scope.is_platform_admin() {
        query = query.filter(organizations::id.eq_any(scope.organization_ids()));
    }
    let orgs: Vec<Organization> = query.order(organizations::name.asc()).load(&mut conn)?;
    Ok(Json(orgs.into_iter().map(OrganizationResponse::from).collect()))
}

pub async fn add_member(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<MemberResponse>)> {
    scope.require_org_admin(organization_id)?;
    let role = OrgRole::parse(&payload.role)
        .ok_or_else(|| AppError::bad_request(format!("unknown role: {}", payload.role)))?;

    let mut conn = state.db()?;
    organizations::table
        .find(organization_id)
        .select(organizations::id)
        .first::<Uuid>(&mut conn)?;
    let principal: Option<Principal> = principals::table
        .find(payload.principal_id)
        .first(&mut conn)
        .optional()?;
    if principal.is_none() {
        return Err(AppError::bad_request("principal does not exist"));
    }

    diesel::insert_into(memberships::table)
        .values(&NewMembership {
            principal_id: payload.principal_id,
            organization_id,
            role: role.as_str().to_string(),
        })
        .on_conflict((memberships::principal_id, memberships::organization_id))
        .do_update()
        .set(memberships::role.eq(excluded(memberships::role)))
        .execute(&mut conn)?;

    info!(
        target: "access",
        actor_id = %scope.principal_id(),
        principal_id = %payload.principal_id,
        %organization_id,
        role = role.as_str(),
        "membership granted"
    );

    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            principal_id: payload.principal_id,
            organization_id,
            role: role.as_str().to_string(),
        }),
    ))
}

pub async fn create_location(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<CreateLocationRequest>,
) -> AppResult<(StatusCode, Json<LocationResponse>)> {
    scope.require_org_admin(organization_id)?;
    let name = required(&payload.name, "name")?;

    let mut conn = state.db()?;
    organizations::table
        .find(organization_id)
        .select(organizations::id)
        .first::<Uuid>(&mut conn)?;

    let location: Location = match diesel::insert_into(locations::table)
        .values(&NewLocation {
            id: Uuid::new_v4(),
            organization_id,
            name,
            address: payload.address.filter(|value| !value.trim().is_empty()),
        })
        .get_result(&mut conn)
    {
        Ok(location) => location,
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::bad_request("location name already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    Ok((StatusCode::CREATED, Json(LocationResponse::from(location))))
}

pub async fn list_locations(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(organization_id): Path<Uuid>,
) -> AppResult<Json<Vec<LocationResponse>>> {
    scope.require_member(organization_id, Access::Read)?;

    let mut conn = state.db()?;
    let rows: Vec<Location> = locations::table
        .filter(locations::organization_id.eq(organization_id))
        .order(locations::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(LocationResponse::from).collect()))
}

pub async fn assign_location(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(location_id): Path<Uuid>,
    Json(payload): Json<AssignLocationRequest>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let location = load_location(&mut conn, location_id)?;
    scope.require_org_admin(location.organization_id)?;

    let member: Option<String> = memberships::table
        .filter(memberships::principal_id.eq(payload.principal_id))
        .filter(memberships::organization_id.eq(location.organization_id))
        .select(memberships::role)
        .first(&mut conn)
        .optional()?;
    if member.is_none() {
        return Err(AppError::bad_request(
            "principal is not a member of the location's organization",
        ));
    }

    diesel::insert_into(location_assignments::table)
        .values(&NewLocationAssignment {
            principal_id: payload.principal_id,
            location_id,
        })
        .on_conflict_do_nothing()
        .execute(&mut conn)?;

    info!(
        target: "access",
        actor_id = %scope.principal_id(),
        principal_id = %payload.principal_id,
        %location_id,
        "location assignment granted"
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_hardware(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(location_id): Path<Uuid>,
    Json(payload): Json<CreateHardwareRequest>,
) -> AppResult<(StatusCode, Json<HardwareResponse>)> {
    let mut conn = state.db()?;
    let location = load_location(&mut conn, location_id)?;
    scope.require_org_admin(location.organization_id)?;

    let name = required(&payload.name, "name")?;
    let status = match payload.status.as_deref().map(str::trim) {
        None | Some("") => "active".to_string(),
        Some(value) => value.to_string(),
    };

    let item: Hardware = diesel::insert_into(hardware::table)
        .values(&NewHardware {
            id: Uuid::new_v4(),
            location_id,
            name,
            hardware_type: payload.hardware_type,
            manufacturer: payload.manufacturer,
            model_number: payload.model_number,
            serial_number: payload.serial_number,
            status,
            installation_date: payload.installation_date,
            warranty_expiration: payload.warranty_expiration,
            internal_notes: payload.internal_notes,
        })
        .get_result(&mut conn)?;

    Ok((StatusCode::CREATED, Json(HardwareResponse::from(item))))
}

pub async fn list_hardware(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(organization_id): Path<Uuid>,
) -> AppResult<Json<Vec<HardwareResponse>>> {
    scope.require_member(organization_id, Access::Read)?;

    let mut conn = state.db()?;
    let rows: Vec<Hardware> = hardware::table
        .inner_join(locations::table)
        .filter(locations::organization_id.eq(organization_id))
        .order((locations::name.asc(), hardware::name.asc()))
        .select(hardware::all_columns)
        .load(&mut conn)?;

    // Notes are for the organization's administrators.
    let show_notes = scope.is_org_admin(Some(organization_id));
    Ok(Json(
        rows.into_iter()
            .map(|item| {
                let mut response = HardwareResponse::from(item);
                if !show_notes {
                    response.internal_notes = None;
                }
                response
            })
            .collect(),
    ))
}

pub async fn create_procedure(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<CreateProcedureRequest>,
) -> AppResult<(StatusCode, Json<ProcedureResponse>)> {
    scope.require_org_admin(organization_id)?;
    let title = required(&payload.title, "title")?;
    let body = required(&payload.body, "body")?;

    let mut conn = state.db()?;
    organizations::table
        .find(organization_id)
        .select(organizations::id)
        .first::<Uuid>(&mut conn)?;

    let procedure = conn.transaction::<Procedure, AppError, _>(|conn| {
        let procedure = gating::create_procedure(conn, organization_id, &title, &body)?;
        gating::replace_procedure_hardware(conn, &procedure, &payload.hardware_ids)?;
        Ok(procedure)
    })?;

    Ok((StatusCode::CREATED, Json(ProcedureResponse::from(procedure))))
}

pub async fn update_procedure(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(procedure_id): Path<Uuid>,
    Json(payload): Json<UpdateProcedureRequest>,
) -> AppResult<Json<ProcedureResponse>> {
    let title = payload
        .title
        .as_deref()
        .map(|value| required(value, "title"))
        .transpose()?;
    let body = payload
        .body
        .as_deref()
        .map(|value| required(value, "body"))
        .transpose()?;
    if title.is_none() && body.is_none() {
        return Err(AppError::bad_request("title or body is required"));
    }

    let mut conn = state.db()?;
    let existing = load_procedure(&mut conn, procedure_id)?;
    scope.require_org_admin(existing.organization_id)?;

    let procedure =
        gating::update_procedure(&mut conn, procedure_id, title.as_deref(), body.as_deref())?;
    info!(
        procedure_id = %procedure.id,
        version = procedure.version,
        "procedure revised; earlier acknowledgments no longer count"
    );

    Ok(Json(ProcedureResponse::from(procedure)))
}

pub async fn replace_procedure_hardware(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(procedure_id): Path<Uuid>,
    Json(payload): Json<ReplaceProcedureHardwareRequest>,
) -> AppResult<Json<ProcedureHardwareResponse>> {
    let mut conn = state.db()?;
    let procedure = load_procedure(&mut conn, procedure_id)?;
    scope.require_org_admin(procedure.organization_id)?;

    let hardware_ids =
        gating::replace_procedure_hardware(&mut conn, &procedure, &payload.hardware_ids)?;

    Ok(Json(ProcedureHardwareResponse {
        procedure_id,
        hardware_ids,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_uppercased_and_validated() {
        assert_eq!(normalize_prefix(" acme ").unwrap(), "ACME");
        assert!(normalize_prefix("").is_err());
        assert!(normalize_prefix("TOO-LONG").is_err());
        assert!(normalize_prefix("ABCDEFGHI").is_err());
    }
}
