//! Safety-procedure gating in front of ticket submission for hardware.
//!
//! The client shows every procedure attached to a hardware item and only lets
//! the user continue once they scrolled to the end and confirmed. The confirmed
//! versions are persisted and consulted again when the ticket is created.

use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::lifecycle::now_micros;
use crate::models::{
    NewProcedure, NewProcedureAcknowledgment, NewProcedureHardware, Procedure,
    ProcedureAcknowledgment,
};
use crate::schema::{hardware, locations, procedure_acknowledgments, procedure_hardware, procedures};

#[derive(Debug, Error)]
pub enum GatingError {
    #[error("{pending} safety procedure(s) must be acknowledged before submitting a ticket for this hardware")]
    AcknowledgmentRequired { pending: usize },
    #[error("safety procedures were declined")]
    Declined,
    #[error("safety procedures must be read to the end before confirming")]
    Incomplete,
    #[error("the presented safety procedures are out of date; reload and review them again")]
    StaleProcedures,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Client-side gate state: both the scroll condition and the explicit
/// confirmation must hold before the submission continues.
#[derive(Debug, Clone, Copy)]
pub struct PresentationGate {
    threshold_px: u32,
    scrolled_to_end: bool,
    confirmed: bool,
    declined: bool,
}

impl PresentationGate {
    pub fn new(threshold_px: u32) -> Self {
        Self {
            threshold_px,
            scrolled_to_end: false,
            confirmed: false,
            declined: false,
        }
    }

    /// Records a scroll position. Once the bottom has been reached the gate
    /// remembers it even if the user scrolls back up.
    pub fn record_scroll(&mut self, scroll_top: f64, client_height: f64, scroll_height: f64) {
        let remaining = scroll_height - (scroll_top + client_height);
        if remaining <= f64::from(self.threshold_px) {
            self.scrolled_to_end = true;
        }
    }

    pub fn confirm(&mut self) {
        if !self.declined {
            self.confirmed = true;
        }
    }

    pub fn decline(&mut self) {
        self.declined = true;
        self.confirmed = false;
    }

    pub fn is_declined(&self) -> bool {
        self.declined
    }

    pub fn can_proceed(&self) -> bool {
        !self.declined && self.scrolled_to_end && self.confirmed
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
pub struct PresentedProcedure {
    pub id: Uuid,
    pub version: i32,
}

/// Last scroll metrics reported by the client, in pixels.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScrollPosition {
    pub scroll_top: f64,
    pub client_height: f64,
    pub scroll_height: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcknowledgmentSubmission {
    pub procedures: Vec<PresentedProcedure>,
    #[serde(default)]
    pub scrolled_to_end: bool,
    #[serde(default)]
    pub scroll: Option<ScrollPosition>,
    #[serde(default)]
    pub confirmed: bool,
}

impl AcknowledgmentSubmission {
    /// Replays the submitted presentation state into a gate. A missing
    /// confirmation counts as a decline.
    pub fn gate(&self, threshold_px: u32) -> PresentationGate {
        let mut gate = PresentationGate::new(threshold_px);
        if self.scrolled_to_end {
            gate.scrolled_to_end = true;
        }
        if let Some(position) = self.scroll {
            gate.record_scroll(
                position.scroll_top,
                position.client_height,
                position.scroll_height,
            );
        }
        if self.confirmed {
            gate.confirm();
        } else {
            gate.decline();
        }
        gate
    }
}

pub fn procedures_for_hardware(
    conn: &mut PgConnection,
    hardware_id: Uuid,
) -> QueryResult<Vec<Procedure>> {
    procedure_hardware::table
        .inner_join(procedures::table)
        .filter(procedure_hardware::hardware_id.eq(hardware_id))
        .select(procedures::all_columns)
        .order((procedures::title.asc(), procedures::id.asc()))
        .load(conn)
}

/// Persists one acknowledgment per presented procedure. Nothing is written
/// unless the gate was passed and the presented versions are all current.
pub fn record_acknowledgments(
    conn: &mut PgConnection,
    principal_id: Uuid,
    hardware_id: Uuid,
    submission: &AcknowledgmentSubmission,
    threshold_px: u32,
) -> Result<Vec<ProcedureAcknowledgment>, GatingError> {
    let gate = submission.gate(threshold_px);
    if gate.is_declined() {
        return Err(GatingError::Declined);
    }
    if !gate.can_proceed() {
        return Err(GatingError::Incomplete);
    }

    conn.transaction(|conn| {
        let current = procedures_for_hardware(conn, hardware_id)?;
        let current: HashSet<PresentedProcedure> = current
            .iter()
            .map(|procedure| PresentedProcedure {
                id: procedure.id,
                version: procedure.version,
            })
            .collect();
        let presented: HashSet<PresentedProcedure> =
            submission.procedures.iter().copied().collect();
        if current != presented {
            return Err(GatingError::StaleProcedures);
        }

        let now = now_micros();
        let rows: Vec<NewProcedureAcknowledgment> = current
            .iter()
            .map(|procedure| NewProcedureAcknowledgment {
                id: Uuid::new_v4(),
                principal_id,
                hardware_id,
                procedure_id: procedure.id,
                procedure_version: procedure.version,
                acknowledged_at: now,
            })
            .collect();

        let stored = diesel::insert_into(procedure_acknowledgments::table)
            .values(&rows)
            .get_results(conn)?;

        info!(
            principal_id = %principal_id,
            hardware_id = %hardware_id,
            count = rows.len(),
            "safety procedures acknowledged"
        );
        Ok(stored)
    })
}

/// Checks that `principal_id` holds a recent acknowledgment of the current
/// version of every procedure attached to the hardware.
pub fn ensure_acknowledged(
    conn: &mut PgConnection,
    principal_id: Uuid,
    hardware_id: Uuid,
    validity: Duration,
    now: NaiveDateTime,
) -> Result<(), GatingError> {
    let required: Vec<(Uuid, i32)> = procedure_hardware::table
        .inner_join(procedures::table)
        .filter(procedure_hardware::hardware_id.eq(hardware_id))
        .select((procedures::id, procedures::version))
        .load(conn)?;
    if required.is_empty() {
        return Ok(());
    }

    let held: Vec<(Uuid, i32)> = procedure_acknowledgments::table
        .filter(procedure_acknowledgments::principal_id.eq(principal_id))
        .filter(procedure_acknowledgments::hardware_id.eq(hardware_id))
        .filter(procedure_acknowledgments::acknowledged_at.ge(now - validity))
        .select((
            procedure_acknowledgments::procedure_id,
            procedure_acknowledgments::procedure_version,
        ))
        .load(conn)?;

    let pending = pending_procedures(&required, &held);
    if pending.is_empty() {
        Ok(())
    } else {
        Err(GatingError::AcknowledgmentRequired {
            pending: pending.len(),
        })
    }
}

fn pending_procedures(required: &[(Uuid, i32)], held: &[(Uuid, i32)]) -> Vec<Uuid> {
    let held: HashSet<&(Uuid, i32)> = held.iter().collect();
    required
        .iter()
        .filter(|entry| !held.contains(entry))
        .map(|(id, _)| *id)
        .collect()
}

pub fn create_procedure(
    conn: &mut PgConnection,
    organization_id: Uuid,
    title: &str,
    body: &str,
) -> QueryResult<Procedure> {
    diesel::insert_into(procedures::table)
        .values(&NewProcedure {
            id: Uuid::new_v4(),
            organization_id,
            title: title.to_string(),
            body: body.to_string(),
        })
        .get_result(conn)
}

/// Rewrites a procedure and bumps its version, which invalidates every
/// acknowledgment of earlier versions.
pub fn update_procedure(
    conn: &mut PgConnection,
    procedure_id: Uuid,
    title: Option<&str>,
    body: Option<&str>,
) -> QueryResult<Procedure> {
    conn.transaction(|conn| {
        let current: Procedure = procedures::table
            .find(procedure_id)
            .for_update()
            .first(conn)?;

        diesel::update(procedures::table.find(procedure_id))
            .set((
                procedures::title.eq(title.unwrap_or(&current.title)),
                procedures::body.eq(body.unwrap_or(&current.body)),
                procedures::version.eq(current.version + 1),
                procedures::updated_at.eq(now_micros()),
            ))
            .get_result(conn)
    })
}

#[derive(Debug, Error)]
pub enum AssociationError {
    #[error("hardware {0} does not belong to the procedure's organization")]
    ForeignHardware(Uuid),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Replaces the procedure's hardware set in one transaction.
pub fn replace_procedure_hardware(
    conn: &mut PgConnection,
    procedure: &Procedure,
    hardware_ids: &[Uuid],
) -> Result<Vec<Uuid>, AssociationError> {
    let wanted: Vec<Uuid> = {
        let mut seen = HashSet::new();
        hardware_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    };

    conn.transaction(|conn| {
        let owned: HashSet<Uuid> = hardware::table
            .inner_join(locations::table)
            .filter(hardware::id.eq_any(&wanted))
            .filter(locations::organization_id.eq(procedure.organization_id))
            .select(hardware::id)
            .load::<Uuid>(conn)?
            .into_iter()
            .collect();
        if let Some(foreign) = wanted.iter().find(|id| !owned.contains(id)) {
            return Err(AssociationError::ForeignHardware(*foreign));
        }

        diesel::delete(
            procedure_hardware::table.filter(procedure_hardware::procedure_id.eq(procedure.id)),
        )
        .execute(conn)?;

        let rows: Vec<NewProcedureHardware> = wanted
            .iter()
            .map(|hardware_id| NewProcedureHardware {
                procedure_id: procedure.id,
                hardware_id: *hardware_id,
            })
            .collect();
        if !rows.is_empty() {
            diesel::insert_into(procedure_hardware::table)
                .values(&rows)
                .execute(conn)?;
        }

        Ok(wanted.clone())
    })
}
