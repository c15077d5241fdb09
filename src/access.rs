//! Access-scope resolution.
//!
//! An [`AccessScope`] is built once per request from the caller's principal row,
//! memberships and location assignments. Handlers receive it as an extractor and
//! every authorization decision goes through it, keyed on the organization and
//! location stored on the target row.

use std::collections::{BTreeSet, HashMap};

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::models::Principal;
use crate::schema::{location_assignments, locations, memberships, principals};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminTier {
    SuperAdmin,
    Technician,
    ReadOnly,
}

impl AdminTier {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminTier::SuperAdmin => "super_admin",
            AdminTier::Technician => "technician",
            AdminTier::ReadOnly => "read_only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "super_admin" => Some(AdminTier::SuperAdmin),
            "technician" => Some(AdminTier::Technician),
            "read_only" => Some(AdminTier::ReadOnly),
            _ => None,
        }
    }

    pub fn can_write(self) -> bool {
        !matches!(self, AdminTier::ReadOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    OrgAdmin,
    Employee,
}

impl OrgRole {
    pub fn as_str(self) -> &'static str {
        match self {
            OrgRole::OrgAdmin => "org_admin",
            OrgRole::Employee => "employee",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "org_admin" => Some(OrgRole::OrgAdmin),
            "employee" => Some(OrgRole::Employee),
            _ => None,
        }
    }
}

/// Permission tier, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Employee,
    OrgAdmin,
    PlatformAdmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedScope {
    pub tier: Tier,
    pub org_id: Option<Uuid>,
    pub location_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct AccessDenied {
    reason: String,
}

impl AccessDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketVisibility {
    All,
    Restricted {
        principal_id: Uuid,
        organization_ids: Vec<Uuid>,
        location_ids: Vec<Uuid>,
    },
}

impl TicketVisibility {
    pub fn allows(
        &self,
        organization_id: Uuid,
        location_id: Uuid,
        submitted_by: Uuid,
        assigned_to: Option<Uuid>,
    ) -> bool {
        match self {
            TicketVisibility::All => true,
            TicketVisibility::Restricted {
                principal_id,
                organization_ids,
                location_ids,
            } => {
                organization_ids.contains(&organization_id)
                    || location_ids.contains(&location_id)
                    || submitted_by == *principal_id
                    || assigned_to == Some(*principal_id)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeSummary {
    pub principal_id: Uuid,
    pub tier: Option<Tier>,
    pub admin_tier: Option<AdminTier>,
    pub organizations: Vec<MembershipSummary>,
    pub location_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MembershipSummary {
    pub organization_id: Uuid,
    pub role: OrgRole,
}

#[derive(Debug, Clone)]
pub struct AccessScope {
    principal_id: Uuid,
    admin_tier: Option<AdminTier>,
    memberships: HashMap<Uuid, OrgRole>,
    // location id -> owning organization id
    assignments: HashMap<Uuid, Uuid>,
}

impl AccessScope {
    pub fn new(principal_id: Uuid, admin_tier: Option<AdminTier>) -> Self {
        Self {
            principal_id,
            admin_tier,
            memberships: HashMap::new(),
            assignments: HashMap::new(),
        }
    }

    pub fn with_membership(mut self, organization_id: Uuid, role: OrgRole) -> Self {
        self.memberships.insert(organization_id, role);
        self
    }

    pub fn with_assignment(mut self, organization_id: Uuid, location_id: Uuid) -> Self {
        self.assignments.insert(location_id, organization_id);
        self
    }

    /// Loads the scope for an active principal. Returns `None` when the principal
    /// does not exist or has been disabled.
    pub fn load(
        conn: &mut PgConnection,
        principal_id: Uuid,
    ) -> Result<Option<Self>, diesel::result::Error> {
        let principal: Option<Principal> = principals::table
            .find(principal_id)
            .filter(principals::disabled_at.is_null())
            .first(conn)
            .optional()?;

        let Some(principal) = principal else {
            return Ok(None);
        };

        let admin_tier = if principal.is_platform_admin {
            // A platform flag without a recognised tier gets the least privileged tier.
            Some(
                principal
                    .admin_tier
                    .as_deref()
                    .and_then(AdminTier::parse)
                    .unwrap_or(AdminTier::ReadOnly),
            )
        } else {
            None
        };

        let mut scope = AccessScope::new(principal.id, admin_tier);

        let membership_rows: Vec<(Uuid, String)> = memberships::table
            .filter(memberships::principal_id.eq(principal.id))
            .select((memberships::organization_id, memberships::role))
            .load(conn)?;

        for (organization_id, role) in membership_rows {
            match OrgRole::parse(&role) {
                Some(role) => scope = scope.with_membership(organization_id, role),
                None => {
                    warn!(principal_id = %principal.id, %organization_id, %role, "ignoring membership with unknown role");
                }
            }
        }

        let assignment_rows: Vec<(Uuid, Uuid)> = location_assignments::table
            .inner_join(locations::table)
            .filter(location_assignments::principal_id.eq(principal.id))
            .select((locations::organization_id, locations::id))
            .load(conn)?;

        for (organization_id, location_id) in assignment_rows {
            scope = scope.with_assignment(organization_id, location_id);
        }

        Ok(Some(scope))
    }

    pub fn principal_id(&self) -> Uuid {
        self.principal_id
    }

    pub fn admin_tier(&self) -> Option<AdminTier> {
        self.admin_tier
    }

    pub fn is_platform_admin(&self) -> bool {
        self.admin_tier.is_some()
    }

    pub fn can_write(&self) -> bool {
        self.admin_tier.map_or(true, AdminTier::can_write)
    }

    /// Computes the caller's tier, optionally narrowed to one organization.
    ///
    /// Without a target organization the highest tier across all memberships is
    /// reported; the organization is only filled in when it is unambiguous.
    pub fn resolve(&self, target_org: Option<Uuid>) -> Result<ResolvedScope, AccessDenied> {
        if self.is_platform_admin() {
            return Ok(ResolvedScope {
                tier: Tier::PlatformAdmin,
                org_id: target_org,
                location_ids: None,
            });
        }

        match target_org {
            Some(org_id) => match self.memberships.get(&org_id) {
                Some(OrgRole::OrgAdmin) => Ok(ResolvedScope {
                    tier: Tier::OrgAdmin,
                    org_id: Some(org_id),
                    location_ids: None,
                }),
                Some(OrgRole::Employee) => Ok(ResolvedScope {
                    tier: Tier::Employee,
                    org_id: Some(org_id),
                    location_ids: Some(self.locations_in(org_id)),
                }),
                None => Err(AccessDenied::new("no access to this organization")),
            },
            None => {
                let orgs = self.organization_ids();
                if orgs.is_empty() {
                    return Err(AccessDenied::new("no organization access"));
                }

                let tier = if self.memberships.values().any(|r| *r == OrgRole::OrgAdmin) {
                    Tier::OrgAdmin
                } else {
                    Tier::Employee
                };
                let org_id = (orgs.len() == 1).then(|| orgs[0]);
                let location_ids = match tier {
                    Tier::Employee => Some(self.all_locations()),
                    _ => None,
                };

                Ok(ResolvedScope {
                    tier,
                    org_id,
                    location_ids,
                })
            }
        }
    }

    pub fn is_org_admin(&self, organization_id: Option<Uuid>) -> bool {
        if self.is_platform_admin() {
            return true;
        }
        match organization_id {
            Some(org_id) => self.memberships.get(&org_id) == Some(&OrgRole::OrgAdmin),
            None => self.memberships.values().any(|r| *r == OrgRole::OrgAdmin),
        }
    }

    pub fn is_member(&self, organization_id: Uuid) -> bool {
        self.is_platform_admin() || self.memberships.contains_key(&organization_id)
    }

    pub fn can_access_location(&self, organization_id: Uuid, location_id: Uuid) -> bool {
        self.is_platform_admin()
            || self.memberships.get(&organization_id) == Some(&OrgRole::OrgAdmin)
            || self.assignments.get(&location_id) == Some(&organization_id)
    }

    pub fn ensure_writable(&self) -> Result<(), AccessDenied> {
        if self.can_write() {
            Ok(())
        } else {
            Err(AccessDenied::new("read-only administrators cannot modify data"))
        }
    }

    pub fn require_platform_admin(&self) -> Result<(), AccessDenied> {
        if !self.is_platform_admin() {
            return Err(AccessDenied::new("platform administrator required"));
        }
        self.ensure_writable()
    }

    pub fn require_org_admin(&self, organization_id: Uuid) -> Result<(), AccessDenied> {
        if !self.is_org_admin(Some(organization_id)) {
            return Err(AccessDenied::new("organization administrator required"));
        }
        self.ensure_writable()
    }

    /// Organization-wide resources (locations, hardware, procedures) are
    /// readable by every member regardless of location assignments.
    pub fn require_member(
        &self,
        organization_id: Uuid,
        access: Access,
    ) -> Result<(), AccessDenied> {
        if !self.is_member(organization_id) {
            return Err(AccessDenied::new("no access to this organization"));
        }
        match access {
            Access::Read => Ok(()),
            Access::Write => self.ensure_writable(),
        }
    }

    pub fn require_location(
        &self,
        organization_id: Uuid,
        location_id: Uuid,
        access: Access,
    ) -> Result<(), AccessDenied> {
        if !self.can_access_location(organization_id, location_id) {
            return Err(AccessDenied::new("no access to this location"));
        }
        match access {
            Access::Read => Ok(()),
            Access::Write => self.ensure_writable(),
        }
    }

    pub fn visibility(&self) -> TicketVisibility {
        if self.is_platform_admin() {
            return TicketVisibility::All;
        }

        let organization_ids = self
            .memberships
            .iter()
            .filter(|(_, role)| **role == OrgRole::OrgAdmin)
            .map(|(org_id, _)| *org_id)
            .collect();

        TicketVisibility::Restricted {
            principal_id: self.principal_id,
            organization_ids,
            location_ids: self.all_locations(),
        }
    }

    pub fn summary(&self) -> ScopeSummary {
        let tier = self.resolve(None).ok().map(|resolved| resolved.tier);
        let mut organizations: Vec<MembershipSummary> = self
            .memberships
            .iter()
            .map(|(organization_id, role)| MembershipSummary {
                organization_id: *organization_id,
                role: *role,
            })
            .collect();
        organizations.sort_by_key(|entry| entry.organization_id);

        ScopeSummary {
            principal_id: self.principal_id,
            tier,
            admin_tier: self.admin_tier,
            organizations,
            location_ids: self.all_locations(),
        }
    }

    pub fn organization_ids(&self) -> Vec<Uuid> {
        let orgs: BTreeSet<Uuid> = self.memberships.keys().copied().collect();
        orgs.into_iter().collect()
    }

    fn locations_in(&self, organization_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .assignments
            .iter()
            .filter(|(_, owner)| **owner == organization_id)
            .map(|(location_id, _)| *location_id)
            .collect();
        ids.sort();
        ids
    }

    fn all_locations(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.assignments.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AccessScope {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        let mut conn = state.db()?;
        AccessScope::load(&mut conn, user.principal_id)?.ok_or_else(AppError::unauthorized)
    }
}
