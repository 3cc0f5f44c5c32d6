//! Organization-scoped authorization.
//!
//! Every management route names the organization it acts on. [`authorize`] resolves the caller's
//! role in that organization and rejects the request unless it meets the operation's minimum.
//! Roles are ordered `member < coach < admin < owner`. Platform admins act as owners everywhere.
//!
//! Members (role `member`) can act on exactly one member record: the one linked to their own
//! login. [`resolve_member`] applies that rule for booking and score submission.

use crate::{
    api::models::{organizations::OrgRole, users::CurrentUser},
    db::handlers::{Members, Organizations, Repository},
    errors::{Error, Result},
    types::{MemberId, OrganizationId, Operation, Permission, Resource, abbrev_uuid},
};
use sqlx::PgConnection;
use tracing::{debug, instrument};

/// Proof that the caller passed an organization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgAccess {
    pub organization_id: OrganizationId,
    /// Effective role; platform admins without a membership get `Owner`
    pub role: OrgRole,
    pub is_platform_admin: bool,
}

impl OrgAccess {
    /// Staff can act on any member record in the organization
    pub fn is_staff(&self) -> bool {
        self.role >= OrgRole::Coach
    }
}

#[instrument(skip(conn, user), fields(user_id = %abbrev_uuid(&user.id), org_id = %abbrev_uuid(&org_id), ?min_role, %action, %resource), err)]
pub async fn authorize(
    conn: &mut PgConnection,
    user: &CurrentUser,
    org_id: OrganizationId,
    min_role: OrgRole,
    action: Operation,
    resource: Resource,
) -> Result<OrgAccess> {
    let role = Organizations::new(conn).get_role(org_id, user.id).await?;

    let role = match (role, user.is_platform_admin) {
        (_, true) => {
            // Reject unknown organizations for admins too, so they see 404 rather than empty lists
            if Organizations::new(conn).get_by_id(org_id).await?.is_none() {
                return Err(Error::NotFound {
                    resource: "Organization".to_string(),
                    id: org_id.to_string(),
                });
            }
            OrgRole::Owner
        }
        (Some(role), false) => role,
        // Non-members learn nothing about whether the organization exists
        (None, false) => {
            return Err(Error::InsufficientPermissions {
                required: Permission::OrgRole(min_role),
                action,
                resource: resource.to_string(),
            });
        }
    };

    if role < min_role {
        debug!(?role, "Role below required minimum");
        return Err(Error::InsufficientPermissions {
            required: Permission::OrgRole(min_role),
            action,
            resource: resource.to_string(),
        });
    }

    Ok(OrgAccess {
        organization_id: org_id,
        role,
        is_platform_admin: user.is_platform_admin,
    })
}

pub fn require_platform_admin(user: &CurrentUser, action: Operation) -> Result<()> {
    if user.is_platform_admin {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            required: Permission::PlatformAdmin,
            action,
            resource: Resource::Platform.to_string(),
        })
    }
}

/// Decide which member record a self-service action applies to.
///
/// Staff may name any member of the organization, and must name one. Plain members get their own
/// linked record, and may only name that one.
#[instrument(skip(conn, user, access), fields(user_id = %abbrev_uuid(&user.id)), err)]
pub async fn resolve_member(
    conn: &mut PgConnection,
    user: &CurrentUser,
    access: &OrgAccess,
    requested: Option<MemberId>,
    action: Operation,
    resource: Resource,
) -> Result<MemberId> {
    let org_id = access.organization_id;

    if access.is_staff() {
        let member_id = match requested {
            Some(id) => id,
            None => match Members::new(conn).find_by_user(org_id, user.id).await? {
                Some(own) => own.id,
                None => {
                    return Err(Error::BadRequest {
                        message: "member_id is required".to_string(),
                    });
                }
            },
        };
        return match Members::new(conn).get_by_id((org_id, member_id)).await? {
            Some(member) => Ok(member.id),
            None => Err(Error::NotFound {
                resource: "Member".to_string(),
                id: member_id.to_string(),
            }),
        };
    }

    let own = Members::new(conn).find_by_user(org_id, user.id).await?;
    match (own, requested) {
        (Some(own), None) => Ok(own.id),
        (Some(own), Some(requested)) if own.id == requested => Ok(own.id),
        _ => Err(Error::InsufficientPermissions {
            required: Permission::OwnMember,
            action,
            resource: resource.to_string(),
        }),
    }
}
