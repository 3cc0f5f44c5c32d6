//! Common type definitions and permission system types.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, OrganizationId, etc.)
//! - Resource and operation enums used in authorization errors
//!
//! # Permission System
//!
//! Access is scoped to an organization. Each user holds one [`OrgRole`] per organization they
//! belong to, and every operation names the minimum role it needs. Platform admins bypass the
//! organization check entirely.
//!
//! - [`Resource`]: What entity type is being accessed (Members, Classes, Workflows, etc.)
//! - [`Operation`]: What action is being performed (Read, Create, Update, Delete)
//! - [`Permission`]: The requirement that was not met
//!
//! [`OrgRole`]: crate::api::models::organizations::OrgRole

use crate::api::models::organizations::OrgRole;
use std::fmt;
use uuid::Uuid;

pub type UserId = Uuid;
pub type OrganizationId = Uuid;
pub type MemberId = Uuid;
pub type PlanId = Uuid;
pub type SubscriptionId = Uuid;
pub type ClassId = Uuid;
pub type BookingId = Uuid;
pub type WorkoutId = Uuid;
pub type WorkflowId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Organizations,
    Members,
    Plans,
    Billing,
    Classes,
    Bookings,
    Workouts,
    WorkoutResults,
    Workflows,
    AuditLogs,
    Platform,
}

/// Authorization requirement attached to permission errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// At least this role in the target organization
    OrgRole(OrgRole),
    /// Acting on the member record linked to the caller's own account
    OwnMember,
    /// Platform-wide administrator
    PlatformAdmin,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Read => write!(f, "read"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Organizations => "organizations",
            Resource::Members => "members",
            Resource::Plans => "plans",
            Resource::Billing => "billing",
            Resource::Classes => "classes",
            Resource::Bookings => "bookings",
            Resource::Workouts => "workouts",
            Resource::WorkoutResults => "workout results",
            Resource::Workflows => "workflows",
            Resource::AuditLogs => "audit logs",
            Resource::Platform => "platform",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
