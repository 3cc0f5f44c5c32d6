//! API request/response models for members.

use crate::db::models::members::MemberDBResponse;
use crate::types::{MemberId, OrganizationId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "member_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Lead,
    Active,
    Paused,
    Cancelled,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberStatus::Lead => "lead",
            MemberStatus::Active => "active",
            MemberStatus::Paused => "paused",
            MemberStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lead" => Ok(MemberStatus::Lead),
            "active" => Ok(MemberStatus::Active),
            "paused" => Ok(MemberStatus::Paused),
            "cancelled" | "canceled" => Ok(MemberStatus::Cancelled),
            other => Err(format!("unknown member status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemberCreate {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<MemberStatus>,
    pub notes: Option<String>,
    #[serde(default)]
    pub email_opt_out: bool,
    pub joined_at: Option<NaiveDate>,
    /// Link the record to an existing login
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MemberUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<MemberStatus>,
    pub notes: Option<String>,
    pub email_opt_out: Option<bool>,
    pub joined_at: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemberResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MemberId,
    #[schema(value_type = String, format = "uuid")]
    pub organization_id: OrganizationId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: MemberStatus,
    pub notes: Option<String>,
    pub has_billing_account: bool,
    pub email_opt_out: bool,
    pub joined_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MemberDBResponse> for MemberResponse {
    fn from(db: MemberDBResponse) -> Self {
        Self {
            id: db.id,
            organization_id: db.organization_id,
            user_id: db.user_id,
            first_name: db.first_name,
            last_name: db.last_name,
            email: db.email,
            phone: db.phone,
            status: db.status,
            notes: db.notes,
            has_billing_account: db.stripe_customer_id.is_some(),
            email_opt_out: db.email_opt_out,
            joined_at: db.joined_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListMembersQuery {
    /// Case-insensitive match on name or email
    pub search: Option<String>,
    pub status: Option<MemberStatus>,
}

/// One rejected row of a CSV import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImportRowError {
    /// 1-based line number; the header is line 1
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<ImportRowError>,
}
