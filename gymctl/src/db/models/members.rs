//! Database models for members (the gym's CRM records).

use crate::api::models::members::MemberStatus;
use crate::types::{MemberId, OrganizationId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct MemberCreateDBRequest {
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: MemberStatus,
    pub notes: Option<String>,
    pub email_opt_out: bool,
    pub joined_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberUpdateDBRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<MemberStatus>,
    pub notes: Option<String>,
    pub email_opt_out: Option<bool>,
    pub joined_at: Option<NaiveDate>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MemberDBResponse {
    pub id: MemberId,
    pub organization_id: OrganizationId,
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: MemberStatus,
    pub notes: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub email_opt_out: bool,
    pub joined_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
