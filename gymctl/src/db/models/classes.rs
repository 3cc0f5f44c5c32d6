//! Database models for classes and bookings.

use crate::api::models::classes::BookingStatus;
use crate::types::{BookingId, ClassId, MemberId, OrganizationId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct ClassCreateDBRequest {
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub coach_id: Option<UserId>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ClassUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub coach_id: Option<UserId>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub capacity: Option<i32>,
}

/// Class row plus live booking counts
#[derive(Debug, Clone, FromRow)]
pub struct ClassDBResponse {
    pub id: ClassId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub coach_id: Option<UserId>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: i32,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub booked_count: i64,
    pub waitlist_count: i64,
}

impl ClassDBResponse {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BookingDBResponse {
    pub id: BookingId,
    pub organization_id: OrganizationId,
    pub class_id: ClassId,
    pub member_id: MemberId,
    pub status: BookingStatus,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RosterEntryDBResponse {
    #[sqlx(flatten)]
    pub booking: BookingDBResponse,
    pub first_name: String,
    pub last_name: String,
}

/// A booking that is due a reminder, joined with everything the email needs
#[derive(Debug, Clone, FromRow)]
pub struct DueReminderDBResponse {
    pub booking_id: BookingId,
    pub class_id: ClassId,
    pub class_name: String,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub member_id: MemberId,
    pub first_name: String,
    pub email: Option<String>,
    pub email_opt_out: bool,
}
