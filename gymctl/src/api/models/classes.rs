//! API request/response models for the class schedule and bookings.

use crate::db::models::classes::{BookingDBResponse, ClassDBResponse, RosterEntryDBResponse};
use crate::types::{BookingId, ClassId, MemberId, OrganizationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Booked,
    Waitlisted,
    Cancelled,
    Attended,
    NoShow,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassCreate {
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub coach_id: Option<UserId>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ClassUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub coach_id: Option<UserId>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub capacity: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ClassId,
    #[schema(value_type = String, format = "uuid")]
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub coach_id: Option<UserId>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: i32,
    pub booked_count: i64,
    pub waitlist_count: i64,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ClassDBResponse> for ClassResponse {
    fn from(db: ClassDBResponse) -> Self {
        Self {
            id: db.id,
            organization_id: db.organization_id,
            name: db.name,
            description: db.description,
            coach_id: db.coach_id,
            location: db.location,
            starts_at: db.starts_at,
            ends_at: db.ends_at,
            capacity: db.capacity,
            booked_count: db.booked_count,
            waitlist_count: db.waitlist_count,
            cancelled_at: db.cancelled_at,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListClassesQuery {
    /// Only classes starting at or after this instant
    pub from: Option<DateTime<Utc>>,
    /// Only classes starting before this instant
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_cancelled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BookingCreate {
    /// Member to book. Defaults to the caller's own member record.
    #[schema(value_type = Option<String>, format = "uuid")]
    pub member_id: Option<MemberId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: BookingId,
    #[schema(value_type = String, format = "uuid")]
    pub class_id: ClassId,
    #[schema(value_type = String, format = "uuid")]
    pub member_id: MemberId,
    pub status: BookingStatus,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BookingDBResponse> for BookingResponse {
    fn from(db: BookingDBResponse) -> Self {
        Self {
            id: db.id,
            class_id: db.class_id,
            member_id: db.member_id,
            status: db.status,
            reminder_sent_at: db.reminder_sent_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// One line of a class roster
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RosterEntry {
    #[serde(flatten)]
    pub booking: BookingResponse,
    pub first_name: String,
    pub last_name: String,
}

impl From<RosterEntryDBResponse> for RosterEntry {
    fn from(db: RosterEntryDBResponse) -> Self {
        Self {
            first_name: db.first_name,
            last_name: db.last_name,
            booking: db.booking.into(),
        }
    }
}

/// Result of cancelling a booking: the cancelled booking and whoever moved off the waitlist
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelBookingResponse {
    pub booking: BookingResponse,
    pub promoted: Option<BookingResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendanceRequest {
    /// `true` marks `attended`, `false` marks `no_show`
    pub attended: bool,
}
