//! Database models for workouts and their results.

use crate::api::models::workouts::WorkoutScoring;
use crate::types::{MemberId, OrganizationId, UserId, WorkoutId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkoutCreateDBRequest {
    pub organization_id: OrganizationId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_for: NaiveDate,
    pub scoring: WorkoutScoring,
    pub time_cap_seconds: Option<i32>,
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkoutUpdateDBRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub scheduled_for: Option<NaiveDate>,
    pub scoring: Option<WorkoutScoring>,
    pub time_cap_seconds: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkoutDBResponse {
    pub id: WorkoutId,
    pub organization_id: OrganizationId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_for: NaiveDate,
    pub scoring: WorkoutScoring,
    pub time_cap_seconds: Option<i32>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WorkoutResultUpsert {
    pub organization_id: OrganizationId,
    pub workout_id: WorkoutId,
    pub member_id: MemberId,
    pub score: Decimal,
    pub rx: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkoutResultDBResponse {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub workout_id: WorkoutId,
    pub member_id: MemberId,
    pub score: Decimal,
    pub rx: bool,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A result joined with the athlete's name, for leaderboards
#[derive(Debug, Clone, FromRow)]
pub struct RankedResultDBResponse {
    pub member_id: MemberId,
    pub first_name: String,
    pub last_name: String,
    pub score: Decimal,
    pub rx: bool,
    pub notes: Option<String>,
}
