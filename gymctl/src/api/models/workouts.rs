//! API request/response models for workouts of the day, results and leaderboards.

use crate::db::models::workouts::{WorkoutDBResponse, WorkoutResultDBResponse};
use crate::types::{MemberId, OrganizationId, UserId, WorkoutId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "workout_scoring", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkoutScoring {
    /// Seconds to completion; lower is better
    Time,
    RoundsReps,
    Load,
    Reps,
    Calories,
    Distance,
    Points,
}

impl WorkoutScoring {
    pub fn lower_is_better(&self) -> bool {
        matches!(self, WorkoutScoring::Time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkoutCreate {
    pub title: String,
    pub description: Option<String>,
    pub scheduled_for: NaiveDate,
    pub scoring: WorkoutScoring,
    pub time_cap_seconds: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WorkoutUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub scheduled_for: Option<NaiveDate>,
    pub scoring: Option<WorkoutScoring>,
    pub time_cap_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkoutResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: WorkoutId,
    #[schema(value_type = String, format = "uuid")]
    pub organization_id: OrganizationId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_for: NaiveDate,
    pub scoring: WorkoutScoring,
    pub time_cap_seconds: Option<i32>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl From<WorkoutDBResponse> for WorkoutResponse {
    fn from(db: WorkoutDBResponse) -> Self {
        Self {
            id: db.id,
            organization_id: db.organization_id,
            title: db.title,
            description: db.description,
            scheduled_for: db.scheduled_for,
            scoring: db.scoring,
            time_cap_seconds: db.time_cap_seconds,
            created_by: db.created_by,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListWorkoutsQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkoutResultCreate {
    /// Defaults to the caller's own member record
    #[schema(value_type = Option<String>, format = "uuid")]
    pub member_id: Option<MemberId>,
    /// Seconds for `time` workouts, otherwise the raw count or load
    #[schema(value_type = String)]
    pub score: Decimal,
    #[serde(default = "default_rx")]
    pub rx: bool,
    pub notes: Option<String>,
}

fn default_rx() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkoutResultResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub workout_id: WorkoutId,
    #[schema(value_type = String, format = "uuid")]
    pub member_id: MemberId,
    #[schema(value_type = String)]
    pub score: Decimal,
    pub rx: bool,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<WorkoutResultDBResponse> for WorkoutResultResponse {
    fn from(db: WorkoutResultDBResponse) -> Self {
        Self {
            id: db.id,
            workout_id: db.workout_id,
            member_id: db.member_id,
            score: db.score,
            rx: db.rx,
            notes: db.notes,
            recorded_at: db.recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    /// Competition rank: tied scores share a rank and the next rank skips
    pub rank: usize,
    #[schema(value_type = String, format = "uuid")]
    pub member_id: MemberId,
    pub first_name: String,
    pub last_name: String,
    #[schema(value_type = String)]
    pub score: Decimal,
    pub rx: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardResponse {
    pub workout: WorkoutResponse,
    pub entries: Vec<LeaderboardEntry>,
}
