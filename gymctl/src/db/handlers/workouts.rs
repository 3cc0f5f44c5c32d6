//! Database repositories for workouts and workout results.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::workouts::{
        RankedResultDBResponse, WorkoutCreateDBRequest, WorkoutDBResponse, WorkoutResultDBResponse, WorkoutResultUpsert,
        WorkoutUpdateDBRequest,
    },
};
use crate::types::{OrganizationId, WorkoutId, abbrev_uuid};
use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkoutFilter {
    pub organization_id: OrganizationId,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub struct Workouts<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Workouts<'c> {
    type CreateRequest = WorkoutCreateDBRequest;
    type UpdateRequest = WorkoutUpdateDBRequest;
    type Response = WorkoutDBResponse;
    type Id = (OrganizationId, WorkoutId);
    type Filter = WorkoutFilter;

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&request.organization_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let workout = sqlx::query_as::<_, WorkoutDBResponse>(
            r#"
            INSERT INTO workouts (id, organization_id, title, description, scheduled_for, scoring, time_cap_seconds, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.organization_id)
        .bind(request.title.trim())
        .bind(&request.description)
        .bind(request.scheduled_for)
        .bind(request.scoring)
        .bind(request.time_cap_seconds)
        .bind(request.created_by)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(workout)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), workout_id = %abbrev_uuid(&id.1)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let workout = sqlx::query_as::<_, WorkoutDBResponse>("SELECT * FROM workouts WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(workout)
    }

    #[instrument(skip(self, filter), fields(org_id = %abbrev_uuid(&filter.organization_id)), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let workouts = sqlx::query_as::<_, WorkoutDBResponse>(
            r#"
            SELECT * FROM workouts
            WHERE organization_id = $1
              AND ($2::date IS NULL OR scheduled_for >= $2)
              AND ($3::date IS NULL OR scheduled_for <= $3)
            ORDER BY scheduled_for DESC, created_at DESC
            "#,
        )
        .bind(filter.organization_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(workouts)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), workout_id = %abbrev_uuid(&id.1)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workouts WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&id.0), workout_id = %abbrev_uuid(&id.1)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let workout = sqlx::query_as::<_, WorkoutDBResponse>(
            r#"
            UPDATE workouts SET
                title = COALESCE($3, title),
                description = COALESCE($4, description),
                scheduled_for = COALESCE($5, scheduled_for),
                scoring = COALESCE($6, scoring),
                time_cap_seconds = COALESCE($7, time_cap_seconds),
                updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(id.1)
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.scheduled_for)
        .bind(request.scoring)
        .bind(request.time_cap_seconds)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(workout)
    }
}

impl<'c> Workouts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

pub struct WorkoutResults<'c> {
    db: &'c mut PgConnection,
}

impl<'c> WorkoutResults<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Record a score. A member has at most one result per workout; re-submitting replaces it.
    #[instrument(skip(self, result), fields(workout_id = %abbrev_uuid(&result.workout_id), member_id = %abbrev_uuid(&result.member_id)), err)]
    pub async fn upsert(&mut self, result: &WorkoutResultUpsert) -> Result<WorkoutResultDBResponse> {
        let row = sqlx::query_as::<_, WorkoutResultDBResponse>(
            r#"
            INSERT INTO workout_results (id, organization_id, workout_id, member_id, score, rx, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (workout_id, member_id) DO UPDATE SET
                score = EXCLUDED.score,
                rx = EXCLUDED.rx,
                notes = EXCLUDED.notes,
                recorded_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(result.organization_id)
        .bind(result.workout_id)
        .bind(result.member_id)
        .bind(result.score)
        .bind(result.rx)
        .bind(&result.notes)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    /// All results for a workout with athlete names; ordering is left to the leaderboard
    #[instrument(skip(self), fields(workout_id = %abbrev_uuid(&workout_id)), err)]
    pub async fn list_for_workout(&mut self, workout_id: WorkoutId) -> Result<Vec<RankedResultDBResponse>> {
        let rows = sqlx::query_as::<_, RankedResultDBResponse>(
            r#"
            SELECT r.member_id, m.first_name, m.last_name, r.score, r.rx, r.notes
            FROM workout_results r
            JOIN members m ON m.id = r.member_id
            WHERE r.workout_id = $1
            "#,
        )
        .bind(workout_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::workouts::WorkoutScoring;
    use crate::test_utils::{create_test_member, create_test_org};
    use rust_decimal::Decimal;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_result_upsert_replaces_score(pool: PgPool) {
        let org = create_test_org(&pool, "wods").await;
        let member = create_test_member(&pool, org.id, "fran@example.com").await;
        let mut conn = pool.acquire().await.unwrap();

        let workout = Workouts::new(&mut conn)
            .create(&WorkoutCreateDBRequest {
                organization_id: org.id,
                title: "Fran".to_string(),
                description: Some("21-15-9 thrusters and pull-ups".to_string()),
                scheduled_for: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                scoring: WorkoutScoring::Time,
                time_cap_seconds: Some(600),
                created_by: None,
            })
            .await
            .unwrap();

        let mut upsert = WorkoutResultUpsert {
            organization_id: org.id,
            workout_id: workout.id,
            member_id: member.id,
            score: Decimal::new(245, 0),
            rx: true,
            notes: None,
        };
        let first = WorkoutResults::new(&mut conn).upsert(&upsert).await.unwrap();
        upsert.score = Decimal::new(231, 0);
        let second = WorkoutResults::new(&mut conn).upsert(&upsert).await.unwrap();
        assert_eq!(first.id, second.id);

        let rows = WorkoutResults::new(&mut conn).list_for_workout(workout.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, Decimal::new(231, 0));
        assert_eq!(rows[0].first_name, member.first_name);
    }
}
