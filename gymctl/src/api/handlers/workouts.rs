use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rust_decimal::Decimal;

use crate::{
    AppState,
    api::models::{
        organizations::OrgRole,
        users::CurrentUser,
        workouts::{
            LeaderboardResponse, ListWorkoutsQuery, WorkoutCreate, WorkoutResponse, WorkoutResultCreate, WorkoutResultResponse,
            WorkoutUpdate,
        },
    },
    auth::permissions::{authorize, resolve_member},
    db::{
        handlers::{AuditLogs, Repository, WorkoutResults, Workouts, workouts::WorkoutFilter},
        models::{
            audit_logs::AuditLogCreateDBRequest,
            workouts::{WorkoutCreateDBRequest, WorkoutResultUpsert, WorkoutUpdateDBRequest},
        },
    },
    errors::Error,
    leaderboard,
    types::{Operation, OrganizationId, Resource, WorkoutId},
};

fn workout_not_found(id: WorkoutId) -> Error {
    Error::NotFound {
        resource: "Workout".to_string(),
        id: id.to_string(),
    }
}

fn validate_workout(title: Option<&str>, time_cap_seconds: Option<i32>) -> Result<(), Error> {
    let mut errors = Vec::new();
    if title.is_some_and(|t| t.trim().is_empty()) {
        errors.push("title must not be empty".to_string());
    }
    if time_cap_seconds.is_some_and(|cap| cap <= 0) {
        errors.push("time_cap_seconds must be positive".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation {
            message: "Invalid workout".to_string(),
            errors,
        })
    }
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/workouts",
    tag = "workouts",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID"), ListWorkoutsQuery),
    responses((status = 200, description = "Workouts, newest first", body = [WorkoutResponse])),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_workouts(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    Query(query): Query<ListWorkoutsQuery>,
    current_user: CurrentUser,
) -> Result<Json<Vec<WorkoutResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Member, Operation::Read, Resource::Workouts).await?;

    let workouts = Workouts::new(&mut conn)
        .list(&WorkoutFilter {
            organization_id: org_id,
            from: query.from,
            to: query.to,
        })
        .await?;
    Ok(Json(workouts.into_iter().map(WorkoutResponse::from).collect()))
}

/// Publish a workout of the day (coach)
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/workouts",
    tag = "workouts",
    request_body = WorkoutCreate,
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 201, description = "Workout created", body = WorkoutResponse),
        (status = 400, description = "Invalid workout"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_workout(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    Json(create): Json<WorkoutCreate>,
) -> Result<(StatusCode, Json<WorkoutResponse>), Error> {
    validate_workout(Some(&create.title), create.time_cap_seconds)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Coach, Operation::Create, Resource::Workouts).await?;

    let workout = Workouts::new(&mut tx)
        .create(&WorkoutCreateDBRequest {
            organization_id: org_id,
            title: create.title,
            description: create.description,
            scheduled_for: create.scheduled_for,
            scoring: create.scoring,
            time_cap_seconds: create.time_cap_seconds,
            created_by: Some(current_user.id),
        })
        .await?;
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "workout.created", "workout").entity(workout.id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok((StatusCode::CREATED, Json(workout.into())))
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/workouts/{id}",
    tag = "workouts",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workout ID"),
    ),
    responses(
        (status = 200, description = "Workout", body = WorkoutResponse),
        (status = 404, description = "Workout not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_workout(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkoutId)>,
    current_user: CurrentUser,
) -> Result<Json<WorkoutResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Member, Operation::Read, Resource::Workouts).await?;

    let workout = Workouts::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| workout_not_found(id))?;
    Ok(Json(workout.into()))
}

#[utoipa::path(
    patch,
    path = "/organizations/{org_id}/workouts/{id}",
    tag = "workouts",
    request_body = WorkoutUpdate,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workout ID"),
    ),
    responses(
        (status = 200, description = "Updated workout", body = WorkoutResponse),
        (status = 404, description = "Workout not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_workout(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkoutId)>,
    current_user: CurrentUser,
    Json(update): Json<WorkoutUpdate>,
) -> Result<Json<WorkoutResponse>, Error> {
    validate_workout(update.title.as_deref(), update.time_cap_seconds)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Coach, Operation::Update, Resource::Workouts).await?;

    let workout = Workouts::new(&mut tx)
        .update(
            (org_id, id),
            &WorkoutUpdateDBRequest {
                title: update.title,
                description: update.description,
                scheduled_for: update.scheduled_for,
                scoring: update.scoring,
                time_cap_seconds: update.time_cap_seconds,
            },
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(workout.into()))
}

/// Delete a workout together with its results
#[utoipa::path(
    delete,
    path = "/organizations/{org_id}/workouts/{id}",
    tag = "workouts",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workout ID"),
    ),
    responses(
        (status = 204, description = "Workout deleted"),
        (status = 404, description = "Workout not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_workout(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkoutId)>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Coach, Operation::Delete, Resource::Workouts).await?;

    if !Workouts::new(&mut tx).delete((org_id, id)).await? {
        return Err(workout_not_found(id));
    }
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "workout.deleted", "workout").entity(id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Record a score. Submitting again replaces the member's previous result.
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/workouts/{id}/results",
    tag = "workouts",
    request_body = WorkoutResultCreate,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workout ID"),
    ),
    responses(
        (status = 200, description = "Recorded result", body = WorkoutResultResponse),
        (status = 400, description = "Negative score"),
        (status = 404, description = "Workout not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn record_result(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkoutId)>,
    current_user: CurrentUser,
    Json(request): Json<WorkoutResultCreate>,
) -> Result<Json<WorkoutResultResponse>, Error> {
    if request.score < Decimal::ZERO {
        return Err(Error::BadRequest {
            message: "score must not be negative".to_string(),
        });
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let access = authorize(&mut tx, &current_user, org_id, OrgRole::Member, Operation::Create, Resource::WorkoutResults).await?;
    Workouts::new(&mut tx).get_by_id((org_id, id)).await?.ok_or_else(|| workout_not_found(id))?;
    let member_id = resolve_member(&mut tx, &current_user, &access, request.member_id, Operation::Create, Resource::WorkoutResults).await?;

    let result = WorkoutResults::new(&mut tx)
        .upsert(&WorkoutResultUpsert {
            organization_id: org_id,
            workout_id: id,
            member_id,
            score: request.score,
            rx: request.rx,
            notes: request.notes,
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(result.into()))
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/workouts/{id}/leaderboard",
    tag = "workouts",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workout ID"),
    ),
    responses(
        (status = 200, description = "Ranked results", body = LeaderboardResponse),
        (status = 404, description = "Workout not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkoutId)>,
    current_user: CurrentUser,
) -> Result<Json<LeaderboardResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Member, Operation::Read, Resource::WorkoutResults).await?;

    let workout = Workouts::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| workout_not_found(id))?;
    let results = WorkoutResults::new(&mut conn).list_for_workout(id).await?;

    Ok(Json(LeaderboardResponse {
        entries: leaderboard::rank(workout.scoring, results),
        workout: workout.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{auth_header, create_test_app, create_test_athlete, create_test_member, create_test_org, create_test_user};
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_scores_and_leaderboard(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "wod").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let (fast, fast_member) = create_test_athlete(&pool, org.id, "fast@example.com").await;
        let (slow, _) = create_test_athlete(&pool, org.id, "slow@example.com").await;
        let scaled = create_test_member(&pool, org.id, "scaled@example.com").await;
        let (ch, cv) = auth_header(&coach);

        let response = server
            .post(&format!("/api/v1/organizations/{}/workouts", org.id))
            .add_header(ch.clone(), cv.clone())
            .json(&json!({ "title": "Fran", "scheduled_for": "2026-03-02", "scoring": "time", "time_cap_seconds": 600 }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let workout: WorkoutResponse = response.json();
        let results = format!("/api/v1/organizations/{}/workouts/{}/results", org.id, workout.id);

        let (fh, fv) = auth_header(&fast);
        let (sh, sv) = auth_header(&slow);
        server.post(&results).add_header(fh.clone(), fv.clone()).json(&json!({ "score": "400" })).await.assert_status_ok();
        // Re-submitting replaces the earlier score
        server.post(&results).add_header(fh.clone(), fv.clone()).json(&json!({ "score": "185" })).await.assert_status_ok();
        server.post(&results).add_header(sh.clone(), sv.clone()).json(&json!({ "score": "300" })).await.assert_status_ok();
        server
            .post(&results)
            .add_header(ch.clone(), cv.clone())
            .json(&json!({ "member_id": scaled.id, "score": "120", "rx": false }))
            .await
            .assert_status_ok();

        // Athletes cannot record for someone else
        server
            .post(&results)
            .add_header(sh, sv)
            .json(&json!({ "member_id": fast_member.id, "score": "1" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let board: LeaderboardResponse = server
            .get(&format!("/api/v1/organizations/{}/workouts/{}/leaderboard", org.id, workout.id))
            .add_header(fh, fv)
            .await
            .json();
        let order: Vec<_> = board.entries.iter().map(|e| (e.rank, e.first_name.as_str())).collect();
        assert_eq!(order, vec![(1, "fast"), (2, "slow"), (3, "scaled")]);
        assert_eq!(board.entries[0].score, Decimal::new(185, 0));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_workout_management_requires_coach(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "wod-roles").await;
        let (athlete, _) = create_test_athlete(&pool, org.id, "athlete@example.com").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let base = format!("/api/v1/organizations/{}/workouts", org.id);
        let body = json!({ "title": "Grace", "scheduled_for": "2026-03-03", "scoring": "time" });

        let (ah, av) = auth_header(&athlete);
        server.post(&base).add_header(ah.clone(), av.clone()).json(&body).await.assert_status(StatusCode::FORBIDDEN);

        let (ch, cv) = auth_header(&coach);
        let workout: WorkoutResponse = server.post(&base).add_header(ch.clone(), cv.clone()).json(&body).await.json();

        let updated: WorkoutResponse = server
            .patch(&format!("{base}/{}", workout.id))
            .add_header(ch.clone(), cv.clone())
            .json(&json!({ "title": "Grace (scaled)" }))
            .await
            .json();
        assert_eq!(updated.title, "Grace (scaled)");

        let listed: Vec<WorkoutResponse> = server.get(&base).add_header(ah, av).await.json();
        assert_eq!(listed.len(), 1);

        server
            .delete(&format!("{base}/{}", workout.id))
            .add_header(ch.clone(), cv.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server.get(&format!("{base}/{}", workout.id)).add_header(ch, cv).await.assert_status_not_found();
    }
}
