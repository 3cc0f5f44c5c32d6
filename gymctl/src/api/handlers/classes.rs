use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    AppState,
    api::models::{
        classes::{
            AttendanceRequest, BookingCreate, BookingResponse, CancelBookingResponse, ClassCreate, ClassResponse, ClassUpdate,
            ListClassesQuery, RosterEntry,
        },
        organizations::OrgRole,
        users::CurrentUser,
    },
    auth::permissions::{authorize, resolve_member},
    db::{
        handlers::{AuditLogs, Bookings, Classes, Repository, classes::ClassFilter},
        models::{
            audit_logs::AuditLogCreateDBRequest,
            classes::{ClassCreateDBRequest, ClassUpdateDBRequest},
        },
    },
    errors::Error,
    scheduling,
    types::{BookingId, ClassId, Operation, OrganizationId, Resource},
};

fn class_not_found(id: ClassId) -> Error {
    Error::NotFound {
        resource: "Class".to_string(),
        id: id.to_string(),
    }
}

/// The class schedule, ordered by start time
#[utoipa::path(
    get,
    path = "/organizations/{org_id}/classes",
    tag = "classes",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID"), ListClassesQuery),
    responses((status = 200, description = "Classes", body = [ClassResponse])),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_classes(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    Query(query): Query<ListClassesQuery>,
    current_user: CurrentUser,
) -> Result<Json<Vec<ClassResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Member, Operation::Read, Resource::Classes).await?;

    let classes = Classes::new(&mut conn)
        .list(&ClassFilter {
            organization_id: org_id,
            from: query.from,
            to: query.to,
            include_cancelled: query.include_cancelled,
        })
        .await?;
    Ok(Json(classes.into_iter().map(ClassResponse::from).collect()))
}

/// Schedule a class (coach)
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/classes",
    tag = "classes",
    request_body = ClassCreate,
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 201, description = "Class scheduled", body = ClassResponse),
        (status = 400, description = "Invalid times or capacity"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_class(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    Json(create): Json<ClassCreate>,
) -> Result<(StatusCode, Json<ClassResponse>), Error> {
    let mut errors = Vec::new();
    if create.name.trim().is_empty() {
        errors.push("name must not be empty".to_string());
    }
    if create.capacity <= 0 {
        errors.push("capacity must be positive".to_string());
    }
    if create.ends_at <= create.starts_at {
        errors.push("ends_at must be after starts_at".to_string());
    }
    if !errors.is_empty() {
        return Err(Error::Validation {
            message: "Invalid class".to_string(),
            errors,
        });
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Coach, Operation::Create, Resource::Classes).await?;

    let class = Classes::new(&mut tx)
        .create(&ClassCreateDBRequest {
            organization_id: org_id,
            name: create.name,
            description: create.description,
            coach_id: create.coach_id,
            location: create.location,
            starts_at: create.starts_at,
            ends_at: create.ends_at,
            capacity: create.capacity,
        })
        .await?;
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "class.created", "class").entity(class.id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok((StatusCode::CREATED, Json(class.into())))
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/classes/{id}",
    tag = "classes",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Class ID"),
    ),
    responses(
        (status = 200, description = "Class", body = ClassResponse),
        (status = 404, description = "Class not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_class(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, ClassId)>,
    current_user: CurrentUser,
) -> Result<Json<ClassResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Member, Operation::Read, Resource::Classes).await?;

    let class = Classes::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| class_not_found(id))?;
    Ok(Json(class.into()))
}

#[utoipa::path(
    patch,
    path = "/organizations/{org_id}/classes/{id}",
    tag = "classes",
    request_body = ClassUpdate,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Class ID"),
    ),
    responses(
        (status = 200, description = "Updated class", body = ClassResponse),
        (status = 400, description = "Invalid times or capacity"),
        (status = 404, description = "Class not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_class(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, ClassId)>,
    current_user: CurrentUser,
    Json(update): Json<ClassUpdate>,
) -> Result<Json<ClassResponse>, Error> {
    if update.capacity.is_some_and(|c| c <= 0) {
        return Err(Error::BadRequest {
            message: "capacity must be positive".to_string(),
        });
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Coach, Operation::Update, Resource::Classes).await?;

    let current = Classes::new(&mut tx).get_by_id((org_id, id)).await?.ok_or_else(|| class_not_found(id))?;
    if current.is_cancelled() {
        return Err(Error::BadRequest {
            message: "A cancelled class cannot be edited".to_string(),
        });
    }
    let starts_at = update.starts_at.unwrap_or(current.starts_at);
    let ends_at = update.ends_at.unwrap_or(current.ends_at);
    if ends_at <= starts_at {
        return Err(Error::BadRequest {
            message: "ends_at must be after starts_at".to_string(),
        });
    }

    let class = Classes::new(&mut tx)
        .update(
            (org_id, id),
            &ClassUpdateDBRequest {
                name: update.name,
                description: update.description,
                coach_id: update.coach_id,
                location: update.location,
                starts_at: update.starts_at,
                ends_at: update.ends_at,
                capacity: update.capacity,
            },
        )
        .await?;
    let class = if update.capacity.is_some() && !scheduling::fill_open_seats(&mut tx, org_id, id).await?.is_empty() {
        Classes::new(&mut tx).get_by_id((org_id, id)).await?.ok_or_else(|| class_not_found(id))?
    } else {
        class
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(class.into()))
}

/// Cancel a class (coach). The class and its bookings are kept for the record.
#[utoipa::path(
    delete,
    path = "/organizations/{org_id}/classes/{id}",
    tag = "classes",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Class ID"),
    ),
    responses(
        (status = 200, description = "Cancelled class", body = ClassResponse),
        (status = 404, description = "Class not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn cancel_class(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, ClassId)>,
    current_user: CurrentUser,
) -> Result<Json<ClassResponse>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Coach, Operation::Delete, Resource::Classes).await?;

    let class = Classes::new(&mut tx).cancel(org_id, id).await?;
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "class.cancelled", "class").entity(id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(class.into()))
}

/// Class roster (coach)
#[utoipa::path(
    get,
    path = "/organizations/{org_id}/classes/{id}/bookings",
    tag = "bookings",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Class ID"),
    ),
    responses((status = 200, description = "Roster", body = [RosterEntry])),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_bookings(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, ClassId)>,
    current_user: CurrentUser,
) -> Result<Json<Vec<RosterEntry>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Coach, Operation::Read, Resource::Bookings).await?;

    Classes::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| class_not_found(id))?;
    let roster = Bookings::new(&mut conn).roster(id).await?;
    Ok(Json(roster.into_iter().map(RosterEntry::from).collect()))
}

/// Book a member into a class, or onto its waitlist when full
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/classes/{id}/bookings",
    tag = "bookings",
    request_body = BookingCreate,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Class ID"),
    ),
    responses(
        (status = 201, description = "Booked or waitlisted", body = BookingResponse),
        (status = 400, description = "Class cancelled or already started"),
        (status = 409, description = "Member already booked"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_booking(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, ClassId)>,
    current_user: CurrentUser,
    Json(request): Json<BookingCreate>,
) -> Result<(StatusCode, Json<BookingResponse>), Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let access = authorize(&mut tx, &current_user, org_id, OrgRole::Member, Operation::Create, Resource::Bookings).await?;
    let member_id = resolve_member(&mut tx, &current_user, &access, request.member_id, Operation::Create, Resource::Bookings).await?;

    let booking = scheduling::book(&mut tx, org_id, id, member_id, Utc::now()).await?;
    AuditLogs::new(&mut tx)
        .record(
            &AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "booking.created", "booking")
                .entity(booking.id)
                .metadata(json!({ "class_id": id, "member_id": member_id, "status": booking.status })),
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok((StatusCode::CREATED, Json(booking.into())))
}

/// Cancel a booking. A freed seat goes to the oldest waitlisted booking.
#[utoipa::path(
    delete,
    path = "/organizations/{org_id}/classes/{id}/bookings/{booking_id}",
    tag = "bookings",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Class ID"),
        ("booking_id" = uuid::Uuid, Path, description = "Booking ID"),
    ),
    responses(
        (status = 200, description = "Cancelled booking and any promotion", body = CancelBookingResponse),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Booking already cancelled"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path((org_id, id, booking_id)): Path<(OrganizationId, ClassId, BookingId)>,
    current_user: CurrentUser,
) -> Result<Json<CancelBookingResponse>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let access = authorize(&mut tx, &current_user, org_id, OrgRole::Member, Operation::Delete, Resource::Bookings).await?;

    let existing = Bookings::new(&mut tx)
        .get(org_id, booking_id)
        .await?
        .filter(|b| b.class_id == id)
        .ok_or_else(|| Error::NotFound {
            resource: "Booking".to_string(),
            id: booking_id.to_string(),
        })?;
    resolve_member(&mut tx, &current_user, &access, Some(existing.member_id), Operation::Delete, Resource::Bookings).await?;

    let cancellation = scheduling::cancel(&mut tx, org_id, booking_id).await?;
    AuditLogs::new(&mut tx)
        .record(
            &AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "booking.cancelled", "booking")
                .entity(booking_id)
                .metadata(json!({ "promoted": cancellation.promoted.as_ref().map(|p| p.id) })),
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(CancelBookingResponse {
        booking: cancellation.booking.into(),
        promoted: cancellation.promoted.map(BookingResponse::from),
    }))
}

/// Mark a booking attended or no-show (coach)
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/classes/{id}/bookings/{booking_id}/attendance",
    tag = "bookings",
    request_body = AttendanceRequest,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Class ID"),
        ("booking_id" = uuid::Uuid, Path, description = "Booking ID"),
    ),
    responses(
        (status = 200, description = "Updated booking", body = BookingResponse),
        (status = 400, description = "Booking is waitlisted or cancelled"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn mark_attendance(
    State(state): State<AppState>,
    Path((org_id, id, booking_id)): Path<(OrganizationId, ClassId, BookingId)>,
    current_user: CurrentUser,
    Json(request): Json<AttendanceRequest>,
) -> Result<Json<BookingResponse>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Coach, Operation::Update, Resource::Bookings).await?;

    let belongs_to_class = Bookings::new(&mut tx).get(org_id, booking_id).await?.is_some_and(|b| b.class_id == id);
    if !belongs_to_class {
        return Err(Error::NotFound {
            resource: "Booking".to_string(),
            id: booking_id.to_string(),
        });
    }
    let booking = scheduling::mark_attendance(&mut tx, org_id, booking_id, request.attended).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(booking.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::classes::BookingStatus;
    use crate::test_utils::{auth_header, create_test_app, create_test_athlete, create_test_member, create_test_org, create_test_user};
    use chrono::Duration;
    use sqlx::PgPool;

    async fn schedule(server: &axum_test::TestServer, org_id: OrganizationId, coach: &CurrentUser, capacity: i32) -> ClassResponse {
        let (name, value) = auth_header(coach);
        let starts_at = Utc::now() + Duration::days(1);
        let response = server
            .post(&format!("/api/v1/organizations/{org_id}/classes"))
            .add_header(name, value)
            .json(&json!({
                "name": "WOD 6am",
                "starts_at": starts_at,
                "ends_at": starts_at + Duration::hours(1),
                "capacity": capacity,
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_booking_flow_with_waitlist(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "bookings").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let (first, _) = create_test_athlete(&pool, org.id, "first@example.com").await;
        let (second, _) = create_test_athlete(&pool, org.id, "second@example.com").await;
        let class = schedule(&server, org.id, &coach, 1).await;
        let bookings = format!("/api/v1/organizations/{}/classes/{}/bookings", org.id, class.id);

        let (h1, v1) = auth_header(&first);
        let (h2, v2) = auth_header(&second);

        let booked: BookingResponse = server.post(&bookings).add_header(h1.clone(), v1.clone()).json(&json!({})).await.json();
        assert_eq!(booked.status, BookingStatus::Booked);

        let waiting: BookingResponse = server.post(&bookings).add_header(h2.clone(), v2.clone()).json(&json!({})).await.json();
        assert_eq!(waiting.status, BookingStatus::Waitlisted);

        server
            .post(&bookings)
            .add_header(h1.clone(), v1.clone())
            .json(&json!({}))
            .await
            .assert_status(StatusCode::CONFLICT);

        // The second athlete cannot cancel someone else's booking
        server
            .delete(&format!("{bookings}/{}", booked.id))
            .add_header(h2, v2)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let response = server.delete(&format!("{bookings}/{}", booked.id)).add_header(h1, v1).await;
        response.assert_status_ok();
        let cancelled: CancelBookingResponse = response.json();
        assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.promoted.map(|p| p.id), Some(waiting.id));

        let (ch, cv) = auth_header(&coach);
        let roster: Vec<RosterEntry> = server.get(&bookings).add_header(ch.clone(), cv.clone()).await.json();
        assert_eq!(roster.len(), 2);

        let response = server
            .post(&format!("{bookings}/{}/attendance", waiting.id))
            .add_header(ch, cv)
            .json(&json!({ "attended": true }))
            .await;
        response.assert_status_ok();
        let marked: BookingResponse = response.json();
        assert_eq!(marked.status, BookingStatus::Attended);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_staff_book_on_behalf_and_cancelled_class(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "staff-book").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let member = create_test_member(&pool, org.id, "walkin@example.com").await;
        let class = schedule(&server, org.id, &coach, 10).await;
        let (ch, cv) = auth_header(&coach);
        let class_path = format!("/api/v1/organizations/{}/classes/{}", org.id, class.id);

        // Staff without a member record of their own must name the member
        server
            .post(&format!("{class_path}/bookings"))
            .add_header(ch.clone(), cv.clone())
            .json(&json!({}))
            .await
            .assert_status_bad_request();

        server
            .post(&format!("{class_path}/bookings"))
            .add_header(ch.clone(), cv.clone())
            .json(&json!({ "member_id": member.id }))
            .await
            .assert_status(StatusCode::CREATED);

        let cancelled: ClassResponse = server.delete(&class_path).add_header(ch.clone(), cv.clone()).await.json();
        assert!(cancelled.cancelled_at.is_some());

        let other = create_test_member(&pool, org.id, "late@example.com").await;
        server
            .post(&format!("{class_path}/bookings"))
            .add_header(ch.clone(), cv.clone())
            .json(&json!({ "member_id": other.id }))
            .await
            .assert_status_bad_request();

        let listed: Vec<ClassResponse> = server
            .get(&format!("/api/v1/organizations/{}/classes", org.id))
            .add_header(ch, cv)
            .await
            .json();
        assert!(listed.is_empty(), "cancelled classes are hidden by default");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_capacity_change_moves_waitlist(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "capacity-change").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let class = schedule(&server, org.id, &coach, 1).await;
        let (ch, cv) = auth_header(&coach);
        let class_path = format!("/api/v1/organizations/{}/classes/{}", org.id, class.id);

        let mut bookings = Vec::new();
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            let member = create_test_member(&pool, org.id, email).await;
            let booking: BookingResponse = server
                .post(&format!("{class_path}/bookings"))
                .add_header(ch.clone(), cv.clone())
                .json(&json!({ "member_id": member.id }))
                .await
                .json();
            bookings.push(booking);
        }
        assert_eq!(bookings[2].status, BookingStatus::Waitlisted);

        let response = server
            .patch(&class_path)
            .add_header(ch.clone(), cv.clone())
            .json(&json!({ "capacity": 2 }))
            .await;
        response.assert_status_ok();
        let updated: ClassResponse = response.json();
        assert_eq!(updated.capacity, 2);
        assert_eq!(updated.booked_count, 2);

        // Shrink below the booked count, then cancel: the class stays full, nobody is promoted
        server
            .patch(&class_path)
            .add_header(ch.clone(), cv.clone())
            .json(&json!({ "capacity": 1 }))
            .await
            .assert_status_ok();
        let cancelled: CancelBookingResponse = server
            .delete(&format!("{class_path}/bookings/{}", bookings[0].id))
            .add_header(ch.clone(), cv.clone())
            .await
            .json();
        assert!(cancelled.promoted.is_none());

        let class: ClassResponse = server.get(&class_path).add_header(ch, cv).await.json();
        assert_eq!(class.booked_count, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_class_validation(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "class-validation").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let (name, value) = auth_header(&coach);
        let starts_at = Utc::now() + Duration::days(1);

        let response = server
            .post(&format!("/api/v1/organizations/{}/classes", org.id))
            .add_header(name, value)
            .json(&json!({ "name": "Backwards", "starts_at": starts_at, "ends_at": starts_at - Duration::hours(1), "capacity": 0 }))
            .await;
        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }
}
