//! Booking rules for classes: capacity, waitlist, reactivation and promotion.
//!
//! Every function expects to run inside a transaction. [`book`] locks the class row with
//! `FOR UPDATE` before counting seats, so concurrent bookings for the same class serialize and
//! capacity is never exceeded.

use crate::api::models::classes::BookingStatus;
use crate::db::handlers::{Bookings, Classes};
use crate::db::models::classes::BookingDBResponse;
use crate::errors::{Error, Result};
use crate::types::{BookingId, ClassId, MemberId, OrganizationId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::{info, instrument};

/// Outcome of cancelling a booking
#[derive(Debug)]
pub struct Cancellation {
    pub booking: BookingDBResponse,
    pub promoted: Option<BookingDBResponse>,
}

/// Book a member into a class, or put them on the waitlist when it is full.
#[instrument(skip(conn), fields(class_id = %abbrev_uuid(&class_id), member_id = %abbrev_uuid(&member_id)), err)]
pub async fn book(
    conn: &mut PgConnection,
    org_id: OrganizationId,
    class_id: ClassId,
    member_id: MemberId,
    now: DateTime<Utc>,
) -> Result<BookingDBResponse> {
    let class = Classes::new(conn).lock(org_id, class_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Class".to_string(),
        id: class_id.to_string(),
    })?;

    if class.is_cancelled() {
        return Err(Error::BadRequest {
            message: "This class has been cancelled".to_string(),
        });
    }
    if class.starts_at <= now {
        return Err(Error::BadRequest {
            message: "This class has already started".to_string(),
        });
    }

    let status = if class.booked_count < i64::from(class.capacity) {
        BookingStatus::Booked
    } else {
        BookingStatus::Waitlisted
    };

    let mut bookings = Bookings::new(conn);
    let booking = match bookings.get_for_member(class_id, member_id).await? {
        Some(existing) if existing.status == BookingStatus::Cancelled => bookings.set_status(existing.id, status).await?,
        Some(_) => {
            return Err(Error::Conflict {
                message: "This member is already booked into the class".to_string(),
            });
        }
        None => bookings.insert(org_id, class_id, member_id, status).await?,
    };

    info!(status = ?booking.status, "Booking recorded");
    Ok(booking)
}

/// Cancel a booking. Freeing a seat promotes the oldest waitlisted booking.
#[instrument(skip(conn), fields(booking_id = %abbrev_uuid(&booking_id)), err)]
pub async fn cancel(conn: &mut PgConnection, org_id: OrganizationId, booking_id: BookingId) -> Result<Cancellation> {
    let existing = Bookings::new(conn).get(org_id, booking_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Booking".to_string(),
        id: booking_id.to_string(),
    })?;

    // Lock the class first so promotion cannot race a new booking for the freed seat
    Classes::new(conn).lock(org_id, existing.class_id).await?;

    let mut bookings = Bookings::new(conn);
    match existing.status {
        BookingStatus::Booked | BookingStatus::Waitlisted => {}
        BookingStatus::Cancelled => {
            return Err(Error::Conflict {
                message: "This booking is already cancelled".to_string(),
            });
        }
        BookingStatus::Attended | BookingStatus::NoShow => {
            return Err(Error::BadRequest {
                message: "Attendance has already been recorded for this booking".to_string(),
            });
        }
    }

    let booking = bookings.set_status(booking_id, BookingStatus::Cancelled).await?;
    let promoted = if existing.status == BookingStatus::Booked {
        promote_into_free_seat(conn, org_id, existing.class_id).await?
    } else {
        None
    };
    Ok(Cancellation { booking, promoted })
}

/// Promote waitlisted bookings until the class is full or the waitlist is empty.
///
/// Called after a capacity change; lowering capacity never demotes anyone already booked.
#[instrument(skip(conn), fields(class_id = %abbrev_uuid(&class_id)), err)]
pub async fn fill_open_seats(conn: &mut PgConnection, org_id: OrganizationId, class_id: ClassId) -> Result<Vec<BookingDBResponse>> {
    let mut promoted = Vec::new();
    while let Some(booking) = promote_into_free_seat(conn, org_id, class_id).await? {
        promoted.push(booking);
    }
    Ok(promoted)
}

/// Promote the oldest waitlisted booking if the locked class has a seat free
async fn promote_into_free_seat(conn: &mut PgConnection, org_id: OrganizationId, class_id: ClassId) -> Result<Option<BookingDBResponse>> {
    let Some(class) = Classes::new(conn).lock(org_id, class_id).await? else {
        return Ok(None);
    };
    if class.is_cancelled() || class.booked_count >= i64::from(class.capacity) {
        return Ok(None);
    }

    let promoted = Bookings::new(conn).promote_next(class_id).await?;
    if let Some(p) = &promoted {
        info!(promoted_booking = %abbrev_uuid(&p.id), "Promoted booking from waitlist");
    }
    Ok(promoted)
}

/// Record whether a booked member turned up. Already-marked bookings may be corrected.
#[instrument(skip(conn), fields(booking_id = %abbrev_uuid(&booking_id), attended), err)]
pub async fn mark_attendance(
    conn: &mut PgConnection,
    org_id: OrganizationId,
    booking_id: BookingId,
    attended: bool,
) -> Result<BookingDBResponse> {
    let mut bookings = Bookings::new(conn);
    let existing = bookings.get(org_id, booking_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Booking".to_string(),
        id: booking_id.to_string(),
    })?;

    match existing.status {
        BookingStatus::Booked | BookingStatus::Attended | BookingStatus::NoShow => {}
        BookingStatus::Waitlisted | BookingStatus::Cancelled => {
            return Err(Error::BadRequest {
                message: "Only booked members can be marked for attendance".to_string(),
            });
        }
    }

    let status = if attended { BookingStatus::Attended } else { BookingStatus::NoShow };
    Ok(bookings.set_status(booking_id, status).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{Members, Repository};
    use crate::db::models::classes::{ClassCreateDBRequest, ClassUpdateDBRequest};
    use crate::test_utils::{create_test_member, create_test_org};
    use chrono::Duration;
    use sqlx::PgPool;

    async fn create_class(pool: &PgPool, org_id: OrganizationId, capacity: i32, starts_in: Duration) -> ClassId {
        let mut conn = pool.acquire().await.unwrap();
        let starts_at = Utc::now() + starts_in;
        Classes::new(&mut conn)
            .create(&ClassCreateDBRequest {
                organization_id: org_id,
                name: "WOD".to_string(),
                description: None,
                coach_id: None,
                location: Some("Main floor".to_string()),
                starts_at,
                ends_at: starts_at + Duration::hours(1),
                capacity,
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_capacity_then_waitlist(pool: PgPool) {
        let org = create_test_org(&pool, "capacity").await;
        let class_id = create_class(&pool, org.id, 1, Duration::hours(3)).await;
        let a = create_test_member(&pool, org.id, "a@example.com").await;
        let b = create_test_member(&pool, org.id, "b@example.com").await;

        let mut tx = pool.begin().await.unwrap();
        let first = book(&mut tx, org.id, class_id, a.id, Utc::now()).await.unwrap();
        let second = book(&mut tx, org.id, class_id, b.id, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.status, BookingStatus::Booked);
        assert_eq!(second.status, BookingStatus::Waitlisted);

        let mut conn = pool.acquire().await.unwrap();
        let err = book(&mut conn, org.id, class_id, a.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancel_promotes_oldest_waitlisted(pool: PgPool) {
        let org = create_test_org(&pool, "promote").await;
        let class_id = create_class(&pool, org.id, 1, Duration::hours(3)).await;
        let a = create_test_member(&pool, org.id, "a@example.com").await;
        let b = create_test_member(&pool, org.id, "b@example.com").await;
        let c = create_test_member(&pool, org.id, "c@example.com").await;

        let mut conn = pool.acquire().await.unwrap();
        let booked = book(&mut conn, org.id, class_id, a.id, Utc::now()).await.unwrap();
        let waiting_b = book(&mut conn, org.id, class_id, b.id, Utc::now()).await.unwrap();
        book(&mut conn, org.id, class_id, c.id, Utc::now()).await.unwrap();

        let cancellation = cancel(&mut conn, org.id, booked.id).await.unwrap();
        assert_eq!(cancellation.booking.status, BookingStatus::Cancelled);
        let promoted = cancellation.promoted.unwrap();
        assert_eq!(promoted.id, waiting_b.id);
        assert_eq!(promoted.status, BookingStatus::Booked);

        // Cancelling from the waitlist frees no seat
        let roster = Bookings::new(&mut conn).roster(class_id).await.unwrap();
        let waiting_c = roster.iter().find(|r| r.booking.member_id == c.id).unwrap();
        let cancellation = cancel(&mut conn, org.id, waiting_c.booking.id).await.unwrap();
        assert!(cancellation.promoted.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancel_into_overfull_class_does_not_promote(pool: PgPool) {
        let org = create_test_org(&pool, "overfull").await;
        let class_id = create_class(&pool, org.id, 2, Duration::hours(3)).await;
        let a = create_test_member(&pool, org.id, "a@example.com").await;
        let b = create_test_member(&pool, org.id, "b@example.com").await;
        let c = create_test_member(&pool, org.id, "c@example.com").await;

        let mut conn = pool.acquire().await.unwrap();
        let booked_a = book(&mut conn, org.id, class_id, a.id, Utc::now()).await.unwrap();
        book(&mut conn, org.id, class_id, b.id, Utc::now()).await.unwrap();
        let waiting = book(&mut conn, org.id, class_id, c.id, Utc::now()).await.unwrap();
        assert_eq!(waiting.status, BookingStatus::Waitlisted);

        // Two booked into a class now sized for one: cancelling one leaves it full
        Classes::new(&mut conn)
            .update((org.id, class_id), &ClassUpdateDBRequest { capacity: Some(1), ..Default::default() })
            .await
            .unwrap();
        let cancellation = cancel(&mut conn, org.id, booked_a.id).await.unwrap();
        assert!(cancellation.promoted.is_none());

        let class = Classes::new(&mut conn).get_by_id((org.id, class_id)).await.unwrap().unwrap();
        assert_eq!(class.booked_count, 1);
        let still_waiting = Bookings::new(&mut conn).get(org.id, waiting.id).await.unwrap().unwrap();
        assert_eq!(still_waiting.status, BookingStatus::Waitlisted);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_fill_open_seats_after_capacity_raise(pool: PgPool) {
        let org = create_test_org(&pool, "raise").await;
        let class_id = create_class(&pool, org.id, 1, Duration::hours(3)).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut waitlist = Vec::new();
        for email in ["a@example.com", "b@example.com", "c@example.com", "d@example.com"] {
            let member = create_test_member(&pool, org.id, email).await;
            let booking = book(&mut conn, org.id, class_id, member.id, Utc::now()).await.unwrap();
            if booking.status == BookingStatus::Waitlisted {
                waitlist.push(booking.id);
            }
        }
        assert_eq!(waitlist.len(), 3);

        // Still full: nothing moves
        assert!(fill_open_seats(&mut conn, org.id, class_id).await.unwrap().is_empty());

        Classes::new(&mut conn)
            .update((org.id, class_id), &ClassUpdateDBRequest { capacity: Some(3), ..Default::default() })
            .await
            .unwrap();
        let promoted = fill_open_seats(&mut conn, org.id, class_id).await.unwrap();
        let promoted_ids: Vec<_> = promoted.iter().map(|b| b.id).collect();
        assert_eq!(promoted_ids, waitlist[..2]);

        let class = Classes::new(&mut conn).get_by_id((org.id, class_id)).await.unwrap().unwrap();
        assert_eq!(class.booked_count, 3);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancelled_booking_is_reactivated(pool: PgPool) {
        let org = create_test_org(&pool, "reactivate").await;
        let class_id = create_class(&pool, org.id, 5, Duration::hours(3)).await;
        let a = create_test_member(&pool, org.id, "a@example.com").await;

        let mut conn = pool.acquire().await.unwrap();
        let booking = book(&mut conn, org.id, class_id, a.id, Utc::now()).await.unwrap();
        cancel(&mut conn, org.id, booking.id).await.unwrap();
        let again = book(&mut conn, org.id, class_id, a.id, Utc::now()).await.unwrap();

        assert_eq!(again.id, booking.id);
        assert_eq!(again.status, BookingStatus::Booked);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_rejects_started_and_cancelled_classes(pool: PgPool) {
        let org = create_test_org(&pool, "rejects").await;
        let started = create_class(&pool, org.id, 5, Duration::minutes(-10)).await;
        let cancelled = create_class(&pool, org.id, 5, Duration::hours(2)).await;
        let a = create_test_member(&pool, org.id, "a@example.com").await;

        let mut conn = pool.acquire().await.unwrap();
        Classes::new(&mut conn).cancel(org.id, cancelled).await.unwrap();

        let err = book(&mut conn, org.id, started, a.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        let err = book(&mut conn, org.id, cancelled, a.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        // Another tenant cannot see the class at all
        let other = create_test_org(&pool, "other-box").await;
        let err = book(&mut conn, other.id, cancelled, a.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(Members::new(&mut conn).get_by_id((org.id, a.id)).await.unwrap().is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_attendance_rules(pool: PgPool) {
        let org = create_test_org(&pool, "attendance").await;
        let class_id = create_class(&pool, org.id, 1, Duration::hours(3)).await;
        let a = create_test_member(&pool, org.id, "a@example.com").await;
        let b = create_test_member(&pool, org.id, "b@example.com").await;

        let mut conn = pool.acquire().await.unwrap();
        let booked = book(&mut conn, org.id, class_id, a.id, Utc::now()).await.unwrap();
        let waiting = book(&mut conn, org.id, class_id, b.id, Utc::now()).await.unwrap();

        let marked = mark_attendance(&mut conn, org.id, booked.id, true).await.unwrap();
        assert_eq!(marked.status, BookingStatus::Attended);
        let corrected = mark_attendance(&mut conn, org.id, booked.id, false).await.unwrap();
        assert_eq!(corrected.status, BookingStatus::NoShow);

        let err = mark_attendance(&mut conn, org.id, waiting.id, true).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
