//! Database repositories for classes and bookings.

use crate::api::models::classes::BookingStatus;
use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::classes::{
        BookingDBResponse, ClassCreateDBRequest, ClassDBResponse, ClassUpdateDBRequest, DueReminderDBResponse,
        RosterEntryDBResponse,
    },
};
use crate::types::{BookingId, ClassId, MemberId, OrganizationId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

/// Seats are held by live and already-marked bookings; waitlisted and cancelled ones hold none
const SEAT_STATUSES: &str = "('booked', 'attended', 'no_show')";

const INSERT_CLASS: &str = r#"
    INSERT INTO classes (id, organization_id, name, description, coach_id, location, starts_at, ends_at, capacity)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    RETURNING *
"#;

fn with_counts(source: &str) -> String {
    format!(
        r#"
        SELECT c.*,
            (SELECT COUNT(*) FROM bookings b WHERE b.class_id = c.id AND b.status IN {SEAT_STATUSES}) AS booked_count,
            (SELECT COUNT(*) FROM bookings b WHERE b.class_id = c.id AND b.status = 'waitlisted') AS waitlist_count
        FROM {source}
        "#
    )
}

#[derive(Debug, Clone)]
pub struct ClassFilter {
    pub organization_id: OrganizationId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub include_cancelled: bool,
}

pub struct Classes<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Classes<'c> {
    type CreateRequest = ClassCreateDBRequest;
    type UpdateRequest = ClassUpdateDBRequest;
    type Response = ClassDBResponse;
    type Id = (OrganizationId, ClassId);
    type Filter = ClassFilter;

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&request.organization_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        // The insert runs as a CTE so the response carries the same counts as every other read
        let query = format!("WITH c AS ({INSERT_CLASS}) {}", with_counts("c"));
        let class = sqlx::query_as::<_, ClassDBResponse>(&query)
            .bind(Uuid::new_v4())
            .bind(request.organization_id)
            .bind(request.name.trim())
            .bind(&request.description)
            .bind(request.coach_id)
            .bind(&request.location)
            .bind(request.starts_at)
            .bind(request.ends_at)
            .bind(request.capacity)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(class)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), class_id = %abbrev_uuid(&id.1)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let query = format!("{} WHERE c.organization_id = $1 AND c.id = $2", with_counts("classes c"));
        let class = sqlx::query_as::<_, ClassDBResponse>(&query)
            .bind(id.0)
            .bind(id.1)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(class)
    }

    #[instrument(skip(self, filter), fields(org_id = %abbrev_uuid(&filter.organization_id)), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let query = format!(
            r#"{}
            WHERE c.organization_id = $1
              AND ($2::timestamptz IS NULL OR c.starts_at >= $2)
              AND ($3::timestamptz IS NULL OR c.starts_at < $3)
              AND ($4 OR c.cancelled_at IS NULL)
            ORDER BY c.starts_at, c.id
            "#,
            with_counts("classes c")
        );
        let classes = sqlx::query_as::<_, ClassDBResponse>(&query)
            .bind(filter.organization_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.include_cancelled)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(classes)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), class_id = %abbrev_uuid(&id.1)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM classes WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&id.0), class_id = %abbrev_uuid(&id.1)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let result = sqlx::query(
            r#"
            UPDATE classes SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                coach_id = COALESCE($5, coach_id),
                location = COALESCE($6, location),
                starts_at = COALESCE($7, starts_at),
                ends_at = COALESCE($8, ends_at),
                capacity = COALESCE($9, capacity),
                updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(id.0)
        .bind(id.1)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.coach_id)
        .bind(&request.location)
        .bind(request.starts_at)
        .bind(request.ends_at)
        .bind(request.capacity)
        .execute(&mut *self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }
}


impl<'c> Classes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Lock the class row for the rest of the transaction and return it
    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id), class_id = %abbrev_uuid(&class_id)), err)]
    pub async fn lock(&mut self, org_id: OrganizationId, class_id: ClassId) -> Result<Option<ClassDBResponse>> {
        let locked: Option<ClassId> = sqlx::query_scalar("SELECT id FROM classes WHERE organization_id = $1 AND id = $2 FOR UPDATE")
            .bind(org_id)
            .bind(class_id)
            .fetch_optional(&mut *self.db)
            .await?;
        match locked {
            Some(_) => self.get_by_id((org_id, class_id)).await,
            None => Ok(None),
        }
    }

    /// Mark a class cancelled. Bookings are kept for the record.
    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id), class_id = %abbrev_uuid(&class_id)), err)]
    pub async fn cancel(&mut self, org_id: OrganizationId, class_id: ClassId) -> Result<ClassDBResponse> {
        let result = sqlx::query(
            "UPDATE classes SET cancelled_at = COALESCE(cancelled_at, NOW()), updated_at = NOW() WHERE organization_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(class_id)
        .execute(&mut *self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        self.get_by_id((org_id, class_id)).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), err)]
    pub async fn count_upcoming(&mut self, now: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classes WHERE starts_at > $1 AND cancelled_at IS NULL")
            .bind(now)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}

pub struct Bookings<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Bookings<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id), booking_id = %abbrev_uuid(&booking_id)), err)]
    pub async fn get(&mut self, org_id: OrganizationId, booking_id: BookingId) -> Result<Option<BookingDBResponse>> {
        let booking = sqlx::query_as::<_, BookingDBResponse>("SELECT * FROM bookings WHERE organization_id = $1 AND id = $2")
            .bind(org_id)
            .bind(booking_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(booking)
    }

    #[instrument(skip(self), fields(class_id = %abbrev_uuid(&class_id), member_id = %abbrev_uuid(&member_id)), err)]
    pub async fn get_for_member(&mut self, class_id: ClassId, member_id: MemberId) -> Result<Option<BookingDBResponse>> {
        let booking = sqlx::query_as::<_, BookingDBResponse>("SELECT * FROM bookings WHERE class_id = $1 AND member_id = $2")
            .bind(class_id)
            .bind(member_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(booking)
    }

    #[instrument(skip(self), fields(class_id = %abbrev_uuid(&class_id), member_id = %abbrev_uuid(&member_id), status = ?status), err)]
    pub async fn insert(
        &mut self,
        org_id: OrganizationId,
        class_id: ClassId,
        member_id: MemberId,
        status: BookingStatus,
    ) -> Result<BookingDBResponse> {
        let booking = sqlx::query_as::<_, BookingDBResponse>(
            r#"
            INSERT INTO bookings (id, organization_id, class_id, member_id, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(class_id)
        .bind(member_id)
        .bind(status)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(booking)
    }

    /// Change a booking's status. Reactivation clears any previous reminder stamp.
    #[instrument(skip(self), fields(booking_id = %abbrev_uuid(&booking_id), status = ?status), err)]
    pub async fn set_status(&mut self, booking_id: BookingId, status: BookingStatus) -> Result<BookingDBResponse> {
        let booking = sqlx::query_as::<_, BookingDBResponse>(
            r#"
            UPDATE bookings SET
                status = $2,
                reminder_sent_at = CASE WHEN status = 'cancelled' THEN NULL ELSE reminder_sent_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(status)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(booking)
    }

    /// Move the longest-waiting waitlisted booking into a seat
    #[instrument(skip(self), fields(class_id = %abbrev_uuid(&class_id)), err)]
    pub async fn promote_next(&mut self, class_id: ClassId) -> Result<Option<BookingDBResponse>> {
        let promoted = sqlx::query_as::<_, BookingDBResponse>(
            r#"
            UPDATE bookings SET status = 'booked', updated_at = NOW()
            WHERE id = (
                SELECT id FROM bookings
                WHERE class_id = $1 AND status = 'waitlisted'
                ORDER BY updated_at, created_at, id
                LIMIT 1
                FOR UPDATE
            )
            RETURNING *
            "#,
        )
        .bind(class_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(promoted)
    }

    #[instrument(skip(self), fields(class_id = %abbrev_uuid(&class_id)), err)]
    pub async fn roster(&mut self, class_id: ClassId) -> Result<Vec<RosterEntryDBResponse>> {
        let roster = sqlx::query_as::<_, RosterEntryDBResponse>(
            r#"
            SELECT b.*, m.first_name, m.last_name
            FROM bookings b
            JOIN members m ON m.id = b.member_id
            WHERE b.class_id = $1
            ORDER BY CASE b.status WHEN 'waitlisted' THEN 1 WHEN 'cancelled' THEN 2 ELSE 0 END, b.updated_at, b.id
            "#,
        )
        .bind(class_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(roster)
    }

    /// Booked seats in classes starting within `(now, now + lead_hours]` that have not been reminded yet
    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn due_reminders(&mut self, org_id: OrganizationId, now: DateTime<Utc>, lead_hours: i32) -> Result<Vec<DueReminderDBResponse>> {
        let due = sqlx::query_as::<_, DueReminderDBResponse>(
            r#"
            SELECT
                b.id AS booking_id,
                c.id AS class_id,
                c.name AS class_name,
                c.location,
                c.starts_at,
                m.id AS member_id,
                m.first_name,
                m.email,
                m.email_opt_out
            FROM bookings b
            JOIN classes c ON c.id = b.class_id
            JOIN members m ON m.id = b.member_id
            WHERE b.organization_id = $1
              AND b.status = 'booked'
              AND b.reminder_sent_at IS NULL
              AND c.cancelled_at IS NULL
              AND c.starts_at > $2
              AND c.starts_at <= $2 + make_interval(hours => $3)
            ORDER BY c.starts_at, b.id
            "#,
        )
        .bind(org_id)
        .bind(now)
        .bind(lead_hours)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(due)
    }

    #[instrument(skip(self), fields(booking_id = %abbrev_uuid(&booking_id)), err)]
    pub async fn mark_reminder_sent(&mut self, booking_id: BookingId, sent_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE bookings SET reminder_sent_at = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(sent_at)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn count_since(&mut self, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE created_at >= $1")
            .bind(since)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}
