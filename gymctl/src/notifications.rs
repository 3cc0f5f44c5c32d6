//! Cron-triggered class reminder dispatch.
//!
//! An external scheduler calls the dispatch endpoint periodically. Each run walks every
//! organization with email notifications enabled, emails members whose booked class starts within
//! the organization's reminder lead time, and stamps `reminder_sent_at` so later runs skip them.
//! Organizations with a Discord webhook get a one-line summary when anything was sent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    db::{
        errors::DbError,
        handlers::{Bookings, Organizations},
        models::organizations::OrganizationDBResponse,
    },
    discord::DiscordNotifier,
    email::{ClassReminder, EmailService},
    errors::Result,
    types::OrganizationId,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DispatchTally {
    pub sent: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl DispatchTally {
    fn add(&mut self, other: &DispatchTally) {
        self.sent += other.sent;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrganizationDispatch {
    #[schema(value_type = String, format = "uuid")]
    pub organization_id: OrganizationId,
    #[serde(flatten)]
    pub tally: DispatchTally,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DispatchReport {
    pub organizations: Vec<OrganizationDispatch>,
    pub totals: DispatchTally,
}

fn record(outcome: &'static str, count: u32) {
    if count > 0 {
        metrics::counter!("gymctl_class_reminders_total", "outcome" => outcome).increment(u64::from(count));
    }
}

/// Run one dispatch pass over every organization
#[instrument(skip_all, err)]
pub async fn dispatch_reminders(
    pool: &PgPool,
    email: &EmailService,
    discord: &DiscordNotifier,
    now: DateTime<Utc>,
) -> Result<DispatchReport> {
    let orgs = {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        Organizations::new(&mut conn).list_notification_enabled().await?
    };

    let mut report = DispatchReport {
        organizations: Vec::with_capacity(orgs.len()),
        totals: DispatchTally::default(),
    };

    for org in &orgs {
        let tally = match dispatch_for_organization(pool, email, discord, org, now).await {
            Ok(tally) => tally,
            Err(e) => {
                warn!(org_id = %org.id, error = %e, "Reminder dispatch failed for organization");
                DispatchTally {
                    errors: 1,
                    ..Default::default()
                }
            }
        };

        record("sent", tally.sent);
        record("error", tally.errors);
        record("skipped", tally.skipped);

        report.totals.add(&tally);
        report.organizations.push(OrganizationDispatch {
            organization_id: org.id,
            tally,
        });
    }

    info!(
        organizations = report.organizations.len(),
        sent = report.totals.sent,
        errors = report.totals.errors,
        skipped = report.totals.skipped,
        "Reminder dispatch complete"
    );
    Ok(report)
}

async fn dispatch_for_organization(
    pool: &PgPool,
    email: &EmailService,
    discord: &DiscordNotifier,
    org: &OrganizationDBResponse,
    now: DateTime<Utc>,
) -> Result<DispatchTally> {
    let mut conn = pool.acquire().await.map_err(DbError::from)?;
    let due = Bookings::new(&mut conn)
        .due_reminders(org.id, now, org.reminder_lead_time_hours)
        .await?;

    let mut tally = DispatchTally::default();

    for reminder in &due {
        let Some(address) = reminder.email.as_deref().filter(|_| !reminder.email_opt_out) else {
            tally.skipped += 1;
            continue;
        };

        let message = ClassReminder {
            organization_name: &org.name,
            first_name: &reminder.first_name,
            class_name: &reminder.class_name,
            location: reminder.location.as_deref(),
            starts_at: reminder.starts_at,
        };

        match email.send_class_reminder(address, &message).await {
            Ok(()) => {
                Bookings::new(&mut conn).mark_reminder_sent(reminder.booking_id, now).await?;
                tally.sent += 1;
            }
            Err(e) => {
                warn!(booking_id = %reminder.booking_id, error = %e, "Failed to send class reminder");
                tally.errors += 1;
            }
        }
    }

    if tally.sent > 0
        && let Some(webhook_url) = org.discord_webhook_url.as_deref()
    {
        let plural = if tally.sent == 1 { "" } else { "s" };
        let summary = format!("{}: sent {} class reminder{} for upcoming sessions.", org.name, tally.sent, plural);
        if let Err(e) = discord.send(webhook_url, &summary).await {
            warn!(org_id = %org.id, error = %e, "Failed to post Discord summary");
            tally.errors += 1;
        }
    }

    Ok(tally)
}
