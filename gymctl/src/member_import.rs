//! CSV member import.
//!
//! Parsing is pure and reports problems per row; only the rows that survive are written, all in
//! one transaction. Row numbers are file line numbers with the header on line 1.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::json;
use sqlx::PgConnection;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, instrument};

use crate::{
    api::models::members::{ImportRowError, ImportSummary, MemberStatus},
    db::{
        handlers::{AuditLogs, Members, Repository},
        models::{audit_logs::AuditLogCreateDBRequest, members::MemberCreateDBRequest},
    },
    errors::{Error, Result},
    types::{OrganizationId, UserId},
};

const MANDATORY: [&str; 3] = ["first_name", "last_name", "email"];

/// Column positions resolved from the header row
#[derive(Debug)]
struct Columns {
    first_name: usize,
    last_name: usize,
    email: usize,
    phone: Option<usize>,
    status: Option<usize>,
    notes: Option<usize>,
    joined_at: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let find = |name: &str| normalized.iter().position(|h| h == name);

        let missing: Vec<&str> = MANDATORY.iter().copied().filter(|name| find(name).is_none()).collect();
        if !missing.is_empty() {
            return Err(Error::BadRequest {
                message: format!("CSV header is missing required column(s): {}", missing.join(", ")),
            });
        }

        Ok(Self {
            first_name: find("first_name").unwrap_or_default(),
            last_name: find("last_name").unwrap_or_default(),
            email: find("email").unwrap_or_default(),
            phone: find("phone"),
            status: find("status"),
            notes: find("notes"),
            joined_at: find("joined_at"),
        })
    }
}

/// Result of validating a file against what is already on record
#[derive(Debug, Default)]
pub struct ParsedImport {
    pub rows: Vec<MemberCreateDBRequest>,
    pub skipped: usize,
    pub errors: Vec<ImportRowError>,
}

fn field<'r>(record: &'r StringRecord, index: Option<usize>) -> Option<&'r str> {
    index.and_then(|i| record.get(i)).map(str::trim).filter(|value| !value.is_empty())
}

fn parse_row(record: &StringRecord, columns: &Columns) -> std::result::Result<MemberCreateDBRequest, String> {
    let first_name = field(record, Some(columns.first_name)).ok_or("first_name is required")?;
    let last_name = field(record, Some(columns.last_name)).ok_or("last_name is required")?;
    let email = field(record, Some(columns.email)).ok_or("email is required")?.to_lowercase();
    if !email.contains('@') {
        return Err(format!("'{email}' is not a valid email address"));
    }

    let status = match field(record, columns.status) {
        Some(value) => MemberStatus::from_str(value)?,
        None => MemberStatus::Active,
    };

    let joined_at = match field(record, columns.joined_at) {
        Some(value) => Some(
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| format!("joined_at '{value}' is not a YYYY-MM-DD date"))?,
        ),
        None => None,
    };

    Ok(MemberCreateDBRequest {
        user_id: None,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: Some(email),
        phone: field(record, columns.phone).map(str::to_string),
        status,
        notes: field(record, columns.notes).map(str::to_string),
        email_opt_out: false,
        joined_at,
    })
}

/// Validate a CSV document. `existing` holds the lowercased emails already in the organization.
pub fn parse_csv(text: &str, existing: &HashSet<String>) -> Result<ParsedImport> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(|e| Error::BadRequest {
        message: format!("Could not read CSV header: {e}"),
    })?;
    let columns = Columns::from_headers(headers)?;

    let mut parsed = ParsedImport::default();
    let mut seen = HashSet::new();

    for (index, result) in reader.records().enumerate() {
        let fallback_row = index + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let row = e.position().map(|p| p.line() as usize).unwrap_or(fallback_row);
                parsed.errors.push(ImportRowError {
                    row,
                    message: format!("unreadable row: {e}"),
                });
                continue;
            }
        };
        let row = record.position().map(|p| p.line() as usize).unwrap_or(fallback_row);

        let member = match parse_row(&record, &columns) {
            Ok(member) => member,
            Err(message) => {
                parsed.errors.push(ImportRowError { row, message });
                continue;
            }
        };

        let email = member.email.clone().unwrap_or_default();
        if existing.contains(&email) {
            parsed.skipped += 1;
            parsed.errors.push(ImportRowError {
                row,
                message: format!("{email} is already a member; skipped"),
            });
            continue;
        }
        if !seen.insert(email.clone()) {
            parsed.errors.push(ImportRowError {
                row,
                message: format!("{email} appears earlier in the file"),
            });
            continue;
        }

        parsed.rows.push(member);
    }

    Ok(parsed)
}

/// Import members from CSV into one organization.
///
/// `conn` should be a transaction: either every valid row lands or none do.
#[instrument(skip(conn, text), fields(bytes = text.len()), err)]
pub async fn import_members(
    conn: &mut PgConnection,
    org_id: OrganizationId,
    actor: UserId,
    text: &str,
) -> Result<ImportSummary> {
    let existing = Members::new(conn).existing_emails(org_id).await?;
    let parsed = parse_csv(text, &existing)?;

    let mut members = Members::new(conn);
    for row in &parsed.rows {
        members.create(&(org_id, row.clone())).await?;
    }

    let summary = ImportSummary {
        imported: parsed.rows.len(),
        skipped: parsed.skipped,
        errors: parsed.errors,
    };

    AuditLogs::new(conn)
        .record(
            &AuditLogCreateDBRequest::new(Some(org_id), Some(actor), "members.imported", "member").metadata(json!({
                "imported": summary.imported,
                "skipped": summary.skipped,
                "errors": summary.errors.len(),
            })),
        )
        .await?;

    info!(imported = summary.imported, skipped = summary.skipped, errors = summary.errors.len(), "Member import finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::members::MemberFilter;
    use crate::test_utils::{create_test_member, create_test_org, create_test_user};
    use sqlx::PgPool;

    fn rows(errors: &[ImportRowError]) -> Vec<usize> {
        errors.iter().map(|e| e.row).collect()
    }

    #[test]
    fn test_rows_missing_mandatory_fields_are_reported() {
        let csv = "\
First_Name, Last_Name ,EMAIL,phone
Ada,Lovelace,ADA@example.com,555-0100
,Hopper,grace@example.com,
Alan,,alan@example.com,
Linus,Torvalds,,
Ken,Thompson,not-an-email,
";
        let parsed = parse_csv(csv, &HashSet::new()).unwrap();

        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].email.as_deref(), Some("ada@example.com"));
        assert_eq!(parsed.rows[0].phone.as_deref(), Some("555-0100"));
        assert_eq!(parsed.rows[0].status, MemberStatus::Active);
        assert_eq!(rows(&parsed.errors), vec![3, 4, 5, 6]);
        assert!(parsed.errors[0].message.contains("first_name"));
        assert!(parsed.errors[1].message.contains("last_name"));
        assert!(parsed.errors[2].message.contains("email"));
    }

    #[test]
    fn test_missing_mandatory_header_fails_whole_import() {
        let err = parse_csv("first_name,email\nAda,ada@example.com\n", &HashSet::new()).unwrap_err();
        match err {
            Error::BadRequest { message } => assert!(message.contains("last_name")),
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicates_existing_and_optional_columns() {
        let csv = "\
first_name,last_name,email,status,joined_at,notes,shoe_size
Ada,Lovelace,ada@example.com,paused,2024-03-01,Prefers mornings,38
Ada,Again,ADA@example.com,,,,
Grace,Hopper,grace@example.com,,,,
Alan,Turing,alan@example.com,retired,,,
Ken,Thompson,ken@example.com,,03/01/2024,,
";
        let existing: HashSet<String> = ["grace@example.com".to_string()].into();
        let parsed = parse_csv(csv, &existing).unwrap();

        assert_eq!(parsed.rows.len(), 1);
        let ada = &parsed.rows[0];
        assert_eq!(ada.status, MemberStatus::Paused);
        assert_eq!(ada.joined_at, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(ada.notes.as_deref(), Some("Prefers mornings"));

        assert_eq!(parsed.skipped, 1);
        assert_eq!(rows(&parsed.errors), vec![3, 4, 5, 6]);
        assert!(parsed.errors[0].message.contains("earlier in the file"));
        assert!(parsed.errors[1].message.contains("skipped"));
        assert!(parsed.errors[2].message.contains("retired"));
        assert!(parsed.errors[3].message.contains("joined_at"));
    }

    #[test]
    fn test_quoted_multiline_fields_keep_line_numbers() {
        let csv = "first_name,last_name,email,notes\nAda,Lovelace,ada@example.com,\"line one\nline two\"\n,Missing,x@example.com,\n";
        let parsed = parse_csv(csv, &HashSet::new()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(rows(&parsed.errors), vec![4]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_import_members_writes_valid_rows(pool: PgPool) {
        let org = create_test_org(&pool, "import").await;
        let admin = create_test_user(&pool, "owner@example.com", None).await;
        create_test_member(&pool, org.id, "existing@example.com").await;

        let csv = "\
first_name,last_name,email
Ada,Lovelace,ada@example.com
Old,Timer,existing@example.com
,Nobody,nobody@example.com
";
        let mut tx = pool.begin().await.unwrap();
        let summary = import_members(&mut tx, org.id, admin.id, csv).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors.len(), 2);

        let mut conn = pool.acquire().await.unwrap();
        let total = Members::new(&mut conn).count(&MemberFilter::new(org.id, 0, 100)).await.unwrap();
        assert_eq!(total, 2);
        let actions: Vec<String> = sqlx::query_scalar("SELECT action FROM audit_logs WHERE organization_id = $1")
            .bind(org.id)
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(actions, vec!["members.imported".to_string()]);
    }
}
