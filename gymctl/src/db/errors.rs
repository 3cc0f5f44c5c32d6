//! Categorised database errors.
//!
//! Constraint violations keep the constraint and table names reported by Postgres so the API
//! layer can turn `members_org_email_unique` into "a member with this email already exists"
//! without parsing messages.

use sqlx::error::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// No row matched the lookup
    #[error("Entity not found")]
    NotFound,

    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("Foreign key constraint violation")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// A CHECK constraint rejected the row (capacity, time ranges, non-negative prices, ...)
    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// True when this is a unique violation on the named constraint
    pub fn is_unique_violation_on(&self, name: &str) -> bool {
        matches!(self, DbError::UniqueViolation { constraint: Some(c), .. } if c == name)
    }

    /// Name of the violated constraint, if this is a constraint violation
    pub fn constraint(&self) -> Option<&str> {
        match self {
            DbError::UniqueViolation { constraint, .. }
            | DbError::ForeignKeyViolation { constraint, .. }
            | DbError::CheckViolation { constraint, .. } => constraint.as_deref(),
            DbError::NotFound | DbError::Other(_) => None,
        }
    }
}

fn parts(db_err: &dyn DatabaseError) -> (Option<String>, Option<String>, String) {
    (
        db_err.constraint().map(str::to_string),
        db_err.table().map(str::to_string),
        db_err.message().to_string(),
    )
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let sqlx::Error::Database(db_err) = &err else {
            return match err {
                sqlx::Error::RowNotFound => DbError::NotFound,
                other => DbError::Other(other.into()),
            };
        };

        let (constraint, table, message) = parts(db_err.as_ref());
        if db_err.is_unique_violation() {
            DbError::UniqueViolation { constraint, table, message }
        } else if db_err.is_foreign_key_violation() {
            DbError::ForeignKeyViolation { constraint, table, message }
        } else if db_err.is_check_violation() {
            DbError::CheckViolation { constraint, table, message }
        } else {
            DbError::Other(err.into())
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(DbError::from(sqlx::Error::RowNotFound), DbError::NotFound));
        assert!(matches!(DbError::from(sqlx::Error::PoolTimedOut), DbError::Other(_)));
    }

    #[test]
    fn test_constraint_accessor() {
        let err = DbError::UniqueViolation {
            constraint: Some("plans_org_name_unique".to_string()),
            table: Some("plans".to_string()),
            message: "duplicate key".to_string(),
        };
        assert_eq!(err.constraint(), Some("plans_org_name_unique"));
        assert!(err.is_unique_violation_on("plans_org_name_unique"));
        assert!(!err.is_unique_violation_on("members_org_email_unique"));
        assert_eq!(DbError::NotFound.constraint(), None);
    }
}
