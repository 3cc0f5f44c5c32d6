//! Database layer for data persistence and access.
//!
//! SQLx over PostgreSQL, organised as repositories:
//!
//! ```text
//! API handlers  ->  db::handlers (repositories)  ->  db::models (rows)  ->  PostgreSQL
//! ```
//!
//! - [`handlers`]: one repository per table, wrapping a `&mut PgConnection`
//! - [`models`]: row structs (`FromRow`) and create/update request structs
//! - [`errors`]: [`DbError`](errors::DbError), the categorised error every repository returns
//!
//! Repositories never begin or commit transactions. Callers open one with `pool.begin()` and hand
//! `&mut tx` to as many repositories as the operation needs:
//!
//! ```ignore
//! use gymctl::db::handlers::{Members, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let member = Members::new(&mut tx).create(&(org_id, request)).await?;
//! tx.commit().await?;
//! ```
//!
//! Tenant-scoped repositories take `(OrganizationId, id)` keys so that a lookup can never
//! return another organization's row.

pub mod errors;
pub mod handlers;
pub mod models;
