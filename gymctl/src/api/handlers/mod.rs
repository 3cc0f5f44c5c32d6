//! HTTP request handlers for all API endpoints.
//!
//! Handlers are grouped by resource. Management handlers live under `/api/v1` and follow one
//! shape: authenticate via the [`CurrentUser`](crate::api::models::users::CurrentUser) extractor,
//! check the caller's organization role with [`authorize`](crate::auth::permissions::authorize),
//! run the repository calls (inside a transaction when anything is written, together with the
//! audit entry) and map the result into an API model.
//!
//! [`webhooks`] and [`cron`] are machine-to-machine endpoints mounted under `/api` and
//! authenticated by signature and shared secret respectively.
//!
//! Handlers return [`crate::errors::Error`], which renders status codes and JSON error bodies.

pub mod audit_logs;
pub mod auth;
pub mod billing;
pub mod classes;
pub mod cron;
pub mod members;
pub mod organizations;
pub mod plans;
pub mod platform;
pub mod webhooks;
pub mod workflows;
pub mod workouts;
