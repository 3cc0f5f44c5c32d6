//! API request and response data models.
//!
//! API models are distinct from the database models in [`crate::db::models`] so the wire
//! contract can evolve separately from storage. Conversions go through `From<...DBResponse>`.
//! Everything here derives `utoipa` schemas for the generated documentation.

pub mod audit_logs;
pub mod auth;
pub mod billing;
pub mod classes;
pub mod members;
pub mod organizations;
pub mod pagination;
pub mod plans;
pub mod platform;
pub mod users;
pub mod workflows;
pub mod workouts;
