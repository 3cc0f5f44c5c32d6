//! Database record models.
//!
//! Row structs derive `sqlx::FromRow` and stay separate from the API models in
//! [`crate::api::models`], which convert from them with `From` impls. Postgres enum types are
//! declared once, on the API side, and reused here.

pub mod audit_logs;
pub mod billing;
pub mod classes;
pub mod members;
pub mod organizations;
pub mod payment_events;
pub mod plans;
pub mod users;
pub mod workflows;
pub mod workouts;
