//! Repository implementations for database access.
//!
//! CRUD-shaped tables implement [`Repository`]. Tables that are written by webhook processing
//! ([`billing`], [`payment_events`]) or that are append-only ([`audit_logs`]) expose
//! purpose-built methods instead.

pub mod audit_logs;
pub mod billing;
pub mod classes;
pub mod members;
pub mod organizations;
pub mod payment_events;
pub mod plans;
pub mod repository;
pub mod users;
pub mod workflows;
pub mod workouts;

pub use audit_logs::AuditLogs;
pub use billing::{Invoices, Payments, Subscriptions};
pub use classes::{Bookings, Classes};
pub use members::Members;
pub use organizations::Organizations;
pub use payment_events::PaymentEvents;
pub use plans::Plans;
pub use repository::Repository;
pub use users::Users;
pub use workflows::Workflows;
pub use workouts::{WorkoutResults, Workouts};
