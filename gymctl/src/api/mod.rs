//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Authentication** (`/api/v1/auth/*`): registration, login, logout, current user
//! - **Organizations** (`/api/v1/organizations/{org_id}/*`): everything tenant scoped, i.e.
//!   members, plans, billing, classes, bookings, workouts, workflows and the audit trail
//! - **Platform** (`/api/v1/platform/*`): cross-tenant console for platform admins
//! - **Webhooks** (`/api/webhooks/stripe`): signed payment provider events
//! - **Cron** (`/api/cron/notifications`): reminder dispatch for an external scheduler
//!
//! Documentation is served at `/api/docs` and the raw spec at `/api/openapi.json`.

pub mod handlers;
pub mod models;
