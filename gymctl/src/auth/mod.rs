//! Authentication and authorization.
//!
//! Callers authenticate with a JWT session, either from the session cookie set at login or from
//! an `Authorization: Bearer <jwt>` header. [`CurrentUser`](crate::api::models::users::CurrentUser)
//! implements `FromRequestParts`, so any handler that takes it as an argument requires a session.
//!
//! Authorization is per organization. A user holds one
//! [`OrgRole`](crate::api::models::organizations::OrgRole) in each organization they belong to,
//! and [`permissions::authorize`] checks it against the minimum role an operation needs. Platform
//! admins pass every organization check.
//!
//! - [`session`]: token issue/verify and cookie formatting
//! - [`password`]: argon2 hashing and length policy
//! - [`current_user`]: the request extractor
//! - [`permissions`]: organization role checks and member self-service rules

pub mod current_user;
pub mod password;
pub mod permissions;
pub mod session;
