//! OpenAPI documentation.
//!
//! [`ApiDoc`] is rooted at `/api`. It documents the webhook and cron endpoints directly and nests
//! [`ManagementApiDoc`] (the `/api/v1` management API) under `/v1`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::handlers;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("Session token returned by `/auth/login` or `/auth/register`"))
                    .build(),
            ),
        );
        components.security_schemes.insert(
            "CookieAuth".to_string(),
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("gymctl_session"))),
        );
        components.security_schemes.insert(
            "CronSecret".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("The configured `notifications.cron_secret`"))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::me,
        handlers::organizations::list_organizations,
        handlers::organizations::get_organization,
        handlers::organizations::update_organization,
        handlers::members::list_members,
        handlers::members::create_member,
        handlers::members::get_member,
        handlers::members::update_member,
        handlers::members::delete_member,
        handlers::members::import_members,
        handlers::members::create_checkout,
        handlers::members::create_billing_portal,
        handlers::plans::list_plans,
        handlers::plans::create_plan,
        handlers::plans::update_plan,
        handlers::plans::delete_plan,
        handlers::billing::list_subscriptions,
        handlers::billing::list_invoices,
        handlers::classes::list_classes,
        handlers::classes::create_class,
        handlers::classes::get_class,
        handlers::classes::update_class,
        handlers::classes::cancel_class,
        handlers::classes::list_bookings,
        handlers::classes::create_booking,
        handlers::classes::cancel_booking,
        handlers::classes::mark_attendance,
        handlers::workouts::list_workouts,
        handlers::workouts::create_workout,
        handlers::workouts::get_workout,
        handlers::workouts::update_workout,
        handlers::workouts::delete_workout,
        handlers::workouts::record_result,
        handlers::workouts::get_leaderboard,
        handlers::workflows::list_workflows,
        handlers::workflows::create_workflow,
        handlers::workflows::get_workflow,
        handlers::workflows::update_workflow,
        handlers::workflows::delete_workflow,
        handlers::workflows::validate_workflow,
        handlers::audit_logs::list_audit_logs,
        handlers::platform::list_organizations,
        handlers::platform::get_stats,
    ),
    tags(
        (name = "auth", description = "Registration and sessions"),
        (name = "organizations", description = "Gym settings"),
        (name = "members", description = "Member CRM"),
        (name = "plans", description = "Membership plans"),
        (name = "billing", description = "Subscriptions, invoices, checkout"),
        (name = "classes", description = "Class schedule"),
        (name = "bookings", description = "Bookings, waitlist and attendance"),
        (name = "workouts", description = "Workouts of the day and leaderboards"),
        (name = "workflows", description = "Automation graphs"),
        (name = "audit", description = "Audit trail"),
        (name = "platform", description = "Platform admin console"),
    )
)]
pub struct ManagementApiDoc;

#[derive(OpenApi)]
#[openapi(
    info(title = "gymctl", description = "Gym management API"),
    servers((url = "/api", description = "gymctl API")),
    modifiers(&SecurityAddon),
    paths(handlers::webhooks::stripe_webhook, handlers::cron::dispatch_notifications),
    nest((path = "/v1", api = ManagementApiDoc)),
    tags(
        (name = "webhooks", description = "Payment provider events"),
        (name = "cron", description = "Scheduled jobs"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_contains_nested_paths() {
        let spec = ApiDoc::openapi();
        assert!(spec.paths.paths.contains_key("/webhooks/stripe"));
        assert!(spec.paths.paths.contains_key("/v1/auth/login"));
        assert!(spec.paths.paths.contains_key("/v1/organizations/{org_id}/classes/{id}/bookings/{booking_id}"));

        let schemes = &spec.components.as_ref().unwrap().security_schemes;
        assert!(schemes.contains_key("BearerAuth"));
        assert!(schemes.contains_key("CookieAuth"));
    }
}
