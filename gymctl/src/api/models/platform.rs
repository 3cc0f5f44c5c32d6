//! Models for the platform (super-admin) console.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListPlatformOrganizationsQuery {
    /// Case-insensitive match against name or slug
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevenueTotal {
    pub currency: String,
    /// Paid invoice total in minor units
    pub amount: i64,
}

/// Platform-wide counters
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlatformStats {
    pub organizations: i64,
    pub users: i64,
    pub active_members: i64,
    pub lead_members: i64,
    /// Active or trialing subscriptions
    pub paying_subscriptions: i64,
    pub upcoming_classes: i64,
    pub bookings_last_30_days: i64,
    pub revenue: Vec<RevenueTotal>,
}
