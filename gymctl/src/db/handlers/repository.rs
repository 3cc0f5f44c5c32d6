//! CRUD trait shared by table repositories.

use crate::db::errors::Result;

/// Create/read/list/update/delete over one table.
///
/// Tenant-scoped repositories use `(OrganizationId, Uuid)` as [`Repository::Id`], so a lookup
/// can never cross an organization boundary. Write-only or event-shaped tables (audit logs,
/// payment events, billing mirrors) don't implement this and expose their own methods.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    type UpdateRequest;
    type Response;
    type Id: Send + Sync;
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// `Ok(None)` when no row matches
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// `Ok(false)` when nothing was deleted
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;
}
