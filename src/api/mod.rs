//! HTTP surface under `/api`.
//!
//! Handlers receive an explicit [`RequestContext`] carrying the caller and
//! their active campaign; capability checks happen there and nowhere else.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use middleware::RequestContext;
pub use routes::configure;

use crate::config::AuthConfig;
use crate::db::Database;
use crate::jobs::ExportQueue;
use crate::storage::ExportStorage;

/// Shared application state, registered as `web::Data<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: ExportStorage,
    pub queue: ExportQueue,
    pub auth: AuthConfig,
}
