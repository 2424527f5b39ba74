use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API response for the health and readiness checks
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthResponse {
    /// `ok` when the check passed
    pub status: String,
    pub message: String,
}
