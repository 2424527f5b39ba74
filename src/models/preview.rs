use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Payload of a `render` push event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct RenderedPreview {
    pub html: String,
    /// Lowercase hex SHA-256 of `html`
    pub hash: String,
}
