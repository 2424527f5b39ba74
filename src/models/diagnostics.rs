use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Live state of one document session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub document_path: String,
    pub editors: u32,
    pub viewers: u32,
    pub present_users: u32,
    pub revision: u64,
    pub unsaved: bool,
    pub unrendered: bool,
    pub last_rendered_hash: Option<String>,
}

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_sessions: u32,
    pub n_conn: u32,
    pub n_dirty_docs: u32,
    pub sessions: Vec<SessionStats>,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
