//! Saved span-list views

use serde::{Deserialize, Serialize};

/// A saved filter view. User views live in the metadata store; system views
/// come from configuration and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: i64,
    pub workspace_id: i64,
    #[serde(default)]
    pub enterprise_id: String,
    pub view_name: String,
    pub platform_type: String,
    pub span_list_type: String,
    /// Filter tree as opaque JSON; validated when the view is queried
    pub filters: String,
    pub is_system: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Fields a view update may change; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct ViewPatch {
    pub view_name: Option<String>,
    pub platform_type: Option<String>,
    pub span_list_type: Option<String>,
    pub filters: Option<String>,
}
