//! Saved views
//!
//! User views are stored per owner. System views come from configuration,
//! are listed in every workspace ahead of user views, and cannot be edited.

use std::sync::Arc;

use serde::Deserialize;

use crate::core::config::SystemViewConfig;
use crate::data::traits::ViewRepository;
use crate::data::types::{PlatformType, SpanListType, View, ViewPatch};
use crate::domain::error::ServiceError;
use crate::domain::external::{AuthAction, AuthResource, Authorizer};
use crate::utils::time::now_ms;

const MAX_VIEW_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateViewRequest {
    pub workspace_id: i64,
    #[serde(default)]
    pub enterprise_id: String,
    pub view_name: String,
    #[serde(default)]
    pub platform_type: Option<String>,
    #[serde(default)]
    pub span_list_type: Option<String>,
    #[serde(default)]
    pub filters: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateViewRequest {
    pub workspace_id: i64,
    #[serde(default)]
    pub view_name: Option<String>,
    #[serde(default)]
    pub platform_type: Option<String>,
    #[serde(default)]
    pub span_list_type: Option<String>,
    #[serde(default)]
    pub filters: Option<String>,
}

pub struct ViewSvc {
    views: Arc<dyn ViewRepository>,
    authorizer: Arc<dyn Authorizer>,
    system: Vec<SystemViewConfig>,
}

impl ViewSvc {
    pub fn new(
        views: Arc<dyn ViewRepository>,
        authorizer: Arc<dyn Authorizer>,
        system: Vec<SystemViewConfig>,
    ) -> Self {
        Self {
            views,
            authorizer,
            system,
        }
    }

    pub async fn create(&self, user_id: &str, req: CreateViewRequest) -> Result<View, ServiceError> {
        check_workspace(req.workspace_id)?;
        check_name(&req.view_name)?;
        let platform = parse_platform(req.platform_type.as_deref())?;
        let list_type = parse_list_type(req.span_list_type.as_deref())?;
        self.authorizer
            .check(
                user_id,
                AuthAction::CreateLoopTraceView,
                &AuthResource::Workspace(req.workspace_id),
            )
            .await?;

        let now = now_ms();
        let view = self
            .views
            .create_view(&View {
                id: 0,
                workspace_id: req.workspace_id,
                enterprise_id: req.enterprise_id,
                view_name: req.view_name.trim().to_string(),
                platform_type: platform.as_str().to_string(),
                span_list_type: list_type.as_str().to_string(),
                filters: req.filters,
                is_system: false,
                created_by: user_id.to_string(),
                updated_by: user_id.to_string(),
                created_at_ms: now,
                updated_at_ms: now,
            })
            .await?;
        tracing::debug!(view_id = view.id, workspace_id = view.workspace_id, "View created");
        Ok(view)
    }

    /// System views first, then the caller's own views
    pub async fn list(&self, user_id: &str, workspace_id: i64) -> Result<Vec<View>, ServiceError> {
        check_workspace(workspace_id)?;
        self.authorizer
            .check(
                user_id,
                AuthAction::ListLoopTraceView,
                &AuthResource::Workspace(workspace_id),
            )
            .await?;
        let mut views: Vec<View> = self
            .system
            .iter()
            .map(|cfg| system_view(cfg, workspace_id))
            .collect();
        views.extend(self.views.list_views(workspace_id, user_id).await?);
        Ok(views)
    }

    pub async fn update(
        &self,
        user_id: &str,
        view_id: i64,
        req: UpdateViewRequest,
    ) -> Result<View, ServiceError> {
        check_workspace(req.workspace_id)?;
        if let Some(name) = &req.view_name {
            check_name(name)?;
        }
        let platform = req
            .platform_type
            .as_deref()
            .map(|p| parse_platform(Some(p)))
            .transpose()?;
        let list_type = req
            .span_list_type
            .as_deref()
            .map(|t| parse_list_type(Some(t)))
            .transpose()?;
        let current = self.editable(user_id, req.workspace_id, view_id).await?;

        let patch = ViewPatch {
            view_name: req.view_name.map(|n| n.trim().to_string()),
            platform_type: platform.map(|p| p.as_str().to_string()),
            span_list_type: list_type.map(|t| t.as_str().to_string()),
            filters: req.filters,
        };
        self.views
            .update_view(
                req.workspace_id,
                view_id,
                &patch,
                user_id,
                current.updated_at_ms,
                now_ms(),
            )
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("view {}", view_id)))
    }

    pub async fn delete(
        &self,
        user_id: &str,
        workspace_id: i64,
        view_id: i64,
    ) -> Result<(), ServiceError> {
        check_workspace(workspace_id)?;
        self.editable(user_id, workspace_id, view_id).await?;
        if !self.views.delete_view(workspace_id, view_id).await? {
            return Err(ServiceError::not_found(format!("view {}", view_id)));
        }
        Ok(())
    }

    /// Load a user view and check the caller may edit it
    async fn editable(
        &self,
        user_id: &str,
        workspace_id: i64,
        view_id: i64,
    ) -> Result<View, ServiceError> {
        if self.system.iter().any(|v| v.id == view_id) {
            return Err(ServiceError::invalid_param(format!(
                "system view {} is read-only",
                view_id
            )));
        }
        let view = self
            .views
            .get_view(workspace_id, view_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("view {}", view_id)))?;
        self.authorizer
            .check(
                user_id,
                AuthAction::Edit,
                &AuthResource::View {
                    workspace_id,
                    view_id,
                    owner: view.created_by.clone(),
                },
            )
            .await?;
        Ok(view)
    }
}

fn system_view(cfg: &SystemViewConfig, workspace_id: i64) -> View {
    View {
        id: cfg.id,
        workspace_id,
        enterprise_id: String::new(),
        view_name: cfg.view_name.clone(),
        platform_type: cfg.platform_type.clone(),
        span_list_type: cfg.span_list_type.clone(),
        filters: if cfg.filters.is_null() {
            String::new()
        } else {
            cfg.filters.to_string()
        },
        is_system: true,
        created_by: String::new(),
        updated_by: String::new(),
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

fn check_workspace(workspace_id: i64) -> Result<(), ServiceError> {
    if workspace_id <= 0 {
        return Err(ServiceError::invalid_param("workspace_id must be positive"));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), ServiceError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_VIEW_NAME_LEN {
        return Err(ServiceError::invalid_param(format!(
            "view_name must be 1 to {} characters",
            MAX_VIEW_NAME_LEN
        )));
    }
    Ok(())
}

fn parse_platform(raw: Option<&str>) -> Result<PlatformType, ServiceError> {
    raw.unwrap_or_default()
        .parse()
        .map_err(ServiceError::InvalidParam)
}

fn parse_list_type(raw: Option<&str>) -> Result<SpanListType, ServiceError> {
    raw.unwrap_or_default()
        .parse()
        .map_err(ServiceError::InvalidParam)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStores;
    use crate::domain::external::LocalAuthorizer;

    fn svc(stores: &DataStores) -> ViewSvc {
        ViewSvc::new(
            stores.views(),
            Arc::new(LocalAuthorizer),
            vec![SystemViewConfig {
                id: -1,
                view_name: "errors".into(),
                platform_type: "cozeloop".into(),
                span_list_type: "root".into(),
                filters: serde_json::json!({"filter_fields": []}),
            }],
        )
    }

    fn create_req(name: &str) -> CreateViewRequest {
        CreateViewRequest {
            workspace_id: 7,
            enterprise_id: String::new(),
            view_name: name.into(),
            platform_type: None,
            span_list_type: Some("llm".into()),
            filters: String::new(),
        }
    }

    #[tokio::test]
    async fn test_list_merges_system_views() {
        let stores = DataStores::in_memory().await.unwrap();
        let svc = svc(&stores);
        svc.create("alice", create_req("mine")).await.unwrap();
        svc.create("bob", create_req("theirs")).await.unwrap();

        let views = svc.list("alice", 7).await.unwrap();
        assert_eq!(views.len(), 2);
        assert!(views[0].is_system);
        assert_eq!(views[0].workspace_id, 7);
        assert_eq!(views[1].view_name, "mine");
        assert_eq!(views[1].platform_type, "cozeloop");
        assert_eq!(views[1].span_list_type, "llm");
    }

    #[tokio::test]
    async fn test_only_owner_edits() {
        let stores = DataStores::in_memory().await.unwrap();
        let svc = svc(&stores);
        let view = svc.create("alice", create_req("mine")).await.unwrap();
        let patch = UpdateViewRequest {
            workspace_id: 7,
            view_name: Some("renamed".into()),
            platform_type: None,
            span_list_type: None,
            filters: None,
        };

        assert!(matches!(
            svc.update("bob", view.id, patch.clone()).await,
            Err(ServiceError::NoPermission(_))
        ));
        let updated = svc.update("alice", view.id, patch).await.unwrap();
        assert_eq!(updated.view_name, "renamed");
        assert_eq!(updated.span_list_type, "llm");

        assert!(matches!(
            svc.delete("bob", 7, view.id).await,
            Err(ServiceError::NoPermission(_))
        ));
        svc.delete("alice", 7, view.id).await.unwrap();
        assert!(matches!(
            svc.delete("alice", 7, view.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_system_views_are_read_only() {
        let stores = DataStores::in_memory().await.unwrap();
        assert!(matches!(
            svc(&stores).delete("alice", 7, -1).await,
            Err(ServiceError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let stores = DataStores::in_memory().await.unwrap();
        let svc = svc(&stores);
        assert!(svc.create("alice", create_req("  ")).await.is_err());
        let mut req = create_req("x");
        req.platform_type = Some("nowhere".into());
        assert!(svc.create("alice", req).await.is_err());
        assert!(svc.create("", create_req("x")).await.is_err());
    }
}
