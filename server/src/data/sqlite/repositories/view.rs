//! Saved view repository for SQLite operations
//!
//! Only user views are stored here; system views are injected from config.

use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;
use crate::data::types::{View, ViewPatch};

type ViewTuple = (
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
);

const COLUMNS: &str = "id, workspace_id, enterprise_id, view_name, platform_type, span_list_type, \
     filters, created_by, updated_by, created_at_ms, updated_at_ms";

/// Insert a view and return it with its assigned id
pub async fn create_view(pool: &SqlitePool, view: &View) -> Result<View, SqliteError> {
    let result = sqlx::query(
        r#"
        INSERT INTO views (workspace_id, enterprise_id, view_name, platform_type,
            span_list_type, filters, created_by, updated_by, created_at_ms, updated_at_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(view.workspace_id)
    .bind(&view.enterprise_id)
    .bind(&view.view_name)
    .bind(&view.platform_type)
    .bind(&view.span_list_type)
    .bind(&view.filters)
    .bind(&view.created_by)
    .bind(&view.updated_by)
    .bind(view.created_at_ms)
    .bind(view.updated_at_ms)
    .execute(pool)
    .await
    .map_err(|e| name_conflict(e, &view.view_name))?;

    Ok(View {
        id: result.last_insert_rowid(),
        is_system: false,
        ..view.clone()
    })
}

/// Get a view by id within a workspace
pub async fn get_view(
    pool: &SqlitePool,
    workspace_id: i64,
    id: i64,
) -> Result<Option<View>, SqliteError> {
    let sql = format!(
        "SELECT {} FROM views WHERE workspace_id = ? AND id = ?",
        COLUMNS
    );
    let row = sqlx::query_as::<_, ViewTuple>(&sql)
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(tuple_to_view))
}

/// A user's views in a workspace, newest first
pub async fn list_views(
    pool: &SqlitePool,
    workspace_id: i64,
    created_by: &str,
) -> Result<Vec<View>, SqliteError> {
    let sql = format!(
        "SELECT {} FROM views WHERE workspace_id = ? AND created_by = ? ORDER BY created_at_ms DESC, id DESC",
        COLUMNS
    );
    let rows = sqlx::query_as::<_, ViewTuple>(&sql)
        .bind(workspace_id)
        .bind(created_by)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(tuple_to_view).collect())
}

/// Apply a patch; returns the updated view or None when it does not exist
///
/// `expected_updated_at_ms` guards against a concurrent update: a stale value
/// yields `Conflict`.
pub async fn update_view(
    pool: &SqlitePool,
    workspace_id: i64,
    id: i64,
    patch: &ViewPatch,
    updated_by: &str,
    expected_updated_at_ms: i64,
    now_ms: i64,
) -> Result<Option<View>, SqliteError> {
    let result = sqlx::query(
        r#"
        UPDATE views SET
            view_name = COALESCE(?, view_name),
            platform_type = COALESCE(?, platform_type),
            span_list_type = COALESCE(?, span_list_type),
            filters = COALESCE(?, filters),
            updated_by = ?,
            updated_at_ms = ?
        WHERE workspace_id = ? AND id = ? AND updated_at_ms = ?
        "#,
    )
    .bind(patch.view_name.as_deref())
    .bind(patch.platform_type.as_deref())
    .bind(patch.span_list_type.as_deref())
    .bind(patch.filters.as_deref())
    .bind(updated_by)
    .bind(now_ms)
    .bind(workspace_id)
    .bind(id)
    .bind(expected_updated_at_ms)
    .execute(pool)
    .await
    .map_err(|e| name_conflict(e, patch.view_name.as_deref().unwrap_or_default()))?;

    if result.rows_affected() == 0 {
        return match get_view(pool, workspace_id, id).await? {
            Some(_) => Err(SqliteError::Conflict(format!(
                "view {} was modified concurrently",
                id
            ))),
            None => Ok(None),
        };
    }

    get_view(pool, workspace_id, id).await
}

/// Delete a view; returns true if a row was removed
pub async fn delete_view(pool: &SqlitePool, workspace_id: i64, id: i64) -> Result<bool, SqliteError> {
    let result = sqlx::query("DELETE FROM views WHERE workspace_id = ? AND id = ?")
        .bind(workspace_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn tuple_to_view(row: ViewTuple) -> View {
    let (
        id,
        workspace_id,
        enterprise_id,
        view_name,
        platform_type,
        span_list_type,
        filters,
        created_by,
        updated_by,
        created_at_ms,
        updated_at_ms,
    ) = row;
    View {
        id,
        workspace_id,
        enterprise_id,
        view_name,
        platform_type,
        span_list_type,
        filters,
        is_system: false,
        created_by,
        updated_by,
        created_at_ms,
        updated_at_ms,
    }
}

fn name_conflict(e: sqlx::Error, view_name: &str) -> SqliteError {
    if e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
    {
        SqliteError::Conflict(format!("view name '{}' already exists", view_name))
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteService;

    fn view(name: &str, owner: &str) -> View {
        View {
            id: 0,
            workspace_id: 7,
            enterprise_id: String::new(),
            view_name: name.to_string(),
            platform_type: "cozeloop".to_string(),
            span_list_type: "root".to_string(),
            filters: r#"{"filter_fields":[]}"#.to_string(),
            is_system: false,
            created_by: owner.to_string(),
            updated_by: owner.to_string(),
            created_at_ms: 100,
            updated_at_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_per_owner() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let a = create_view(db.pool(), &view("errors", "u1")).await.unwrap();
        create_view(db.pool(), &view("errors", "u2")).await.unwrap();
        assert!(a.id > 0);

        let mine = list_views(db.pool(), 7, "u1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0], a);

        let dup = create_view(db.pool(), &view("errors", "u1")).await;
        assert!(matches!(dup, Err(SqliteError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let a = create_view(db.pool(), &view("slow", "u1")).await.unwrap();
        let patch = ViewPatch {
            filters: Some(String::from("{}")),
            ..Default::default()
        };
        let updated = update_view(db.pool(), 7, a.id, &patch, "u1", 100, 200)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.view_name, "slow");
        assert_eq!(updated.filters, "{}");
        assert_eq!(updated.updated_at_ms, 200);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let a = create_view(db.pool(), &view("slow", "u1")).await.unwrap();
        let patch = ViewPatch {
            view_name: Some("slower".into()),
            ..Default::default()
        };
        update_view(db.pool(), 7, a.id, &patch, "u1", 100, 200)
            .await
            .unwrap();
        let stale = update_view(db.pool(), 7, a.id, &patch, "u1", 100, 300).await;
        assert!(matches!(stale, Err(SqliteError::Conflict(_))));

        let missing = update_view(db.pool(), 7, 999, &patch, "u1", 100, 300)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_view() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let a = create_view(db.pool(), &view("x", "u1")).await.unwrap();
        assert!(delete_view(db.pool(), 7, a.id).await.unwrap());
        assert!(!delete_view(db.pool(), 7, a.id).await.unwrap());
        assert!(get_view(db.pool(), 7, a.id).await.unwrap().is_none());
    }
}
