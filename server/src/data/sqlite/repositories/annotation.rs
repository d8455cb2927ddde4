//! Annotation repository for SQLite operations
//!
//! One row per logical annotation. The value union is spread over four typed
//! columns and corrections are kept as a JSON array that only ever grows.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::data::sqlite::SqliteError;
use crate::data::types::{
    Annotation, AnnotationKey, AnnotationStatus, AnnotationValue, AnnotationValueType,
    AutoEvaluateMeta, Correction,
};

const COLUMNS: &str = "id, workspace_id, trace_id, span_id, start_time_ms, annotation_type, \
     annotation_key, value_type, long_value, double_value, string_value, bool_value, reasoning, \
     status, corrections, auto_evaluate, created_by, updated_by, created_at_ms, updated_at_ms";

/// Insert a new annotation
///
/// A second live annotation under the same `(trace_id, span_id, key)` is
/// reported as `Conflict`.
pub async fn insert_annotation(pool: &SqlitePool, annotation: &Annotation) -> Result<(), SqliteError> {
    let (long, double, string, boolean) = annotation.value.to_columns();
    let corrections = encode_json(&annotation.corrections)?;
    let auto_evaluate = annotation
        .auto_evaluate
        .as_ref()
        .map(encode_json)
        .transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO annotations (id, workspace_id, trace_id, span_id, start_time_ms,
            annotation_type, annotation_key, value_type, long_value, double_value,
            string_value, bool_value, reasoning, status, corrections, auto_evaluate,
            created_by, updated_by, created_at_ms, updated_at_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&annotation.id)
    .bind(&annotation.workspace_id)
    .bind(&annotation.trace_id)
    .bind(&annotation.span_id)
    .bind(annotation.start_time_ms)
    .bind(annotation.annotation_type.as_str())
    .bind(&annotation.key)
    .bind(annotation.value.value_type().as_str())
    .bind(long)
    .bind(double)
    .bind(string)
    .bind(boolean)
    .bind(&annotation.reasoning)
    .bind(annotation.status.as_str())
    .bind(corrections)
    .bind(auto_evaluate)
    .bind(&annotation.created_by)
    .bind(&annotation.updated_by)
    .bind(annotation.created_at_ms)
    .bind(annotation.updated_at_ms)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(SqliteError::Conflict(format!(
            "live annotation '{}' already exists on span {}/{}",
            annotation.key, annotation.trace_id, annotation.span_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Overwrite the mutable part of an annotation; returns false if the id is unknown
pub async fn update_annotation(pool: &SqlitePool, annotation: &Annotation) -> Result<bool, SqliteError> {
    let (long, double, string, boolean) = annotation.value.to_columns();
    let corrections = encode_json(&annotation.corrections)?;
    let auto_evaluate = annotation
        .auto_evaluate
        .as_ref()
        .map(encode_json)
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE annotations SET value_type = ?, long_value = ?, double_value = ?,
            string_value = ?, bool_value = ?, reasoning = ?, status = ?, corrections = ?,
            auto_evaluate = ?, updated_by = ?, updated_at_ms = ?
        WHERE id = ? AND workspace_id = ?
        "#,
    )
    .bind(annotation.value.value_type().as_str())
    .bind(long)
    .bind(double)
    .bind(string)
    .bind(boolean)
    .bind(&annotation.reasoning)
    .bind(annotation.status.as_str())
    .bind(corrections)
    .bind(auto_evaluate)
    .bind(&annotation.updated_by)
    .bind(annotation.updated_at_ms)
    .bind(&annotation.id)
    .bind(&annotation.workspace_id)
    .execute(pool)
    .await;

    match result {
        Ok(r) => Ok(r.rows_affected() > 0),
        Err(e) if is_unique_violation(&e) => Err(SqliteError::Conflict(format!(
            "live annotation '{}' already exists on span {}/{}",
            annotation.key, annotation.trace_id, annotation.span_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Get an annotation by id, live or deleted
pub async fn get_annotation(
    pool: &SqlitePool,
    workspace_id: &str,
    id: &str,
) -> Result<Option<Annotation>, SqliteError> {
    let sql = format!(
        "SELECT {} FROM annotations WHERE workspace_id = ? AND id = ?",
        COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_annotation).transpose()
}

/// The live annotation stored under a logical key, if any
pub async fn find_live_by_key(
    pool: &SqlitePool,
    key: &AnnotationKey,
) -> Result<Option<Annotation>, SqliteError> {
    let sql = format!(
        "SELECT {} FROM annotations WHERE workspace_id = ? AND trace_id = ? AND span_id = ? \
         AND annotation_key = ? AND status = 'normal'",
        COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(&key.workspace_id)
        .bind(&key.trace_id)
        .bind(&key.span_id)
        .bind(&key.key)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_annotation).transpose()
}

/// Live annotations of one span
///
/// Ordered by `updated_at_ms DESC` when `desc_by_updated_at`, else by creation.
pub async fn list_for_span(
    pool: &SqlitePool,
    workspace_id: &str,
    trace_id: &str,
    span_id: &str,
    start_time_ms: Option<i64>,
    desc_by_updated_at: bool,
) -> Result<Vec<Annotation>, SqliteError> {
    let order = if desc_by_updated_at {
        "updated_at_ms DESC, id"
    } else {
        "created_at_ms ASC, id"
    };
    let time_clause = if start_time_ms.is_some() {
        " AND start_time_ms = ?"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {} FROM annotations WHERE workspace_id = ? AND trace_id = ? AND span_id = ? \
         AND status = 'normal'{} ORDER BY {}",
        COLUMNS, time_clause, order
    );

    let mut query = sqlx::query(&sql).bind(workspace_id).bind(trace_id).bind(span_id);
    if let Some(start) = start_time_ms {
        query = query.bind(start);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_annotation).collect()
}

/// Live annotations of many spans in one trace-agnostic lookup
pub async fn list_for_spans(
    pool: &SqlitePool,
    workspace_id: &str,
    span_ids: &[String],
) -> Result<Vec<Annotation>, SqliteError> {
    if span_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; span_ids.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM annotations WHERE workspace_id = ? AND span_id IN ({}) \
         AND status = 'normal' ORDER BY created_at_ms ASC, id",
        COLUMNS, placeholders
    );

    let mut query = sqlx::query(&sql).bind(workspace_id);
    for span_id in span_ids {
        query = query.bind(span_id);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_annotation).collect()
}

/// Mark an annotation deleted; returns false when no live row matched
pub async fn soft_delete(
    pool: &SqlitePool,
    workspace_id: &str,
    id: &str,
    updated_by: &str,
    now_ms: i64,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE annotations SET status = 'deleted', updated_by = ?, updated_at_ms = ? \
         WHERE workspace_id = ? AND id = ? AND status = 'normal'",
    )
    .bind(updated_by)
    .bind(now_ms)
    .bind(workspace_id)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark the live annotation under a logical key deleted
pub async fn soft_delete_by_key(
    pool: &SqlitePool,
    key: &AnnotationKey,
    updated_by: &str,
    now_ms: i64,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE annotations SET status = 'deleted', updated_by = ?, updated_at_ms = ? \
         WHERE workspace_id = ? AND trace_id = ? AND span_id = ? AND annotation_key = ? \
         AND status = 'normal'",
    )
    .bind(updated_by)
    .bind(now_ms)
    .bind(&key.workspace_id)
    .bind(&key.trace_id)
    .bind(&key.span_id)
    .bind(&key.key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Row mapping
// ============================================================================

fn row_to_annotation(row: &SqliteRow) -> Result<Annotation, SqliteError> {
    let id: String = row.try_get("id")?;
    let corrupt = |what: String| SqliteError::corrupt(format!("annotation {}: {}", id, what));

    let value_type: AnnotationValueType = row
        .try_get::<String, _>("value_type")?
        .parse()
        .map_err(corrupt)?;
    let value = AnnotationValue::from_columns(
        value_type,
        (
            row.try_get("long_value")?,
            row.try_get("double_value")?,
            row.try_get("string_value")?,
            row.try_get("bool_value")?,
        ),
    )
    .map_err(corrupt)?;

    let corrections: Vec<Correction> =
        serde_json::from_str(&row.try_get::<String, _>("corrections")?)
            .map_err(|e| corrupt(e.to_string()))?;
    let auto_evaluate: Option<AutoEvaluateMeta> = row
        .try_get::<Option<String>, _>("auto_evaluate")?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;
    let status: AnnotationStatus = row
        .try_get::<String, _>("status")?
        .parse()
        .map_err(corrupt)?;

    Ok(Annotation {
        workspace_id: row.try_get("workspace_id")?,
        trace_id: row.try_get("trace_id")?,
        span_id: row.try_get("span_id")?,
        start_time_ms: row.try_get("start_time_ms")?,
        annotation_type: row
            .try_get::<String, _>("annotation_type")?
            .parse()
            .map_err(corrupt)?,
        key: row.try_get("annotation_key")?,
        value,
        reasoning: row.try_get("reasoning")?,
        status,
        corrections,
        auto_evaluate,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        created_at_ms: row.try_get("created_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
        id,
    })
}

fn encode_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, SqliteError> {
    serde_json::to_string(value).map_err(SqliteError::corrupt)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteService;
    use crate::data::types::{AnnotationType, CorrectionType};

    fn annotation(id: &str, key: &str, value: AnnotationValue) -> Annotation {
        Annotation {
            id: id.to_string(),
            workspace_id: "7".to_string(),
            trace_id: "T1".to_string(),
            span_id: "S1".to_string(),
            start_time_ms: 1000,
            annotation_type: AnnotationType::ManualFeedback,
            key: key.to_string(),
            value,
            reasoning: String::new(),
            status: AnnotationStatus::Normal,
            corrections: Vec::new(),
            auto_evaluate: None,
            created_by: "u1".to_string(),
            updated_by: "u1".to_string(),
            created_at_ms: 10,
            updated_at_ms: 10,
        }
    }

    fn span_key(key: &str) -> AnnotationKey {
        AnnotationKey {
            workspace_id: "7".into(),
            trace_id: "T1".into(),
            span_id: "S1".into(),
            key: key.into(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_each_value_type() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let values = [
            AnnotationValue::Long(3),
            AnnotationValue::Double(0.75),
            AnnotationValue::String("like".into()),
            AnnotationValue::Bool(true),
        ];
        for (i, value) in values.iter().enumerate() {
            let a = annotation(&format!("a{}", i), &format!("k{}", i), value.clone());
            insert_annotation(db.pool(), &a).await.unwrap();
            let back = get_annotation(db.pool(), "7", &a.id).await.unwrap().unwrap();
            assert_eq!(back, a);
        }
    }

    #[tokio::test]
    async fn test_duplicate_live_key_conflicts() {
        let db = SqliteService::open_in_memory().await.unwrap();
        insert_annotation(db.pool(), &annotation("a1", "k", AnnotationValue::Long(1)))
            .await
            .unwrap();
        let err = insert_annotation(db.pool(), &annotation("a2", "k", AnnotationValue::Long(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, SqliteError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_recreate_after_delete_gets_new_row() {
        let db = SqliteService::open_in_memory().await.unwrap();
        insert_annotation(db.pool(), &annotation("a1", "k", AnnotationValue::Long(1)))
            .await
            .unwrap();
        assert!(soft_delete_by_key(db.pool(), &span_key("k"), "u2", 20).await.unwrap());
        assert!(find_live_by_key(db.pool(), &span_key("k")).await.unwrap().is_none());

        insert_annotation(db.pool(), &annotation("a2", "k", AnnotationValue::Long(2)))
            .await
            .unwrap();
        let live = find_live_by_key(db.pool(), &span_key("k")).await.unwrap().unwrap();
        assert_eq!(live.id, "a2");

        let old = get_annotation(db.pool(), "7", "a1").await.unwrap().unwrap();
        assert_eq!(old.status, AnnotationStatus::Deleted);
        assert_eq!(old.updated_by, "u2");
    }

    #[tokio::test]
    async fn test_update_keeps_corrections() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut a = annotation("a1", "k", AnnotationValue::Double(0.2));
        a.annotation_type = AnnotationType::AutoEvaluate;
        a.auto_evaluate = Some(AutoEvaluateMeta {
            evaluator_version_id: 5,
            task_id: 6,
            evaluator_record_id: 7,
        });
        insert_annotation(db.pool(), &a).await.unwrap();

        a.corrections.push(Correction {
            value: AnnotationValue::Double(0.9),
            reasoning: "too low".into(),
            correction_type: CorrectionType::Manual,
            updated_by: "u2".into(),
            updated_at_ms: 30,
        });
        a.updated_at_ms = 30;
        assert!(update_annotation(db.pool(), &a).await.unwrap());

        let back = get_annotation(db.pool(), "7", "a1").await.unwrap().unwrap();
        assert_eq!(back.value, AnnotationValue::Double(0.2));
        assert_eq!(back.corrections.len(), 1);
        assert_eq!(back.auto_evaluate.map(|m| m.task_id), Some(6));
    }

    #[tokio::test]
    async fn test_list_for_span_ordering() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut first = annotation("a1", "k1", AnnotationValue::Long(1));
        first.updated_at_ms = 50;
        let mut second = annotation("a2", "k2", AnnotationValue::Long(2));
        second.created_at_ms = 20;
        second.updated_at_ms = 20;
        insert_annotation(db.pool(), &first).await.unwrap();
        insert_annotation(db.pool(), &second).await.unwrap();

        let by_create = list_for_span(db.pool(), "7", "T1", "S1", None, false).await.unwrap();
        assert_eq!(by_create.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), ["a1", "a2"]);

        let by_update = list_for_span(db.pool(), "7", "T1", "S1", Some(1000), true)
            .await
            .unwrap();
        assert_eq!(by_update.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), ["a1", "a2"]);

        assert!(list_for_span(db.pool(), "7", "T1", "S1", Some(5), false)
            .await
            .unwrap()
            .is_empty());

        assert!(soft_delete(db.pool(), "7", "a1", "u1", 60).await.unwrap());
        assert!(!soft_delete(db.pool(), "7", "a1", "u1", 61).await.unwrap());
        let spans = list_for_spans(db.pool(), "7", &["S1".to_string()]).await.unwrap();
        assert_eq!(spans.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_value_columns_reported() {
        let db = SqliteService::open_in_memory().await.unwrap();
        insert_annotation(db.pool(), &annotation("a1", "k", AnnotationValue::Long(1)))
            .await
            .unwrap();
        sqlx::query("UPDATE annotations SET value_type = 'double' WHERE id = 'a1'")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(matches!(
            get_annotation(db.pool(), "7", "a1").await,
            Err(SqliteError::CorruptRow(_))
        ));
    }
}
