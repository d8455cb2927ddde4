//! Experiment repository for SQLite operations
//!
//! Experiments, their per-turn results and the cached aggregate. Nested
//! configuration and result payloads are stored as JSON text.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::data::sqlite::SqliteError;
use crate::data::types::{
    AggregateResult, Experiment, ExptFilterFields, ExptListFilter, ExptStats, ExptStatusChange,
    ListExperimentsParams, TurnResult, TurnRunState,
};

const EXPERIMENT_COLUMNS: &str = "id, workspace_id, name, description, creator, eval_set_id, \
     eval_set_version_id, target_id, target_version_id, target_type, evaluator_version_ids, \
     expt_type, source_type, source_id, status, status_message, max_alive_time_ms, start_at_ms, \
     end_at_ms, eval_conf, stats, created_at_ms, updated_at_ms";

const TURN_COLUMNS: &str = "experiment_id, item_id, turn_id, item_index, turn_index, inputs, \
     state, target_output, evaluator_records, annotations, is_err, retry, stable, code, error_message, \
     input_tokens, output_tokens, created_at_ms, updated_at_ms";

const TURN_COLUMN_COUNT: usize = 19;

// ============================================================================
// Experiments
// ============================================================================

/// Insert an experiment and return it with its assigned id
pub async fn create_experiment(
    pool: &SqlitePool,
    experiment: &Experiment,
) -> Result<Experiment, SqliteError> {
    let result = sqlx::query(
        r#"
        INSERT INTO experiments (workspace_id, name, description, creator, eval_set_id,
            eval_set_version_id, target_id, target_version_id, target_type,
            evaluator_version_ids, expt_type, source_type, source_id, status, status_message,
            max_alive_time_ms, start_at_ms, end_at_ms, eval_conf, stats, created_at_ms,
            updated_at_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(experiment.workspace_id)
    .bind(&experiment.name)
    .bind(&experiment.description)
    .bind(&experiment.creator)
    .bind(experiment.eval_set_id)
    .bind(experiment.eval_set_version_id)
    .bind(experiment.target_id)
    .bind(experiment.target_version_id)
    .bind(&experiment.target_type)
    .bind(encode_json(&experiment.evaluator_version_ids)?)
    .bind(experiment.expt_type.as_str())
    .bind(experiment.source_type.as_str())
    .bind(&experiment.source_id)
    .bind(experiment.status.as_str())
    .bind(&experiment.status_message)
    .bind(experiment.max_alive_time_ms)
    .bind(experiment.start_at_ms)
    .bind(experiment.end_at_ms)
    .bind(encode_json(&experiment.eval_conf)?)
    .bind(encode_json(&experiment.stats)?)
    .bind(experiment.created_at_ms)
    .bind(experiment.updated_at_ms)
    .execute(pool)
    .await;

    match result {
        Ok(r) => Ok(Experiment {
            id: r.last_insert_rowid(),
            ..experiment.clone()
        }),
        Err(e)
            if e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation()) =>
        {
            Err(SqliteError::Conflict(format!(
                "experiment name '{}' already exists",
                experiment.name
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_experiment(pool: &SqlitePool, id: i64) -> Result<Option<Experiment>, SqliteError> {
    let sql = format!("SELECT {} FROM experiments WHERE id = ?", EXPERIMENT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(row_to_experiment).transpose()
}

/// Compare-and-set status transition
///
/// Succeeds only while the stored status is one of `change.from`. Message and
/// timestamps are written only when given.
pub async fn transition_status(
    pool: &SqlitePool,
    id: i64,
    change: &ExptStatusChange,
    now_ms: i64,
) -> Result<bool, SqliteError> {
    if change.from.is_empty() {
        return Ok(false);
    }
    let sql = format!(
        "UPDATE experiments SET status = ?, status_message = COALESCE(?, status_message), \
         start_at_ms = COALESCE(?, start_at_ms), end_at_ms = COALESCE(?, end_at_ms), \
         updated_at_ms = ? WHERE id = ? AND status IN ({})",
        placeholders(change.from.len())
    );
    let mut query = sqlx::query(&sql)
        .bind(change.to.as_str())
        .bind(change.status_message.as_deref())
        .bind(change.start_at_ms)
        .bind(change.end_at_ms)
        .bind(now_ms)
        .bind(id);
    for status in &change.from {
        query = query.bind(status.as_str());
    }
    let result = query.execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_stats(
    pool: &SqlitePool,
    id: i64,
    stats: &ExptStats,
    now_ms: i64,
) -> Result<(), SqliteError> {
    sqlx::query("UPDATE experiments SET stats = ?, updated_at_ms = ? WHERE id = ?")
        .bind(encode_json(stats)?)
        .bind(now_ms)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Experiments still being driven (processing or draining)
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Experiment>, SqliteError> {
    let sql = format!(
        "SELECT {} FROM experiments WHERE status IN ('processing', 'draining') ORDER BY id",
        EXPERIMENT_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_experiment).collect()
}

/// Filtered, paginated listing, newest first; returns the page and the total
pub async fn list_experiments(
    pool: &SqlitePool,
    params: &ListExperimentsParams,
) -> Result<(Vec<Experiment>, u64), SqliteError> {
    let mut clauses = vec!["workspace_id = ?".to_string()];
    let mut args = vec![Arg::Int(params.workspace_id)];
    push_filter(&mut clauses, &mut args, &params.filter);
    let where_sql = clauses.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM experiments WHERE {}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for arg in &args {
        count_query = match arg {
            Arg::Int(v) => count_query.bind(*v),
            Arg::Text(v) => count_query.bind(v.clone()),
        };
    }
    let total = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT {} FROM experiments WHERE {} ORDER BY created_at_ms DESC, id DESC LIMIT ? OFFSET ?",
        EXPERIMENT_COLUMNS, where_sql
    );
    let mut list_query = sqlx::query(&list_sql);
    for arg in &args {
        list_query = match arg {
            Arg::Int(v) => list_query.bind(*v),
            Arg::Text(v) => list_query.bind(v.clone()),
        };
    }
    let rows = list_query
        .bind(params.limit as i64)
        .bind(params.offset as i64)
        .fetch_all(pool)
        .await?;

    let experiments = rows
        .iter()
        .map(row_to_experiment)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((experiments, total.max(0) as u64))
}

// ============================================================================
// Filter pushdown
// ============================================================================

enum Arg {
    Int(i64),
    Text(String),
}

fn push_filter(clauses: &mut Vec<String>, args: &mut Vec<Arg>, filter: &ExptListFilter) {
    push_dimensions(clauses, args, &filter.includes, true);
    push_dimensions(clauses, args, &filter.excludes, false);

    if let Some(name) = filter.fuzzy_name.as_deref().filter(|n| !n.is_empty()) {
        clauses.push("name LIKE ? ESCAPE '\\'".to_string());
        args.push(Arg::Text(format!("%{}%", escape_like(name))));
    }
}

fn push_dimensions(
    clauses: &mut Vec<String>,
    args: &mut Vec<Arg>,
    fields: &ExptFilterFields,
    include: bool,
) {
    let text = |values: &Option<Vec<String>>| {
        values
            .as_ref()
            .map(|v| v.iter().cloned().map(Arg::Text).collect::<Vec<_>>())
    };
    let ints = |values: &Option<Vec<i64>>| {
        values
            .as_ref()
            .map(|v| v.iter().copied().map(Arg::Int).collect::<Vec<_>>())
    };
    let labels = |values: Option<Vec<&'static str>>| {
        values.map(|v| {
            v.into_iter()
                .map(|s| Arg::Text(s.to_string()))
                .collect::<Vec<_>>()
        })
    };

    let dimensions: [(&str, Option<Vec<Arg>>); 8] = [
        ("creator", text(&fields.creators)),
        (
            "status",
            labels(
                fields
                    .statuses
                    .as_ref()
                    .map(|v| v.iter().map(|s| s.as_str()).collect()),
            ),
        ),
        ("eval_set_id", ints(&fields.eval_set_ids)),
        ("target_id", ints(&fields.target_ids)),
        ("target_type", text(&fields.target_types)),
        (
            "expt_type",
            labels(
                fields
                    .expt_types
                    .as_ref()
                    .map(|v| v.iter().map(|s| s.as_str()).collect()),
            ),
        ),
        (
            "source_type",
            labels(
                fields
                    .source_types
                    .as_ref()
                    .map(|v| v.iter().map(|s| s.as_str()).collect()),
            ),
        ),
        ("source_id", text(&fields.source_ids)),
    ];

    for (column, values) in dimensions {
        if let Some(values) = values {
            push_membership(clauses, args, column, values, include);
        }
    }

    if let Some(ids) = ints(&fields.evaluator_version_ids) {
        if ids.is_empty() {
            if include {
                clauses.push("1 = 0".to_string());
            }
        } else {
            clauses.push(format!(
                "{}EXISTS (SELECT 1 FROM json_each(evaluator_version_ids) WHERE value IN ({}))",
                if include { "" } else { "NOT " },
                placeholders(ids.len())
            ));
            args.extend(ids);
        }
    }
}

/// `Some(empty)` as an include matches nothing; as an exclude it is a no-op
fn push_membership(
    clauses: &mut Vec<String>,
    args: &mut Vec<Arg>,
    column: &str,
    values: Vec<Arg>,
    include: bool,
) {
    if values.is_empty() {
        if include {
            clauses.push("1 = 0".to_string());
        }
        return;
    }
    clauses.push(format!(
        "{} {} ({})",
        column,
        if include { "IN" } else { "NOT IN" },
        placeholders(values.len())
    ));
    args.extend(values);
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// ============================================================================
// Turn results
// ============================================================================

/// Seed queued turns; rows that already exist are left untouched
pub async fn insert_turns_if_absent(
    pool: &SqlitePool,
    turns: &[TurnResult],
) -> Result<u64, SqliteError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for turn in turns {
        let sql = format!(
            "INSERT OR IGNORE INTO experiment_turn_results ({}) VALUES ({})",
            TURN_COLUMNS,
            placeholders(TURN_COLUMN_COUNT)
        );
        let result = bind_turn(sqlx::query(&sql), turn)?
            .execute(&mut *tx)
            .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Insert or fully replace one turn result
pub async fn upsert_turn_result(pool: &SqlitePool, turn: &TurnResult) -> Result<(), SqliteError> {
    let sql = format!(
        "INSERT INTO experiment_turn_results ({}) VALUES ({}) \
         ON CONFLICT(experiment_id, item_id, turn_id) DO UPDATE SET \
         item_index = excluded.item_index, turn_index = excluded.turn_index, \
         state = excluded.state, target_output = excluded.target_output, \
         evaluator_records = excluded.evaluator_records, annotations = excluded.annotations, \
         is_err = excluded.is_err, retry = excluded.retry, stable = excluded.stable, \
         code = excluded.code, error_message = excluded.error_message, \
         input_tokens = excluded.input_tokens, output_tokens = excluded.output_tokens, \
         updated_at_ms = excluded.updated_at_ms",
        TURN_COLUMNS,
        placeholders(TURN_COLUMN_COUNT)
    );
    bind_turn(sqlx::query(&sql), turn)?.execute(pool).await?;
    Ok(())
}

/// All turn results of an experiment in item/turn order
pub async fn list_turn_results(
    pool: &SqlitePool,
    experiment_id: i64,
) -> Result<Vec<TurnResult>, SqliteError> {
    let sql = format!(
        "SELECT {} FROM experiment_turn_results WHERE experiment_id = ? ORDER BY item_index, turn_index",
        TURN_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(experiment_id).fetch_all(pool).await?;
    rows.iter().map(row_to_turn).collect()
}

/// Turns stuck in `processing` since before `updated_before_ms`, across experiments
pub async fn list_stale_turns(
    pool: &SqlitePool,
    updated_before_ms: i64,
) -> Result<Vec<TurnResult>, SqliteError> {
    let sql = format!(
        "SELECT {} FROM experiment_turn_results WHERE state = 'processing' AND updated_at_ms < ? \
         ORDER BY experiment_id, item_index, turn_index",
        TURN_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(updated_before_ms)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_turn).collect()
}

/// Move every turn of an experiment in `from` state to `to`
pub async fn transition_turns(
    pool: &SqlitePool,
    experiment_id: i64,
    from: TurnRunState,
    to: TurnRunState,
    now_ms: i64,
) -> Result<u64, SqliteError> {
    let result = sqlx::query(
        "UPDATE experiment_turn_results SET state = ?, updated_at_ms = ? \
         WHERE experiment_id = ? AND state = ?",
    )
    .bind(to.as_str())
    .bind(now_ms)
    .bind(experiment_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Aggregates
// ============================================================================

pub async fn save_aggregate(pool: &SqlitePool, aggregate: &AggregateResult) -> Result<(), SqliteError> {
    sqlx::query(
        "INSERT INTO experiment_aggregates (experiment_id, result, updated_at_ms) VALUES (?, ?, ?) \
         ON CONFLICT(experiment_id) DO UPDATE SET result = excluded.result, \
         updated_at_ms = excluded.updated_at_ms",
    )
    .bind(aggregate.experiment_id)
    .bind(encode_json(aggregate)?)
    .bind(aggregate.updated_at_ms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_aggregate(
    pool: &SqlitePool,
    experiment_id: i64,
) -> Result<Option<AggregateResult>, SqliteError> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT result FROM experiment_aggregates WHERE experiment_id = ?")
            .bind(experiment_id)
            .fetch_optional(pool)
            .await?;
    raw.map(|r| {
        serde_json::from_str(&r)
            .map_err(|e| SqliteError::corrupt(format!("aggregate {}: {}", experiment_id, e)))
    })
    .transpose()
}

// ============================================================================
// Row mapping
// ============================================================================

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_turn<'q>(query: SqliteQuery<'q>, turn: &'q TurnResult) -> Result<SqliteQuery<'q>, SqliteError> {
    Ok(query
        .bind(turn.experiment_id)
        .bind(turn.item_id)
        .bind(turn.turn_id)
        .bind(turn.item_index)
        .bind(turn.turn_index)
        .bind(encode_json(&turn.inputs)?)
        .bind(turn.state.as_str())
        .bind(encode_json(&turn.target_output)?)
        .bind(encode_json(&turn.evaluator_records)?)
        .bind(encode_json(&turn.annotations)?)
        .bind(turn.is_err)
        .bind(turn.retry as i64)
        .bind(turn.stable)
        .bind(turn.code)
        .bind(&turn.error_message)
        .bind(turn.input_tokens)
        .bind(turn.output_tokens)
        .bind(turn.created_at_ms)
        .bind(turn.updated_at_ms))
}

fn row_to_experiment(row: &SqliteRow) -> Result<Experiment, SqliteError> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |what: String| SqliteError::corrupt(format!("experiment {}: {}", id, what));
    let json = |column: &str| -> Result<String, SqliteError> { Ok(row.try_get(column)?) };

    Ok(Experiment {
        id,
        workspace_id: row.try_get("workspace_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        creator: row.try_get("creator")?,
        eval_set_id: row.try_get("eval_set_id")?,
        eval_set_version_id: row.try_get("eval_set_version_id")?,
        target_id: row.try_get("target_id")?,
        target_version_id: row.try_get("target_version_id")?,
        target_type: row.try_get("target_type")?,
        evaluator_version_ids: serde_json::from_str(&json("evaluator_version_ids")?)
            .map_err(|e| corrupt(e.to_string()))?,
        expt_type: row
            .try_get::<String, _>("expt_type")?
            .parse()
            .map_err(corrupt)?,
        source_type: row
            .try_get::<String, _>("source_type")?
            .parse()
            .map_err(corrupt)?,
        source_id: row.try_get("source_id")?,
        status: row
            .try_get::<String, _>("status")?
            .parse()
            .map_err(corrupt)?,
        status_message: row.try_get("status_message")?,
        max_alive_time_ms: row.try_get("max_alive_time_ms")?,
        start_at_ms: row.try_get("start_at_ms")?,
        end_at_ms: row.try_get("end_at_ms")?,
        eval_conf: serde_json::from_str(&json("eval_conf")?).map_err(|e| corrupt(e.to_string()))?,
        stats: serde_json::from_str(&json("stats")?).map_err(|e| corrupt(e.to_string()))?,
        created_at_ms: row.try_get("created_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

fn row_to_turn(row: &SqliteRow) -> Result<TurnResult, SqliteError> {
    let experiment_id: i64 = row.try_get("experiment_id")?;
    let item_id: i64 = row.try_get("item_id")?;
    let turn_id: i64 = row.try_get("turn_id")?;
    let corrupt = |what: String| {
        SqliteError::corrupt(format!(
            "turn {}/{}/{}: {}",
            experiment_id, item_id, turn_id, what
        ))
    };
    let json = |column: &str| -> Result<String, SqliteError> { Ok(row.try_get(column)?) };

    Ok(TurnResult {
        experiment_id,
        item_id,
        turn_id,
        item_index: row.try_get("item_index")?,
        turn_index: row.try_get("turn_index")?,
        inputs: serde_json::from_str(&json("inputs")?).map_err(|e| corrupt(e.to_string()))?,
        state: row
            .try_get::<String, _>("state")?
            .parse()
            .map_err(corrupt)?,
        target_output: serde_json::from_str(&json("target_output")?)
            .map_err(|e| corrupt(e.to_string()))?,
        evaluator_records: serde_json::from_str(&json("evaluator_records")?)
            .map_err(|e| corrupt(e.to_string()))?,
        annotations: serde_json::from_str(&json("annotations")?)
            .map_err(|e| corrupt(e.to_string()))?,
        is_err: row.try_get("is_err")?,
        retry: u32::try_from(row.try_get::<i64, _>("retry")?).unwrap_or(u32::MAX),
        stable: row.try_get("stable")?,
        code: row.try_get("code")?,
        error_message: row.try_get("error_message")?,
        input_tokens: row.try_get("input_tokens")?,
        output_tokens: row.try_get("output_tokens")?,
        created_at_ms: row.try_get("created_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

fn encode_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, SqliteError> {
    serde_json::to_string(value).map_err(SqliteError::corrupt)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteService;
    use crate::data::types::{EvalConf, EvaluatorRecord, ExptStatus, ExptType, SourceType};

    fn experiment(name: &str, eval_set_id: i64, evaluators: Vec<i64>) -> Experiment {
        Experiment {
            id: 0,
            workspace_id: 7,
            name: name.to_string(),
            description: String::new(),
            creator: "u1".to_string(),
            eval_set_id,
            eval_set_version_id: 1,
            target_id: 3,
            target_version_id: 4,
            target_type: "prompt".to_string(),
            evaluator_version_ids: evaluators,
            expt_type: ExptType::Offline,
            source_type: SourceType::Evaluation,
            source_id: String::new(),
            status: ExptStatus::Pending,
            status_message: String::new(),
            max_alive_time_ms: 60_000,
            start_at_ms: None,
            end_at_ms: None,
            eval_conf: EvalConf::default(),
            stats: ExptStats::default(),
            created_at_ms: 100,
            updated_at_ms: 100,
        }
    }

    fn turn(experiment_id: i64, item_id: i64, state: TurnRunState, updated_at_ms: i64) -> TurnResult {
        TurnResult {
            experiment_id,
            item_id,
            turn_id: 1,
            item_index: item_id,
            turn_index: 0,
            state,
            stable: true,
            created_at_ms: 0,
            updated_at_ms,
            ..Default::default()
        }
    }

    fn params(filter: ExptListFilter) -> ListExperimentsParams {
        ListExperimentsParams {
            workspace_id: 7,
            filter,
            offset: 0,
            limit: 50,
        }
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate_name() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let created = create_experiment(db.pool(), &experiment("e1", 10, vec![1, 2]))
            .await
            .unwrap();
        let back = get_experiment(db.pool(), created.id).await.unwrap().unwrap();
        assert_eq!(back, created);

        let dup = create_experiment(db.pool(), &experiment("e1", 11, vec![])).await;
        assert!(matches!(dup, Err(SqliteError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_transition_status_is_compare_and_set() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let e = create_experiment(db.pool(), &experiment("e1", 10, vec![]))
            .await
            .unwrap();

        let start = |at: i64| ExptStatusChange {
            from: vec![ExptStatus::Pending],
            to: ExptStatus::Processing,
            start_at_ms: Some(at),
            ..Default::default()
        };
        assert!(transition_status(db.pool(), e.id, &start(500), 500).await.unwrap());
        assert!(!transition_status(db.pool(), e.id, &start(600), 600).await.unwrap());

        let active = list_active(db.pool()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].start_at_ms, Some(500));
    }

    #[tokio::test]
    async fn test_list_filters_pushdown() {
        let db = SqliteService::open_in_memory().await.unwrap();
        create_experiment(db.pool(), &experiment("alpha run", 10, vec![1]))
            .await
            .unwrap();
        create_experiment(db.pool(), &experiment("beta run", 11, vec![2, 3]))
            .await
            .unwrap();
        create_experiment(db.pool(), &experiment("gamma_x", 12, vec![3]))
            .await
            .unwrap();

        let (all, total) = list_experiments(db.pool(), &params(ExptListFilter::default()))
            .await
            .unwrap();
        assert_eq!((all.len(), total), (3, 3));

        let mut filter = ExptListFilter::default();
        filter.includes.eval_set_ids = Some(vec![11, 12]);
        filter.excludes.evaluator_version_ids = Some(vec![2]);
        let (page, total) = list_experiments(db.pool(), &params(filter)).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].name, "gamma_x");

        let mut filter = ExptListFilter::default();
        filter.includes.evaluator_version_ids = Some(vec![3]);
        let (_, total) = list_experiments(db.pool(), &params(filter)).await.unwrap();
        assert_eq!(total, 2);

        let mut filter = ExptListFilter::default();
        filter.includes.target_ids = Some(vec![]);
        let (_, total) = list_experiments(db.pool(), &params(filter)).await.unwrap();
        assert_eq!(total, 0);

        let filter = ExptListFilter {
            fuzzy_name: Some("_".into()),
            ..Default::default()
        };
        let (page, _) = list_experiments(db.pool(), &params(filter)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "gamma_x");
    }

    #[tokio::test]
    async fn test_turn_results_lifecycle() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let e = create_experiment(db.pool(), &experiment("e1", 10, vec![1]))
            .await
            .unwrap();

        let seeded = vec![
            turn(e.id, 1, TurnRunState::Queueing, 0),
            turn(e.id, 2, TurnRunState::Queueing, 0),
        ];
        assert_eq!(insert_turns_if_absent(db.pool(), &seeded).await.unwrap(), 2);
        assert_eq!(insert_turns_if_absent(db.pool(), &seeded).await.unwrap(), 0);

        let mut done = turn(e.id, 1, TurnRunState::Success, 10);
        done.evaluator_records.push(EvaluatorRecord {
            evaluator_version_id: 1,
            score: Some(0.8),
            option: None,
            reasoning: "ok".into(),
            correction: None,
            error: None,
        });
        done.target_output.insert("output".into(), "hi".into());
        upsert_turn_result(db.pool(), &done).await.unwrap();
        upsert_turn_result(db.pool(), &turn(e.id, 2, TurnRunState::Processing, 5))
            .await
            .unwrap();

        let turns = list_turn_results(db.pool(), e.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], done);

        let stale = list_stale_turns(db.pool(), 6).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].item_id, 2);

        let moved = transition_turns(
            db.pool(),
            e.id,
            TurnRunState::Processing,
            TurnRunState::Terminated,
            20,
        )
        .await
        .unwrap();
        assert_eq!(moved, 1);
        assert!(list_stale_turns(db.pool(), 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_roundtrip() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let e = create_experiment(db.pool(), &experiment("e1", 10, vec![]))
            .await
            .unwrap();
        assert!(get_aggregate(db.pool(), e.id).await.unwrap().is_none());

        let aggregate = AggregateResult {
            experiment_id: e.id,
            updated_at_ms: 42,
            ..Default::default()
        };
        save_aggregate(db.pool(), &aggregate).await.unwrap();
        save_aggregate(db.pool(), &aggregate).await.unwrap();
        assert_eq!(get_aggregate(db.pool(), e.id).await.unwrap(), Some(aggregate));
    }
}
