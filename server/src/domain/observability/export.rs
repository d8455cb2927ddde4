//! Export spans into dataset items
//!
//! Each field mapping pulls a value out of the span, either by key or by a
//! JSONPath, and wraps it into the content type of the target column.
//! Items that fail mapping are still produced, marked as errors, so the
//! preview shows both shapes. Writes go out in batches; error indices
//! reported by the dataset service are remapped to export positions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};

use crate::core::constants::DATASET_ITEM_BATCH_SIZE;
use crate::data::traits::SpanRepository;
use crate::data::types::{
    Audio, Content, ContentType, DatasetCategory, DatasetItem, FieldData, FieldSchema, Image,
    ItemErrorDetail, ItemErrorGroup, ItemErrorType, ItemFieldError, ItemStatus, PlatformType,
    Span,
};
use crate::domain::error::ServiceError;
use crate::domain::external::{AuthAction, AuthResource, Authorizer, DatasetService, NewDataset};
use crate::utils::json::{json_path_get, json_to_plain_string};
use crate::utils::time::{ms_to_us, us_to_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    #[default]
    Append,
    Overwrite,
}

/// Target dataset: a new one (name + schema) or an existing id
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub is_new_dataset: bool,
    #[serde(default)]
    pub dataset_id: Option<i64>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Defaults to the schemas of the field mappings
    #[serde(default)]
    pub dataset_schema: Option<Vec<FieldSchema>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    pub field_schema: FieldSchema,
    #[serde(default)]
    pub trace_field_key: String,
    #[serde(default)]
    pub trace_field_jsonpath: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub workspace_id: i64,
    pub span_ids: Vec<String>,
    #[serde(default)]
    pub platform_type: Option<String>,
    #[serde(default)]
    pub category: DatasetCategory,
    #[serde(default)]
    pub config: DatasetConfig,
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub export_type: ExportType,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResponse {
    pub success_count: usize,
    pub dataset_id: i64,
    pub dataset_name: String,
    pub errors: Vec<ItemErrorGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewResponse {
    pub items: Vec<DatasetItem>,
    pub errors: Vec<ItemErrorGroup>,
}

pub struct DatasetExporter {
    spans: Arc<dyn SpanRepository>,
    datasets: Arc<dyn DatasetService>,
    authorizer: Arc<dyn Authorizer>,
    batch_size: usize,
}

impl DatasetExporter {
    pub fn new(
        spans: Arc<dyn SpanRepository>,
        datasets: Arc<dyn DatasetService>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            spans,
            datasets,
            authorizer,
            batch_size: DATASET_ITEM_BATCH_SIZE,
        }
    }

    /// Build items without writing them
    pub async fn preview(
        &self,
        user_id: &str,
        req: &ExportRequest,
    ) -> Result<PreviewResponse, ServiceError> {
        validate_request(req)?;
        self.authorize(user_id, req.workspace_id).await?;
        let dataset_id = match (req.config.is_new_dataset, req.config.dataset_id) {
            (false, Some(id)) => id,
            _ => 0,
        };
        let spans = self.load_spans(req).await?;
        let items = build_items(req.workspace_id, dataset_id, &spans, &req.field_mappings);
        let errors = ItemErrorGroup::group(item_errors(&items));
        Ok(PreviewResponse { items, errors })
    }

    pub async fn export(
        &self,
        user_id: &str,
        req: ExportRequest,
    ) -> Result<ExportResponse, ServiceError> {
        validate_request(&req)?;
        self.authorize(user_id, req.workspace_id).await?;
        let spans = self.load_spans(&req).await?;

        let dataset = if req.config.is_new_dataset {
            let name = req
                .config
                .dataset_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| ServiceError::invalid_param("dataset_name is required"))?;
            let schema = req.config.dataset_schema.clone().unwrap_or_else(|| {
                req.field_mappings
                    .iter()
                    .map(|m| m.field_schema.clone())
                    .collect()
            });
            self.datasets
                .create_dataset(NewDataset {
                    workspace_id: req.workspace_id,
                    name,
                    description: req.config.description.clone(),
                    category: req.category,
                    schema,
                })
                .await?
        } else {
            let id = req
                .config
                .dataset_id
                .ok_or_else(|| ServiceError::invalid_param("dataset_id is required"))?;
            self.datasets
                .get_dataset(req.workspace_id, id)
                .await?
                .ok_or_else(|| ServiceError::not_found(format!("dataset {}", id)))?
        };

        if req.export_type == ExportType::Overwrite {
            self.datasets.clear_items(req.workspace_id, dataset.id).await?;
        }

        let items = build_items(req.workspace_id, dataset.id, &spans, &req.field_mappings);
        let mut errors = item_errors(&items);
        let (valid, positions): (Vec<DatasetItem>, Vec<usize>) = items
            .into_iter()
            .enumerate()
            .filter(|(_, item)| item.status == ItemStatus::Success)
            .map(|(index, item)| (item, index))
            .unzip();

        let mut success_count = 0;
        for (batch, batch_positions) in valid
            .chunks(self.batch_size)
            .zip(positions.chunks(self.batch_size))
        {
            match self
                .datasets
                .add_items(req.workspace_id, dataset.id, batch.to_vec())
                .await
            {
                Ok(outcome) => {
                    success_count += outcome.added;
                    errors.extend(remap_errors(outcome.errors, batch_positions));
                }
                Err(e) => {
                    tracing::warn!(
                        dataset_id = dataset.id,
                        items = batch.len(),
                        error = %e,
                        "Dataset batch rejected"
                    );
                    errors.extend(batch_positions.iter().map(|&index| {
                        (
                            ItemErrorType::InternalError,
                            ItemErrorDetail {
                                message: e.to_string(),
                                index: Some(index),
                                field_key: None,
                            },
                        )
                    }));
                }
            }
        }

        tracing::info!(
            dataset_id = dataset.id,
            spans = spans.len(),
            success_count,
            "Spans exported"
        );
        Ok(ExportResponse {
            success_count,
            dataset_id: dataset.id,
            dataset_name: dataset.name,
            errors: ItemErrorGroup::group(errors),
        })
    }

    async fn authorize(&self, user_id: &str, workspace_id: i64) -> Result<(), ServiceError> {
        self.authorizer
            .check(
                user_id,
                AuthAction::ReadLoopTrace,
                &AuthResource::Workspace(workspace_id),
            )
            .await
    }

    /// Requested spans in request order; spans outside the platform are dropped
    async fn load_spans(&self, req: &ExportRequest) -> Result<Vec<Span>, ServiceError> {
        let platform: PlatformType = req
            .platform_type
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(ServiceError::InvalidParam)?;
        let found = self
            .spans
            .get_spans_by_ids(
                &req.workspace_id.to_string(),
                &req.span_ids,
                ms_to_us(req.start_time),
                ms_to_us(req.end_time.saturating_add(1)),
            )
            .await?;
        let mut by_id: HashMap<String, Span> = found
            .into_iter()
            .filter(|s| platform.accepts_call_type(&s.call_type))
            .map(|s| (s.span_id.clone(), s))
            .collect();
        let spans: Vec<Span> = req.span_ids.iter().filter_map(|id| by_id.remove(id)).collect();
        if spans.is_empty() {
            return Err(ServiceError::not_found("none of the requested spans exist"));
        }
        if spans.len() < req.span_ids.len() {
            tracing::warn!(
                requested = req.span_ids.len(),
                found = spans.len(),
                "Some spans to export were not found"
            );
        }
        Ok(spans)
    }
}

fn validate_request(req: &ExportRequest) -> Result<(), ServiceError> {
    if req.workspace_id <= 0 {
        return Err(ServiceError::invalid_param("workspace_id must be positive"));
    }
    if req.span_ids.is_empty() {
        return Err(ServiceError::invalid_param("span_ids is required"));
    }
    if req.field_mappings.is_empty() {
        return Err(ServiceError::invalid_param("field_mappings is required"));
    }
    if req.end_time < req.start_time {
        return Err(ServiceError::invalid_param("end_time precedes start_time"));
    }
    let mut keys = HashSet::new();
    for mapping in &req.field_mappings {
        if mapping.trace_field_key.is_empty() && mapping.trace_field_jsonpath.is_empty() {
            return Err(ServiceError::invalid_param(format!(
                "mapping for {} names no source",
                mapping.field_schema.key
            )));
        }
        if !keys.insert(mapping.field_schema.key.as_str()) {
            return Err(ServiceError::invalid_param(format!(
                "field {} is mapped twice",
                mapping.field_schema.key
            )));
        }
    }
    Ok(())
}

/// JSON view of a span that mappings address: columns plus tags
pub fn span_envelope(span: &Span) -> JsonValue {
    let mut map = Map::new();
    for (k, v) in &span.tags_string {
        map.insert(k.clone(), json!(v));
    }
    for (k, v) in &span.tags_long {
        map.insert(k.clone(), json!(v));
    }
    for (k, v) in &span.tags_double {
        map.insert(k.clone(), json!(v));
    }
    for (k, v) in &span.tags_bool {
        map.insert(k.clone(), json!(v));
    }
    for (k, v) in &span.system_tags {
        map.insert(k.clone(), json!(v));
    }
    let columns = json!({
        "trace_id": span.trace_id,
        "span_id": span.span_id,
        "parent_id": span.parent_id,
        "span_name": span.span_name,
        "span_type": span.span_type.as_str(),
        "call_type": span.call_type,
        "status_code": span.status_code,
        "start_time": us_to_ms(span.start_time_us),
        "duration": us_to_ms(span.duration_us),
        "input": span.input,
        "output": span.output,
    });
    if let JsonValue::Object(columns) = columns {
        map.extend(columns);
    }
    JsonValue::Object(map)
}

fn build_items(
    workspace_id: i64,
    dataset_id: i64,
    spans: &[Span],
    mappings: &[FieldMapping],
) -> Vec<DatasetItem> {
    spans
        .iter()
        .map(|span| {
            let envelope = span_envelope(span);
            let mut field_data = Vec::with_capacity(mappings.len());
            let mut errors = Vec::new();
            for mapping in mappings {
                let schema = &mapping.field_schema;
                let content = resolve_source(&envelope, mapping)
                    .and_then(|value| to_content(schema, &value));
                match content {
                    Ok(content) => field_data.push(FieldData {
                        key: schema.key.clone(),
                        name: schema.name.clone(),
                        content,
                    }),
                    Err((error_type, message)) => {
                        field_data.push(FieldData {
                            key: schema.key.clone(),
                            name: schema.name.clone(),
                            content: Content {
                                content_type: schema.content_type,
                                ..Default::default()
                            },
                        });
                        errors.push(ItemFieldError {
                            error_type,
                            field_key: schema.key.clone(),
                            message,
                        });
                    }
                }
            }
            DatasetItem {
                workspace_id,
                dataset_id,
                trace_id: span.trace_id.clone(),
                span_id: span.span_id.clone(),
                item_key: format!("{}:{}", span.trace_id, span.span_id),
                field_data,
                status: if errors.is_empty() {
                    ItemStatus::Success
                } else {
                    ItemStatus::Error
                },
                errors,
            }
        })
        .collect()
}

type MappingError = (ItemErrorType, String);

/// Key lookup first; a JSONPath then applies to the keyed value, or to the
/// whole envelope when no key is given
fn resolve_source(envelope: &JsonValue, mapping: &FieldMapping) -> Result<JsonValue, MappingError> {
    let empty = || {
        (
            ItemErrorType::EmptyData,
            format!("no value for field {}", mapping.field_schema.key),
        )
    };
    let base = if mapping.trace_field_key.is_empty() {
        envelope.clone()
    } else {
        envelope
            .get(&mapping.trace_field_key)
            .cloned()
            .ok_or_else(empty)?
    };
    let value = if mapping.trace_field_jsonpath.is_empty() {
        base
    } else {
        json_path_get(&base, &mapping.trace_field_jsonpath)
            .map_err(|e| (ItemErrorType::MismatchSchema, e.to_string()))?
            .ok_or_else(empty)?
    };
    match &value {
        JsonValue::Null => Err(empty()),
        JsonValue::String(s) if s.is_empty() => Err(empty()),
        _ => Ok(value),
    }
}

fn to_content(schema: &FieldSchema, value: &JsonValue) -> Result<Content, MappingError> {
    let mismatch = |what: &str| {
        (
            ItemErrorType::MismatchSchema,
            format!("field {} expects {}", schema.key, what),
        )
    };
    match schema.content_type {
        ContentType::Text => {
            let text = json_to_plain_string(value);
            if let Some(expected) = schema.text_schema.as_deref().and_then(schema_type) {
                if !text_matches_type(&text, &expected) {
                    return Err(mismatch(&expected));
                }
            }
            Ok(Content::text(text))
        }
        ContentType::Image => {
            let (name, url) = url_parts(value, "name").ok_or_else(|| mismatch("an image url"))?;
            Ok(Content {
                content_type: ContentType::Image,
                image: Some(Image { name, url }),
                ..Default::default()
            })
        }
        ContentType::Audio => {
            let (format, url) = url_parts(value, "format").ok_or_else(|| mismatch("an audio url"))?;
            Ok(Content {
                content_type: ContentType::Audio,
                audio: Some(Audio { format, url }),
                ..Default::default()
            })
        }
        ContentType::MultiPart => {
            let parts = match value {
                JsonValue::Array(parts) => parts.clone(),
                JsonValue::String(s) => match serde_json::from_str::<JsonValue>(s) {
                    Ok(JsonValue::Array(parts)) => parts,
                    _ => vec![value.clone()],
                },
                other => vec![other.clone()],
            };
            let multi_part = parts
                .iter()
                .map(|part| to_content(&part_schema(schema, part), part_payload(part)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Content {
                content_type: ContentType::MultiPart,
                multi_part,
                ..Default::default()
            })
        }
    }
}

/// Column schema of one multipart element, inferred from its shape
fn part_schema(parent: &FieldSchema, part: &JsonValue) -> FieldSchema {
    let content_type = match part.get("type").and_then(JsonValue::as_str) {
        Some("image" | "image_url") => ContentType::Image,
        Some("audio" | "audio_url") => ContentType::Audio,
        Some("multipart") => ContentType::MultiPart,
        _ if part.get("url").is_some() => ContentType::Image,
        _ if part.is_array() => ContentType::MultiPart,
        _ => ContentType::Text,
    };
    FieldSchema {
        content_type,
        text_schema: None,
        ..parent.clone()
    }
}

fn part_payload(part: &JsonValue) -> &JsonValue {
    ["text", "image_url", "audio_url", "parts"]
        .iter()
        .find_map(|k| part.get(*k))
        .unwrap_or(part)
}

fn url_parts(value: &JsonValue, label_key: &str) -> Option<(String, String)> {
    match value {
        JsonValue::String(url) if !url.is_empty() => Some((String::new(), url.clone())),
        JsonValue::Object(map) => {
            let url = map.get("url").and_then(JsonValue::as_str)?;
            let label = map
                .get(label_key)
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            Some((label.to_string(), url.to_string()))
        }
        _ => None,
    }
}

/// The top-level `type` of a JSON schema document
fn schema_type(text_schema: &str) -> Option<String> {
    serde_json::from_str::<JsonValue>(text_schema)
        .ok()?
        .get("type")?
        .as_str()
        .map(str::to_string)
}

fn text_matches_type(text: &str, expected: &str) -> bool {
    if expected == "string" {
        return true;
    }
    let Ok(parsed) = serde_json::from_str::<JsonValue>(text) else {
        return false;
    };
    match expected {
        "number" => parsed.is_number(),
        "integer" => parsed.is_i64() || parsed.is_u64(),
        "boolean" => parsed.is_boolean(),
        "object" => parsed.is_object(),
        "array" => parsed.is_array(),
        _ => true,
    }
}

/// One detail per failed item, under its first error
fn item_errors(items: &[DatasetItem]) -> Vec<(ItemErrorType, ItemErrorDetail)> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            item.errors.first().map(|e| {
                (
                    e.error_type,
                    ItemErrorDetail {
                        message: e.message.clone(),
                        index: Some(index),
                        field_key: Some(e.field_key.clone()),
                    },
                )
            })
        })
        .collect()
}

/// Translate batch-local indices back to export positions
fn remap_errors(
    groups: Vec<ItemErrorGroup>,
    positions: &[usize],
) -> Vec<(ItemErrorType, ItemErrorDetail)> {
    groups
        .into_iter()
        .flat_map(|group| {
            let error_type = group.error_type;
            group.details.into_iter().map(move |mut detail| {
                detail.index = detail.index.and_then(|i| positions.get(i).copied());
                (error_type, detail)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::data::DataStores;
    use crate::data::types::{Dataset, DisplayFormat, TtlTier};
    use crate::domain::external::{AddItemsOutcome, InMemoryDatasetService, LocalAuthorizer};

    const START_MS: i64 = 1_700_000_000_000;

    fn schema(key: &str, content_type: ContentType) -> FieldSchema {
        FieldSchema {
            key: key.into(),
            name: key.into(),
            description: String::new(),
            content_type,
            display_format: DisplayFormat::Plain,
            text_schema: None,
        }
    }

    fn mapping(key: &str, source: &str, path: &str) -> FieldMapping {
        FieldMapping {
            field_schema: schema(key, ContentType::Text),
            trace_field_key: source.into(),
            trace_field_jsonpath: path.into(),
        }
    }

    fn span(i: usize, input: &str) -> Span {
        Span {
            trace_id: format!("T{}", i),
            span_id: format!("S{}", i),
            workspace_id: "7".into(),
            start_time_us: ms_to_us(START_MS) + i as i64,
            input: input.into(),
            output: format!("answer {}", i),
            ..Default::default()
        }
    }

    async fn stores_with(spans: Vec<Span>) -> DataStores {
        let stores = DataStores::in_memory().await.unwrap();
        stores.spans().insert_spans(spans, TtlTier::Days3).await.unwrap();
        stores
    }

    fn request(span_ids: Vec<String>, mappings: Vec<FieldMapping>) -> ExportRequest {
        ExportRequest {
            workspace_id: 7,
            span_ids,
            platform_type: None,
            category: DatasetCategory::Evaluation,
            config: DatasetConfig {
                is_new_dataset: true,
                dataset_name: Some("golden".into()),
                ..Default::default()
            },
            field_mappings: mappings,
            export_type: ExportType::Append,
            start_time: START_MS,
            end_time: START_MS + 1_000,
        }
    }

    #[tokio::test]
    async fn test_preview_maps_by_key_and_path() {
        let stores = stores_with(vec![
            span(0, r#"{"messages":[{"content":"hi"}]}"#),
            span(1, "plain text"),
        ])
        .await;
        let exporter = DatasetExporter::new(
            stores.spans(),
            Arc::new(InMemoryDatasetService::new()),
            Arc::new(LocalAuthorizer),
        );
        let req = request(
            vec!["S0".into(), "S1".into()],
            vec![
                mapping("question", "input", "$.messages[0].content"),
                mapping("answer", "output", ""),
            ],
        );

        let preview = exporter.preview("alice", &req).await.unwrap();
        assert_eq!(preview.items.len(), 2);
        let first = &preview.items[0];
        assert_eq!(first.status, ItemStatus::Success);
        assert_eq!(first.field_data[0].content.text.as_deref(), Some("hi"));
        assert_eq!(first.field_data[1].content.text.as_deref(), Some("answer 0"));

        let second = &preview.items[1];
        assert_eq!(second.status, ItemStatus::Error);
        assert_eq!(second.errors[0].error_type, ItemErrorType::EmptyData);
        assert_eq!(preview.errors.len(), 1);
        assert_eq!(preview.errors[0].details[0].index, Some(1));
    }

    #[tokio::test]
    async fn test_export_accounts_for_every_item() {
        let stores = stores_with(vec![span(0, "a"), span(1, ""), span(2, "c")]).await;
        let datasets = Arc::new(InMemoryDatasetService::new());
        let exporter =
            DatasetExporter::new(stores.spans(), datasets.clone(), Arc::new(LocalAuthorizer));
        let req = request(
            vec!["S0".into(), "S1".into(), "S2".into(), "missing".into()],
            vec![mapping("question", "input", "")],
        );

        let out = exporter.export("alice", req).await.unwrap();
        assert_eq!(out.dataset_name, "golden");
        assert_eq!(out.success_count, 2);
        let failed: usize = out.errors.iter().map(|g| g.error_count).sum();
        assert_eq!(out.success_count + failed, 3);
        assert_eq!(datasets.item_count(out.dataset_id), 2);
    }

    #[tokio::test]
    async fn test_open_ended_window_finds_spans() {
        let stores = stores_with(vec![span(0, "a")]).await;
        let exporter = DatasetExporter::new(
            stores.spans(),
            Arc::new(InMemoryDatasetService::new()),
            Arc::new(LocalAuthorizer),
        );
        let mut req = request(vec!["S0".into()], vec![mapping("question", "input", "")]);
        req.end_time = i64::MAX;

        let preview = exporter.preview("alice", &req).await.unwrap();
        assert_eq!(preview.items.len(), 1);
        assert_eq!(preview.items[0].status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn test_overwrite_clears_existing_items() {
        let stores = stores_with(vec![span(0, "a")]).await;
        let datasets = Arc::new(InMemoryDatasetService::new());
        let exporter =
            DatasetExporter::new(stores.spans(), datasets.clone(), Arc::new(LocalAuthorizer));
        let first = exporter
            .export("alice", request(vec!["S0".into()], vec![mapping("q", "input", "")]))
            .await
            .unwrap();

        let mut again = request(vec!["S0".into()], vec![mapping("q", "input", "")]);
        again.config = DatasetConfig {
            dataset_id: Some(first.dataset_id),
            ..Default::default()
        };
        exporter.export("alice", again.clone()).await.unwrap();
        assert_eq!(datasets.item_count(first.dataset_id), 2);

        again.export_type = ExportType::Overwrite;
        exporter.export("alice", again).await.unwrap();
        assert_eq!(datasets.item_count(first.dataset_id), 1);
    }

    /// Rejects items whose span id ends in 7
    struct PickyDatasets;

    #[async_trait]
    impl DatasetService for PickyDatasets {
        async fn create_dataset(&self, dataset: NewDataset) -> Result<Dataset, ServiceError> {
            Ok(Dataset {
                id: 1,
                workspace_id: dataset.workspace_id,
                name: dataset.name,
                description: dataset.description,
                category: dataset.category,
                evaluation_biz_category: None,
                schema: dataset.schema,
            })
        }

        async fn get_dataset(&self, _: i64, _: i64) -> Result<Option<Dataset>, ServiceError> {
            Ok(None)
        }

        async fn clear_items(&self, _: i64, _: i64) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn add_items(
            &self,
            _: i64,
            _: i64,
            items: Vec<DatasetItem>,
        ) -> Result<AddItemsOutcome, ServiceError> {
            let rejected: Vec<_> = items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.span_id.ends_with('7'))
                .map(|(index, _)| {
                    (
                        ItemErrorType::IllegalContent,
                        ItemErrorDetail {
                            message: "rejected".into(),
                            index: Some(index),
                            field_key: None,
                        },
                    )
                })
                .collect();
            Ok(AddItemsOutcome {
                added: items.len() - rejected.len(),
                errors: ItemErrorGroup::group(rejected),
            })
        }
    }

    #[tokio::test]
    async fn test_batches_remap_error_indices() {
        let spans: Vec<Span> = (0..150).map(|i| span(i, "q")).collect();
        let stores = stores_with(spans).await;
        let exporter =
            DatasetExporter::new(stores.spans(), Arc::new(PickyDatasets), Arc::new(LocalAuthorizer));
        let ids = (0..150).map(|i| format!("S{}", i)).collect();

        let out = exporter
            .export("alice", request(ids, vec![mapping("q", "input", "")]))
            .await
            .unwrap();
        let indices: Vec<usize> = out.errors[0]
            .details
            .iter()
            .filter_map(|d| d.index)
            .collect();
        // S7, S17, ..., S147
        assert_eq!(indices.len(), 15);
        assert!(indices.contains(&117));
        assert!(indices.contains(&147));
        assert_eq!(out.success_count, 135);
    }

    #[test]
    fn test_content_conversion() {
        let mut text = schema("n", ContentType::Text);
        text.text_schema = Some(r#"{"type":"number"}"#.into());
        assert!(to_content(&text, &json!("3.5")).is_ok());
        assert_eq!(
            to_content(&text, &json!("three")).unwrap_err().0,
            ItemErrorType::MismatchSchema
        );

        let image = to_content(
            &schema("img", ContentType::Image),
            &json!({"url": "https://x/y.png", "name": "y"}),
        )
        .unwrap();
        assert_eq!(image.image.unwrap().url, "https://x/y.png");
        assert!(to_content(&schema("img", ContentType::Image), &json!(3)).is_err());

        let multi = to_content(
            &schema("m", ContentType::MultiPart),
            &json!([{"type": "text", "text": "look"}, {"type": "image_url", "image_url": {"url": "u"}}]),
        )
        .unwrap();
        assert_eq!(multi.multi_part.len(), 2);
        assert_eq!(multi.multi_part[1].content_type, ContentType::Image);
    }
}
