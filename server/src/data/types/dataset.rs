//! Dataset shapes produced by span export

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatasetCategory {
    #[default]
    General,
    Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    Audio,
    #[serde(rename = "multipart")]
    MultiPart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayFormat {
    #[default]
    Plain,
    Markdown,
    Json,
    Yaml,
    Code,
}

/// One column of a dataset version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub display_format: DisplayFormat,
    /// JSON schema the text must satisfy (only `type` is enforced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audio {
    #[serde(default)]
    pub format: String,
    pub url: String,
}

/// Cell value; multipart content nests further contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Audio>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_part: Vec<Content>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Text,
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.content_type {
            ContentType::Text => self.text.as_deref().is_none_or(str::is_empty),
            ContentType::Image => self.image.is_none(),
            ContentType::Audio => self.audio.is_none(),
            ContentType::MultiPart => self.multi_part.iter().all(Content::is_empty),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldData {
    pub key: String,
    pub name: String,
    pub content: Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorType {
    MismatchSchema,
    EmptyData,
    ExceedMaxItemSize,
    ExceedDatasetCapacity,
    MalformedFile,
    IllegalContent,
    InternalError,
}

impl ItemErrorType {
    pub fn summary(&self) -> &'static str {
        match self {
            Self::MismatchSchema => "field content does not match the dataset schema",
            Self::EmptyData => "mapped field is empty",
            Self::ExceedMaxItemSize => "item exceeds the maximum size",
            Self::ExceedDatasetCapacity => "dataset capacity exceeded",
            Self::MalformedFile => "attachment could not be read",
            Self::IllegalContent => "content rejected",
            Self::InternalError => "internal error",
        }
    }
}

/// One error attached to an item or range of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemErrorDetail {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_key: Option<String>,
}

/// Errors grouped by type for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemErrorGroup {
    pub error_type: ItemErrorType,
    pub summary: String,
    pub error_count: usize,
    pub details: Vec<ItemErrorDetail>,
}

impl ItemErrorGroup {
    /// Group error details by type, ordered by type
    pub fn group(
        errors: impl IntoIterator<Item = (ItemErrorType, ItemErrorDetail)>,
    ) -> Vec<ItemErrorGroup> {
        let mut grouped: BTreeMap<ItemErrorType, Vec<ItemErrorDetail>> = BTreeMap::new();
        for (error_type, detail) in errors {
            grouped.entry(error_type).or_default().push(detail);
        }
        grouped
            .into_iter()
            .map(|(error_type, details)| ItemErrorGroup {
                error_type,
                summary: error_type.summary().to_string(),
                error_count: details.len(),
                details,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFieldError {
    pub error_type: ItemErrorType,
    pub field_key: String,
    pub message: String,
}

/// One dataset row built from a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub workspace_id: i64,
    pub dataset_id: i64,
    pub trace_id: String,
    pub span_id: String,
    pub item_key: String,
    pub field_data: Vec<FieldData>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemFieldError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: DatasetCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_biz_category: Option<String>,
    pub schema: Vec<FieldSchema>,
}
