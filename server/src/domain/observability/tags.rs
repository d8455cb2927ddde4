//! Annotation value validation against the tag catalog

use std::sync::Arc;

use crate::core::constants::FREE_TEXT_MAX_LEN;
use crate::data::types::{AnnotationValue, TagContentType, TagInfo};
use crate::domain::error::ServiceError;
use crate::domain::external::TagCatalog;

/// Feedback keys and values of the chat front-end, as displayed
const COZE_FEEDBACK_KEYS: &[(&str, &str)] = &[("chat_feedback", "消息反馈")];
const COZE_FEEDBACK_VALUES: &[(&str, &str)] = &[("like", "赞"), ("dislike", "踩")];

#[derive(Clone)]
pub struct TagResolver {
    catalog: Arc<dyn TagCatalog>,
}

impl TagResolver {
    pub fn new(catalog: Arc<dyn TagCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn TagCatalog> {
        &self.catalog
    }

    /// Resolve the tag behind a manual annotation key and check the value
    pub async fn validate(
        &self,
        workspace_id: i64,
        key: &str,
        value: &AnnotationValue,
    ) -> Result<TagInfo, ServiceError> {
        let tag_key_id = parse_tag_key_id(key)?;
        let tag = self
            .catalog
            .get_tags(workspace_id, &[tag_key_id])
            .await?
            .into_iter()
            .find(|t| t.tag_key_id == tag_key_id)
            .ok_or_else(|| ServiceError::not_found(format!("tag key {}", tag_key_id)))?;
        if !tag.active {
            return Err(ServiceError::invalid_param(format!(
                "tag key {} is inactive",
                tag_key_id
            )));
        }
        validate_value(&tag, value)?;
        Ok(tag)
    }
}

pub fn parse_tag_key_id(key: &str) -> Result<i64, ServiceError> {
    key.trim()
        .parse::<i64>()
        .map_err(|_| ServiceError::invalid_param(format!("annotation key '{}' is not a tag key id", key)))
}

/// Check a value against the tag's content type
pub fn validate_value(tag: &TagInfo, value: &AnnotationValue) -> Result<(), ServiceError> {
    let mismatch = |expected: &str| {
        ServiceError::invalid_param(format!(
            "tag {} expects a {} value, got {}",
            tag.tag_key_name,
            expected,
            value.value_type()
        ))
    };

    match tag.content_type {
        TagContentType::Categorical | TagContentType::Boolean => {
            let id = value.as_long().ok_or_else(|| mismatch("long"))?;
            if tag.find_value(id).is_none() {
                return Err(ServiceError::invalid_param(format!(
                    "tag value {} does not belong to tag {}",
                    id, tag.tag_key_name
                )));
            }
        }
        TagContentType::ContinuousNumber => {
            value.as_double().ok_or_else(|| mismatch("double"))?;
        }
        TagContentType::FreeText => {
            let text = value.as_str().ok_or_else(|| mismatch("string"))?;
            let len = text.chars().count();
            if len == 0 || len > FREE_TEXT_MAX_LEN {
                return Err(ServiceError::invalid_param(format!(
                    "free text must be 1 to {} characters, got {}",
                    FREE_TEXT_MAX_LEN, len
                )));
            }
        }
    }
    Ok(())
}

pub fn coze_feedback_key(key: &str) -> Option<&'static str> {
    COZE_FEEDBACK_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, display)| *display)
}

pub fn coze_feedback_value(value: &str) -> Option<&'static str> {
    COZE_FEEDBACK_VALUES
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, display)| *display)
}
