//! Tag catalog entries used to validate manual annotations

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagContentType {
    Categorical,
    Boolean,
    ContinuousNumber,
    FreeText,
}

/// A tag value; hierarchical tags nest sub-values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    pub tag_value_id: i64,
    pub tag_value_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TagValue>,
}

impl TagValue {
    fn find(&self, id: i64) -> Option<&TagValue> {
        if self.tag_value_id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag_key_id: i64,
    pub tag_key_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub content_type: TagContentType,
    #[serde(default)]
    pub tag_values: Vec<TagValue>,
}

impl TagInfo {
    /// Depth-first lookup of a value id anywhere in the value tree
    pub fn find_value(&self, tag_value_id: i64) -> Option<&TagValue> {
        self.tag_values.iter().find_map(|v| v.find(tag_value_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_value_nested() {
        let tag: TagInfo = serde_json::from_value(serde_json::json!({
            "tag_key_id": 1,
            "tag_key_name": "topic",
            "content_type": "categorical",
            "tag_values": [
                { "tag_value_id": 10, "tag_value_name": "sports", "children": [
                    { "tag_value_id": 11, "tag_value_name": "football" }
                ]},
                { "tag_value_id": 20, "tag_value_name": "news" }
            ]
        }))
        .unwrap();

        assert!(tag.active);
        assert_eq!(tag.find_value(11).map(|v| v.tag_value_name.as_str()), Some("football"));
        assert!(tag.find_value(20).is_some());
        assert!(tag.find_value(99).is_none());
    }
}
