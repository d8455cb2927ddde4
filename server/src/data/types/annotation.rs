//! Annotation records attached to spans

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    ManualFeedback,
    AutoEvaluate,
    CozeFeedback,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualFeedback => "manual_feedback",
            Self::AutoEvaluate => "auto_evaluate",
            Self::CozeFeedback => "coze_feedback",
        }
    }
}

impl FromStr for AnnotationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual_feedback" => Ok(Self::ManualFeedback),
            "auto_evaluate" => Ok(Self::AutoEvaluate),
            "coze_feedback" => Ok(Self::CozeFeedback),
            other => Err(format!("unknown annotation type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationValueType {
    Long,
    Double,
    String,
    Bool,
}

impl AnnotationValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Bool => "bool",
        }
    }
}

impl FromStr for AnnotationValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "double" => Ok(Self::Double),
            "string" => Ok(Self::String),
            "bool" => Ok(Self::Bool),
            other => Err(format!("unknown value type: {}", other)),
        }
    }
}

impl fmt::Display for AnnotationValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged annotation value; the discriminator is always the populated arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", content = "value", rename_all = "snake_case")]
pub enum AnnotationValue {
    Long(i64),
    Double(f64),
    String(String),
    Bool(bool),
}

/// Column layout `(long, double, string, bool)` used by the metadata store
pub type ValueColumns = (Option<i64>, Option<f64>, Option<String>, Option<bool>);

impl AnnotationValue {
    pub fn value_type(&self) -> AnnotationValueType {
        match self {
            Self::Long(_) => AnnotationValueType::Long,
            Self::Double(_) => AnnotationValueType::Double,
            Self::String(_) => AnnotationValueType::String,
            Self::Bool(_) => AnnotationValueType::Bool,
        }
    }

    /// Parse a string per `value_type` (open API input)
    pub fn parse(value_type: AnnotationValueType, raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        match value_type {
            AnnotationValueType::Long => trimmed
                .parse::<i64>()
                .map(Self::Long)
                .map_err(|_| format!("'{}' is not a valid long", raw)),
            AnnotationValueType::Double => match trimmed.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Self::Double(v)),
                _ => Err(format!("'{}' is not a valid double", raw)),
            },
            AnnotationValueType::String => Ok(Self::String(raw.to_string())),
            AnnotationValueType::Bool => trimmed
                .parse::<bool>()
                .map(Self::Bool)
                .map_err(|_| format!("'{}' is not a valid bool", raw)),
        }
    }

    /// Split into storage columns; exactly one is populated
    pub fn to_columns(&self) -> ValueColumns {
        match self {
            Self::Long(v) => (Some(*v), None, None, None),
            Self::Double(v) => (None, Some(*v), None, None),
            Self::String(v) => (None, None, Some(v.clone()), None),
            Self::Bool(v) => (None, None, None, Some(*v)),
        }
    }

    /// Rebuild from storage columns, trusting only the column `value_type` names
    pub fn from_columns(value_type: AnnotationValueType, cols: ValueColumns) -> Result<Self, String> {
        let (long, double, string, boolean) = cols;
        let missing = || format!("{} column is empty", value_type);
        match value_type {
            AnnotationValueType::Long => long.map(Self::Long).ok_or_else(missing),
            AnnotationValueType::Double => double.map(Self::Double).ok_or_else(missing),
            AnnotationValueType::String => string.map(Self::String).ok_or_else(missing),
            AnnotationValueType::Bool => boolean.map(Self::Bool).ok_or_else(missing),
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Display form for presentation
    pub fn to_display(&self) -> String {
        match self {
            Self::Long(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::String(v) => v.clone(),
            Self::Bool(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    #[default]
    Normal,
    Deleted,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for AnnotationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown annotation status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    Manual,
    System,
}

/// One entry of an annotation's append-only correction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub value: AnnotationValue,
    #[serde(default)]
    pub reasoning: String,
    pub correction_type: CorrectionType,
    pub updated_by: String,
    pub updated_at_ms: i64,
}

/// Evaluator provenance carried by `auto_evaluate` annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoEvaluateMeta {
    pub evaluator_version_id: i64,
    pub task_id: i64,
    pub evaluator_record_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub workspace_id: String,
    pub trace_id: String,
    pub span_id: String,
    /// Start time of the annotated span (ms), used to locate it
    pub start_time_ms: i64,
    pub annotation_type: AnnotationType,
    pub key: String,
    pub value: AnnotationValue,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub status: AnnotationStatus,
    #[serde(default)]
    pub corrections: Vec<Correction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_evaluate: Option<AutoEvaluateMeta>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Annotation {
    pub fn is_live(&self) -> bool {
        self.status == AnnotationStatus::Normal
    }

    /// Latest manual correction, if any
    pub fn latest_manual_correction(&self) -> Option<&Correction> {
        self.corrections
            .iter()
            .rev()
            .find(|c| c.correction_type == CorrectionType::Manual)
    }
}

/// Lookup key of a logical annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKey {
    pub workspace_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_serde_shape() {
        let v = AnnotationValue::Long(3);
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            serde_json::json!({"value_type": "long", "value": 3})
        );
        let back: AnnotationValue =
            serde_json::from_value(serde_json::json!({"value_type": "bool", "value": true}))
                .unwrap();
        assert_eq!(back, AnnotationValue::Bool(true));
    }

    #[test]
    fn test_value_columns_lossless() {
        for v in [
            AnnotationValue::Long(-4),
            AnnotationValue::Double(0.25),
            AnnotationValue::String("good".into()),
            AnnotationValue::Bool(false),
        ] {
            let back = AnnotationValue::from_columns(v.value_type(), v.to_columns()).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn test_from_columns_rejects_mismatched_arm() {
        let cols = AnnotationValue::Long(1).to_columns();
        assert!(AnnotationValue::from_columns(AnnotationValueType::Double, cols).is_err());
    }

    #[test]
    fn test_parse_per_value_type() {
        assert_eq!(
            AnnotationValue::parse(AnnotationValueType::Long, " 42 "),
            Ok(AnnotationValue::Long(42))
        );
        assert_eq!(
            AnnotationValue::parse(AnnotationValueType::Double, "0.5"),
            Ok(AnnotationValue::Double(0.5))
        );
        assert!(AnnotationValue::parse(AnnotationValueType::Double, "NaN").is_err());
        assert!(AnnotationValue::parse(AnnotationValueType::Long, "1.5").is_err());
        assert!(AnnotationValue::parse(AnnotationValueType::Bool, "yes").is_err());
        assert_eq!(
            AnnotationValue::parse(AnnotationValueType::String, "like"),
            Ok(AnnotationValue::String("like".into()))
        );
    }

    #[test]
    fn test_latest_manual_correction() {
        let correction = |score: f64, t: CorrectionType| Correction {
            value: AnnotationValue::Double(score),
            reasoning: String::new(),
            correction_type: t,
            updated_by: "u".into(),
            updated_at_ms: 0,
        };
        let annotation = Annotation {
            id: "a".into(),
            workspace_id: "7".into(),
            trace_id: "T".into(),
            span_id: "S".into(),
            start_time_ms: 0,
            annotation_type: AnnotationType::AutoEvaluate,
            key: "1".into(),
            value: AnnotationValue::Double(0.1),
            reasoning: String::new(),
            status: AnnotationStatus::Normal,
            corrections: vec![
                correction(0.5, CorrectionType::Manual),
                correction(0.7, CorrectionType::Manual),
                correction(0.9, CorrectionType::System),
            ],
            auto_evaluate: None,
            created_by: "u".into(),
            updated_by: "u".into(),
            created_at_ms: 0,
            updated_at_ms: 0,
        };
        assert_eq!(
            annotation.latest_manual_correction().map(|c| c.value.clone()),
            Some(AnnotationValue::Double(0.7))
        );
    }
}
