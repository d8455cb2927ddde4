//! Span records as stored in the span store

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::data::duckdb::filters::FilterFields;

/// Tag key carrying prompt token usage
pub const TAG_INPUT_TOKENS: &str = "input_tokens";
/// Tag key carrying completion token usage
pub const TAG_OUTPUT_TOKENS: &str = "output_tokens";

// ============================================================================
// CLASSIFICATION ENUMS
// ============================================================================

/// Kind of work a span represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    Prompt,
    Model,
    Parser,
    Embedding,
    Memory,
    Plugin,
    Function,
    Graph,
    Remote,
    Loader,
    Transformer,
    VectorStore,
    VectorRetriever,
    Agent,
    LlmCall,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SpanType {
    pub const ALL: [SpanType; 16] = [
        Self::Prompt,
        Self::Model,
        Self::Parser,
        Self::Embedding,
        Self::Memory,
        Self::Plugin,
        Self::Function,
        Self::Graph,
        Self::Remote,
        Self::Loader,
        Self::Transformer,
        Self::VectorStore,
        Self::VectorRetriever,
        Self::Agent,
        Self::LlmCall,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Model => "model",
            Self::Parser => "parser",
            Self::Embedding => "embedding",
            Self::Memory => "memory",
            Self::Plugin => "plugin",
            Self::Function => "function",
            Self::Graph => "graph",
            Self::Remote => "remote",
            Self::Loader => "loader",
            Self::Transformer => "transformer",
            Self::VectorStore => "vector_store",
            Self::VectorRetriever => "vector_retriever",
            Self::Agent => "agent",
            Self::LlmCall => "llm_call",
            Self::Unknown => "unknown",
        }
    }

    /// Parse leniently; unrecognised names map to `Unknown`
    pub fn parse_lossy(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or(Self::Unknown)
    }

    /// Model invocations count as LLM spans
    pub fn is_llm(&self) -> bool {
        matches!(self, Self::Model | Self::LlmCall)
    }
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which spans of a trace a list query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpanListType {
    #[default]
    Root,
    All,
    Llm,
}

impl SpanListType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::All => "all",
            Self::Llm => "llm",
        }
    }
}

impl FromStr for SpanListType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" | "" => Ok(Self::Root),
            "all" => Ok(Self::All),
            "llm" => Ok(Self::Llm),
            other => Err(format!("unknown span list type: {}", other)),
        }
    }
}

/// Product surface the spans were produced by
///
/// Each platform owns a set of `call_type`s; `Cozeloop` is everything that
/// is not produced by one of the internal surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    #[default]
    Cozeloop,
    Prompt,
    Evaluator,
    EvalTarget,
}

/// call_type restriction derived from a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTypeScope {
    Include(&'static [&'static str]),
    Exclude(&'static [&'static str]),
}

const PROMPT_CALL_TYPES: &[&str] = &["PromptPlayground", "PromptDebug"];
const EVALUATOR_CALL_TYPES: &[&str] = &["Evaluator"];
const EVAL_TARGET_CALL_TYPES: &[&str] = &["EvalTarget"];
const INTERNAL_CALL_TYPES: &[&str] = &["PromptPlayground", "PromptDebug", "Evaluator", "EvalTarget"];

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cozeloop => "cozeloop",
            Self::Prompt => "prompt",
            Self::Evaluator => "evaluator",
            Self::EvalTarget => "eval_target",
        }
    }

    pub fn call_type_scope(&self) -> CallTypeScope {
        match self {
            Self::Cozeloop => CallTypeScope::Exclude(INTERNAL_CALL_TYPES),
            Self::Prompt => CallTypeScope::Include(PROMPT_CALL_TYPES),
            Self::Evaluator => CallTypeScope::Include(EVALUATOR_CALL_TYPES),
            Self::EvalTarget => CallTypeScope::Include(EVAL_TARGET_CALL_TYPES),
        }
    }

    pub fn accepts_call_type(&self, call_type: &str) -> bool {
        match self.call_type_scope() {
            CallTypeScope::Include(set) => set.contains(&call_type),
            CallTypeScope::Exclude(set) => !set.contains(&call_type),
        }
    }
}

impl FromStr for PlatformType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cozeloop" | "" => Ok(Self::Cozeloop),
            "prompt" => Ok(Self::Prompt),
            "evaluator" => Ok(Self::Evaluator),
            "eval_target" | "evaluation_target" => Ok(Self::EvalTarget),
            other => Err(format!("unknown platform type: {}", other)),
        }
    }
}

// ============================================================================
// TTL
// ============================================================================

/// Retention tier assigned at ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TtlTier {
    #[default]
    Days3,
    Days15,
    Days30,
    Days90,
}

impl TtlTier {
    pub fn days(&self) -> i64 {
        match self {
            Self::Days3 => 3,
            Self::Days15 => 15,
            Self::Days30 => 30,
            Self::Days90 => 90,
        }
    }

    /// Nearest tier not above `days`; anything below 3 gets the 3-day tier
    pub fn from_days(days: i64) -> Self {
        match days {
            d if d >= 90 => Self::Days90,
            d if d >= 30 => Self::Days30,
            d if d >= 15 => Self::Days15,
            _ => Self::Days3,
        }
    }
}

// ============================================================================
// SPAN
// ============================================================================

/// Externalised payload locations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrTos {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input_data_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_data_url: String,
    /// Per-modality object URLs keyed by object key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub multimodal_data: BTreeMap<String, String>,
}

/// One span. Immutable once ingested; times are microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    /// Empty for the root span of a trace
    #[serde(default)]
    pub parent_id: String,
    pub workspace_id: String,
    #[serde(default)]
    pub span_name: String,
    #[serde(default)]
    pub span_type: SpanType,
    pub start_time_us: i64,
    #[serde(default)]
    pub duration_us: i64,
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub call_type: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_tos: Option<AttrTos>,
    #[serde(default)]
    pub tags_string: BTreeMap<String, String>,
    #[serde(default)]
    pub tags_long: BTreeMap<String, i64>,
    #[serde(default)]
    pub tags_double: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags_bool: BTreeMap<String, bool>,
    /// Tags set by the platform rather than the caller
    #[serde(default)]
    pub system_tags: BTreeMap<String, String>,
    /// Opaque attributes, base64 payloads keyed by name
    #[serde(default)]
    pub tags_bytes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_delete_time_us: Option<i64>,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty() || self.parent_id == "0"
    }

    pub fn end_time_us(&self) -> i64 {
        self.start_time_us.saturating_add(self.duration_us)
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 0
    }

    pub fn input_tokens(&self) -> i64 {
        self.tags_long.get(TAG_INPUT_TOKENS).copied().unwrap_or(0)
    }

    pub fn output_tokens(&self) -> i64 {
        self.tags_long.get(TAG_OUTPUT_TOKENS).copied().unwrap_or(0)
    }

    /// Structural checks applied before a span is written
    pub fn validate(&self) -> Result<(), String> {
        if self.trace_id.is_empty() {
            return Err("trace_id is required".to_string());
        }
        if self.span_id.is_empty() {
            return Err("span_id is required".to_string());
        }
        if self.workspace_id.is_empty() {
            return Err("workspace_id is required".to_string());
        }
        if self.start_time_us <= 0 {
            return Err(format!(
                "span {} has non-positive start time",
                self.span_id
            ));
        }
        if self.duration_us < 0 {
            return Err(format!("span {} has negative duration", self.span_id));
        }
        if let Some(deleted_at) = self.logic_delete_time_us
            && self.end_time_us() > deleted_at
        {
            return Err(format!(
                "span {} ends after its logic delete time",
                self.span_id
            ));
        }
        Ok(())
    }
}

// ============================================================================
// QUERY PARAMS / RESULTS
// ============================================================================

/// Ordering of span list results (by start time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanOrder {
    #[default]
    StartTimeDesc,
    StartTimeAsc,
}

/// Keyset position after the last span of a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanCursor {
    #[serde(rename = "t")]
    pub start_time_us: i64,
    #[serde(rename = "r")]
    pub trace_id: String,
    #[serde(rename = "s")]
    pub span_id: String,
}

impl SpanCursor {
    pub fn of(span: &Span) -> Self {
        Self {
            start_time_us: span.start_time_us,
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
        }
    }

    /// Opaque page token
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| format!("invalid page token: {}", e))?;
        serde_json::from_slice(&bytes).map_err(|e| format!("invalid page token: {}", e))
    }
}

/// Span list query against one workspace partition range
#[derive(Debug, Clone, Default)]
pub struct ListSpansParams {
    pub workspace_id: String,
    pub platform: PlatformType,
    pub span_list_type: SpanListType,
    pub filters: FilterFields,
    /// Half-open window `[start_us, end_us)`
    pub start_us: i64,
    pub end_us: i64,
    pub order: SpanOrder,
    pub cursor: Option<SpanCursor>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SpanPage {
    pub spans: Vec<Span>,
    pub next_cursor: Option<SpanCursor>,
    pub has_more: bool,
}

/// Spans of one trace, optionally narrowed to `span_ids`
#[derive(Debug, Clone, Default)]
pub struct GetTraceParams {
    pub workspace_id: String,
    pub trace_id: String,
    pub start_us: i64,
    pub end_us: i64,
    pub span_ids: Vec<String>,
}

/// Trace identity plus the window it lives in (µs)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceWindow {
    pub trace_id: String,
    pub start_us: i64,
    pub end_us: i64,
}

/// Token sums of one trace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceTokens {
    pub trace_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Soft-delete request scoped to one trace
#[derive(Debug, Clone)]
pub struct SoftDeleteParams {
    pub workspace_id: String,
    pub trace_id: String,
    /// Empty means every span of the trace
    pub span_ids: Vec<String>,
    pub delete_at_us: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_type_serde_unknown_fallback() {
        let t: SpanType = serde_json::from_str(r#""vector_store""#).unwrap();
        assert_eq!(t, SpanType::VectorStore);
        let t: SpanType = serde_json::from_str(r#""something_new""#).unwrap();
        assert_eq!(t, SpanType::Unknown);
        assert_eq!(SpanType::parse_lossy("LLM_CALL"), SpanType::LlmCall);
        assert!(SpanType::Model.is_llm());
        assert!(!SpanType::Agent.is_llm());
    }

    #[test]
    fn test_platform_call_type_scope() {
        assert!(PlatformType::Cozeloop.accepts_call_type("Custom"));
        assert!(!PlatformType::Cozeloop.accepts_call_type("Evaluator"));
        assert!(PlatformType::Evaluator.accepts_call_type("Evaluator"));
        assert!(!PlatformType::Prompt.accepts_call_type("Custom"));
        assert_eq!("".parse::<PlatformType>(), Ok(PlatformType::Cozeloop));
        assert!("bogus".parse::<PlatformType>().is_err());
    }

    #[test]
    fn test_ttl_tier_from_days() {
        assert_eq!(TtlTier::from_days(3), TtlTier::Days3);
        assert_eq!(TtlTier::from_days(1), TtlTier::Days3);
        assert_eq!(TtlTier::from_days(14), TtlTier::Days3);
        assert_eq!(TtlTier::from_days(15), TtlTier::Days15);
        assert_eq!(TtlTier::from_days(60), TtlTier::Days30);
        assert_eq!(TtlTier::from_days(365), TtlTier::Days90);
        assert_eq!(TtlTier::Days30.days(), 30);
    }

    #[test]
    fn test_span_validate() {
        let mut span = Span {
            trace_id: "T1".into(),
            span_id: "S1".into(),
            workspace_id: "7".into(),
            start_time_us: 1_000_000,
            duration_us: 250_000,
            ..Default::default()
        };
        assert!(span.validate().is_ok());
        assert!(span.is_root());

        span.logic_delete_time_us = Some(1_100_000);
        assert!(span.validate().is_err());

        span.logic_delete_time_us = None;
        span.duration_us = -1;
        assert!(span.validate().is_err());
    }

    #[test]
    fn test_cursor_token() {
        let cursor = SpanCursor {
            start_time_us: 1_000,
            trace_id: "T1".into(),
            span_id: "S1".into(),
        };
        let token = cursor.encode();
        assert!(!token.contains('{'));
        assert_eq!(SpanCursor::decode(&token), Ok(cursor));
        assert!(SpanCursor::decode("not-a-token!").is_err());
    }

    #[test]
    fn test_span_tokens() {
        let mut span = Span::default();
        span.tags_long.insert(TAG_INPUT_TOKENS.into(), 12);
        assert_eq!(span.input_tokens(), 12);
        assert_eq!(span.output_tokens(), 0);
    }
}
