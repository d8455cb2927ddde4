//! Shared data types
//!
//! Records persisted by the span store and the metadata store, plus the
//! query parameter and result shapes their repositories exchange.

mod annotation;
mod dataset;
mod experiment;
mod span;
mod tag;
mod view;

pub use annotation::{
    Annotation, AnnotationKey, AnnotationStatus, AnnotationType, AnnotationValue,
    AnnotationValueType, AutoEvaluateMeta, Correction, CorrectionType, ValueColumns,
};
pub use dataset::{
    Audio, Content, ContentType, Dataset, DatasetCategory, DatasetItem, DisplayFormat, FieldData,
    FieldSchema, Image, ItemErrorDetail, ItemErrorGroup, ItemErrorType, ItemFieldError,
    ItemStatus,
};
pub use experiment::{
    AggregateData, AggregateDataType, AggregateResult, AggregatorResult, AggregatorType,
    AnnotationAggregateResult, ConnectorConf, EvalConf, EvalSetItem, EvalSetTurn,
    EvaluatorAggregateResult, EvaluatorConf, EvaluatorIngressConf, EvaluatorRecord,
    EvaluatorsConf, Experiment, ExptFilterFields, ExptListFilter, ExptStats, ExptStatus,
    ExptStatusChange, ExptType, FieldAdapter, FieldConf, FieldSource, ListExperimentsParams,
    OptionDistributionItem, ScoreCorrection, ScoreDistributionItem, SourceType, TargetConf, TargetIngressConf, TurnAnnotation, TurnResult, TurnRunState,
};
pub use span::{
    AttrTos, CallTypeScope, GetTraceParams, ListSpansParams, PlatformType, SoftDeleteParams, Span,
    SpanCursor, SpanListType, SpanOrder, SpanPage, SpanType, TAG_INPUT_TOKENS, TAG_OUTPUT_TOKENS,
    TraceTokens, TraceWindow, TtlTier,
};
pub use tag::{TagContentType, TagInfo, TagValue};
pub use view::{View, ViewPatch};
