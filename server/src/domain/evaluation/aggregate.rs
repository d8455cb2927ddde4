//! Experiment result aggregation
//!
//! Folds the scores and options of finished turns into per-evaluator and
//! per-annotation-tag aggregates. Exposed numbers are rounded to two decimals.

use std::collections::{BTreeMap, HashMap};

use crate::core::constants::SCORE_DISTRIBUTION_TOP_N;
use crate::data::types::{
    AggregateData, AggregateDataType, AggregateResult, AggregatorResult, AggregatorType,
    AnnotationAggregateResult, EvaluatorAggregateResult, OptionDistributionItem,
    ScoreDistributionItem, TurnResult, TurnRunState,
};

const OTHER_BUCKET: &str = "other";

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Score label of a distribution bucket ("1", "0.5", "0.33")
fn score_label(score: f64) -> String {
    let rounded = round2(score);
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

/// Shares of `counts` in whole hundredths summing to 1.0. Leftover
/// hundredths go to the largest remainders, earlier buckets first on ties.
fn shares(counts: &[i64]) -> Vec<f64> {
    let total: i64 = counts.iter().sum();
    if total <= 0 {
        return vec![0.0; counts.len()];
    }
    let mut units: Vec<i64> = counts.iter().map(|c| c * 100 / total).collect();
    let mut by_remainder: Vec<(usize, i64)> = counts
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c * 100 % total))
        .collect();
    by_remainder.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let leftover = (100 - units.iter().sum::<i64>()).max(0) as usize;
    for (i, _) in by_remainder.into_iter().take(leftover) {
        units[i] += 1;
    }
    units.into_iter().map(|u| u as f64 / 100.0).collect()
}

/// Values collected for one evaluator or tag
#[derive(Default)]
struct Samples {
    scores: Vec<f64>,
    options: Vec<String>,
}

impl Samples {
    fn push(&mut self, score: Option<f64>, option: Option<&str>) {
        if let Some(score) = score.filter(|s| s.is_finite()) {
            self.scores.push(score);
        }
        if let Some(option) = option.filter(|o| !o.is_empty()) {
            self.options.push(option.to_string());
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregationEngine {
    top_n: usize,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self {
            top_n: SCORE_DISTRIBUTION_TOP_N,
        }
    }
}

impl AggregationEngine {
    pub fn aggregate(&self, experiment_id: i64, turns: &[TurnResult], now_ms: i64) -> AggregateResult {
        let mut evaluators: BTreeMap<i64, Samples> = BTreeMap::new();
        let mut tags: BTreeMap<i64, Samples> = BTreeMap::new();

        for turn in turns.iter().filter(|t| t.state == TurnRunState::Success) {
            for record in turn.evaluator_records.iter().filter(|r| r.error.is_none()) {
                evaluators
                    .entry(record.evaluator_version_id)
                    .or_default()
                    .push(record.effective_score(), record.option.as_deref());
            }
            for annotation in &turn.annotations {
                tags.entry(annotation.tag_key_id)
                    .or_default()
                    .push(annotation.score, annotation.option.as_deref());
            }
        }

        AggregateResult {
            experiment_id,
            evaluator_results: evaluators
                .into_iter()
                .map(|(evaluator_version_id, samples)| EvaluatorAggregateResult {
                    evaluator_version_id,
                    results: self.results(&samples),
                })
                .collect(),
            annotation_results: tags
                .into_iter()
                .map(|(tag_key_id, samples)| AnnotationAggregateResult {
                    tag_key_id,
                    results: self.results(&samples),
                })
                .collect(),
            updated_at_ms: now_ms,
        }
    }

    fn results(&self, samples: &Samples) -> Vec<AggregatorResult> {
        let mut out = Vec::new();
        if !samples.scores.is_empty() {
            let scores = &samples.scores;
            let sum: f64 = scores.iter().sum();
            let max = scores.iter().copied().fold(f64::MIN, f64::max);
            let min = scores.iter().copied().fold(f64::MAX, f64::min);
            for (aggregator_type, value) in [
                (AggregatorType::Average, sum / scores.len() as f64),
                (AggregatorType::Sum, sum),
                (AggregatorType::Max, max),
                (AggregatorType::Min, min),
            ] {
                out.push(AggregatorResult {
                    aggregator_type,
                    data: AggregateData {
                        data_type: AggregateDataType::Double,
                        value: Some(round2(value)),
                        score_distribution: None,
                        option_distribution: None,
                    },
                });
            }
            out.push(AggregatorResult {
                aggregator_type: AggregatorType::ScoreDistribution,
                data: AggregateData {
                    data_type: AggregateDataType::ScoreDistribution,
                    value: None,
                    score_distribution: Some(self.score_distribution(scores)),
                    option_distribution: None,
                },
            });
        }
        if !samples.options.is_empty() {
            out.push(AggregatorResult {
                aggregator_type: AggregatorType::OptionDistribution,
                data: AggregateData {
                    data_type: AggregateDataType::OptionDistribution,
                    value: None,
                    score_distribution: None,
                    option_distribution: Some(option_distribution(&samples.options)),
                },
            });
        }
        out
    }

    /// Top buckets by count; the rest merge into "other"
    fn score_distribution(&self, scores: &[f64]) -> Vec<ScoreDistributionItem> {
        let mut counts: HashMap<String, (f64, i64)> = HashMap::new();
        for score in scores {
            let entry = counts.entry(score_label(*score)).or_insert((round2(*score), 0));
            entry.1 += 1;
        }
        let mut buckets: Vec<(String, f64, i64)> =
            counts.into_iter().map(|(label, (v, c))| (label, v, c)).collect();
        buckets.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.total_cmp(&b.1)));

        let mut kept: Vec<(String, i64)> = buckets
            .iter()
            .take(self.top_n)
            .map(|(label, _, count)| (label.clone(), *count))
            .collect();
        let other: i64 = buckets.iter().skip(self.top_n).map(|b| b.2).sum();
        if other > 0 {
            kept.push((OTHER_BUCKET.to_string(), other));
        }

        let counts: Vec<i64> = kept.iter().map(|k| k.1).collect();
        kept.into_iter()
            .zip(shares(&counts))
            .map(|((score, count), percentage)| ScoreDistributionItem {
                score,
                count,
                percentage,
            })
            .collect()
    }
}

fn option_distribution(options: &[String]) -> Vec<OptionDistributionItem> {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for option in options {
        *counts.entry(option.as_str()).or_default() += 1;
    }
    let mut buckets: Vec<(&str, i64)> = counts.into_iter().collect();
    buckets.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let counts: Vec<i64> = buckets.iter().map(|b| b.1).collect();
    buckets
        .into_iter()
        .zip(shares(&counts))
        .map(|((option, count), percentage)| OptionDistributionItem {
            option: option.to_string(),
            count,
            percentage,
        })
        .collect()
}
