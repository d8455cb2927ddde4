//! Experiment runner
//!
//! Drives each experiment through `pending → processing → (draining →)?
//! {success | failed | terminated}`. Queued turns are executed item by item:
//! items in parallel up to `item_concur_num`, the turns of one item in order,
//! and the evaluators of one turn in parallel up to `evaluator_concur_num`.
//!
//! Offline experiments finish once every turn is terminal. Online experiments
//! accept new items while processing and only end by stop or timeout. A
//! separate reaper fails turns that sit in `processing` past the horizon.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use futures::stream;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::aggregate::AggregationEngine;
use super::config::project;
use crate::core::config::EvaluationConfig;
use crate::data::ExperimentRepository;
use crate::data::types::{
    EvaluatorConf, EvaluatorRecord, Experiment, ExptStats, ExptStatus, ExptStatusChange,
    ExptType, TurnResult, TurnRunState,
};
use crate::domain::error::{CODE_FATAL, ServiceError, get_code};
use crate::domain::external::{
    EvaluatorInvocation, EvaluatorInvoker, TargetInvocation, TargetInvoker, TargetOutput,
};
use crate::domain::metrics::{MetricsEmitter, RetryInfo};
use crate::utils::retry::{backoff_delay, with_jitter};
use crate::utils::time::now_ms;

pub const TIMEOUT_MESSAGE: &str = "timeout";
pub const ZOMBIE_REASON: &str = "Zombie";

/// Longest an online experiment sleeps between checks for new items
const IDLE_POLL_MS: i64 = 1_000;

fn mode(expt_type: ExptType) -> &'static str {
    match expt_type {
        ExptType::Offline => "submit",
        ExptType::Online => "append",
    }
}

/// Turn counters and token totals of an experiment
pub fn tally(turns: &[TurnResult]) -> ExptStats {
    let mut stats = ExptStats::default();
    for turn in turns {
        match turn.state {
            TurnRunState::Queueing => stats.pending_turn_cnt += 1,
            TurnRunState::Processing => stats.processing_turn_cnt += 1,
            TurnRunState::Success => stats.success_turn_cnt += 1,
            TurnRunState::Fail => stats.fail_turn_cnt += 1,
            TurnRunState::Terminated => stats.terminated_turn_cnt += 1,
        }
        stats.input_tokens += turn.input_tokens;
        stats.output_tokens += turn.output_tokens;
    }
    stats
}

#[derive(Clone, Default)]
struct RunControl {
    stop: CancellationToken,
    wake: Arc<Notify>,
}

struct TurnOutcome {
    target_output: TargetOutput,
    evaluator_records: Vec<EvaluatorRecord>,
    input_tokens: i64,
    output_tokens: i64,
}

pub struct ExperimentRunner {
    experiments: Arc<dyn ExperimentRepository>,
    target: Arc<dyn TargetInvoker>,
    evaluator: Arc<dyn EvaluatorInvoker>,
    metrics: MetricsEmitter,
    aggregator: AggregationEngine,
    config: EvaluationConfig,
    runs: DashMap<i64, RunControl>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl ExperimentRunner {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        target: Arc<dyn TargetInvoker>,
        evaluator: Arc<dyn EvaluatorInvoker>,
        metrics: MetricsEmitter,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            experiments,
            target,
            evaluator,
            metrics,
            aggregator: AggregationEngine::default(),
            config,
            runs: DashMap::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Drive an experiment in the background; no-op when already driven
    pub fn start(self: &Arc<Self>, experiment_id: i64) {
        if self.shutdown.is_cancelled() || self.runs.contains_key(&experiment_id) {
            return;
        }
        let runner = Arc::clone(self);
        self.tracker.spawn(async move {
            match runner.run(experiment_id).await {
                Ok(status) => {
                    tracing::debug!(experiment_id, %status, "Experiment driver exited");
                }
                Err(ServiceError::Conflict(_)) => {}
                Err(e) => {
                    tracing::error!(experiment_id, error = %e, "Experiment driver failed");
                }
            }
        });
    }

    /// Drive an experiment to a terminal state (or until shutdown)
    pub async fn run(&self, experiment_id: i64) -> Result<ExptStatus, ServiceError> {
        let control = match self.runs.entry(experiment_id) {
            Entry::Occupied(_) => {
                return Err(ServiceError::Conflict(format!(
                    "experiment {} is already running",
                    experiment_id
                )));
            }
            Entry::Vacant(slot) => slot.insert(RunControl::default()).clone(),
        };
        let outcome = self.drive(experiment_id, &control).await;
        self.runs.remove(&experiment_id);
        outcome
    }

    /// Wake an online experiment waiting for items
    pub fn notify(&self, experiment_id: i64) {
        if let Some(control) = self.runs.get(&experiment_id) {
            control.wake.notify_one();
        }
    }

    /// Stop an experiment: pending ones end at once, running ones drain
    pub async fn stop(
        self: &Arc<Self>,
        experiment_id: i64,
        message: &str,
    ) -> Result<ExptStatus, ServiceError> {
        let now = now_ms();
        let terminated = self
            .experiments
            .transition_status(
                experiment_id,
                &ExptStatusChange {
                    from: vec![ExptStatus::Pending],
                    to: ExptStatus::Terminated,
                    status_message: Some(message.to_string()),
                    end_at_ms: Some(now),
                    ..Default::default()
                },
                now,
            )
            .await?;
        if terminated {
            return Ok(ExptStatus::Terminated);
        }

        let draining = self
            .experiments
            .transition_status(
                experiment_id,
                &ExptStatusChange {
                    from: vec![ExptStatus::Processing],
                    to: ExptStatus::Draining,
                    status_message: Some(message.to_string()),
                    ..Default::default()
                },
                now,
            )
            .await?;
        if draining {
            tracing::info!(experiment_id, "Experiment stop requested; draining");
            match self.runs.get(&experiment_id) {
                Some(control) => control.stop.cancel(),
                None => self.start(experiment_id),
            }
            return Ok(ExptStatus::Draining);
        }

        Ok(self.load(experiment_id).await?.status)
    }

    /// Re-drive experiments left active by a previous process
    pub async fn resume(self: &Arc<Self>) -> Result<usize, ServiceError> {
        let active = self.experiments.list_active_experiments().await?;
        let now = now_ms();
        for expt in &active {
            let requeued = self
                .experiments
                .transition_turns(expt.id, TurnRunState::Processing, TurnRunState::Queueing, now)
                .await?;
            tracing::info!(experiment_id = expt.id, requeued, "Resuming experiment");
            self.start(expt.id);
        }
        Ok(active.len())
    }

    /// Stop starting work and wait for drivers to park
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            tracing::warn!("Experiment drivers did not stop within the shutdown timeout");
        }
    }

    // ------------------------------------------------------------------------
    // Zombie reaping
    // ------------------------------------------------------------------------

    /// Fail turns stuck in processing past the horizon
    pub async fn reap_zombies(&self) -> Result<u64, ServiceError> {
        let horizon_ms = i64::try_from(self.config.zombie_horizon_secs.saturating_mul(1000))
            .unwrap_or(i64::MAX);
        let stale = self
            .experiments
            .list_stale_turns(now_ms().saturating_sub(horizon_ms))
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut by_experiment: BTreeMap<i64, Vec<TurnResult>> = BTreeMap::new();
        for turn in stale {
            by_experiment.entry(turn.experiment_id).or_default().push(turn);
        }

        let mut total = 0;
        for (experiment_id, turns) in by_experiment {
            let Some(expt) = self.experiments.get_experiment(experiment_id).await? else {
                continue;
            };
            let reason = ServiceError::Transient(ZOMBIE_REASON.to_string());
            let now = now_ms();
            let count = turns.len() as u64;
            for mut turn in turns {
                turn.state = TurnRunState::Fail;
                turn.is_err = true;
                turn.stable = true;
                turn.code = reason.code();
                turn.error_message = ZOMBIE_REASON.to_string();
                turn.updated_at_ms = now;
                self.experiments.upsert_turn_result(&turn).await?;
            }
            tracing::warn!(experiment_id, count, "Reaped zombie turns");
            self.metrics
                .emit_zombies(expt.workspace_id, expt.expt_type.as_str(), count);
            self.refresh_stats(&expt).await?;
            total += count;
        }
        Ok(total)
    }

    /// Periodic zombie reaping until shutdown; `None` when disabled
    pub fn start_reaper(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let interval_secs = self.config.reap_interval_secs;
        if interval_secs == 0 {
            tracing::debug!("Zombie reaper disabled (interval is zero)");
            return None;
        }
        let runner = Arc::clone(self);
        tracing::debug!(interval_secs, "Starting zombie reaper");

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Zombie reaper shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = runner.reap_zombies().await {
                            tracing::warn!(error = %e, "Zombie reaping failed");
                        }
                    }
                }
            }
        }))
    }

    // ------------------------------------------------------------------------
    // Experiment lifecycle
    // ------------------------------------------------------------------------

    async fn load(&self, experiment_id: i64) -> Result<Experiment, ServiceError> {
        self.experiments
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("experiment {}", experiment_id)))
    }

    fn deadline_ms(expt: &Experiment) -> Option<i64> {
        match (expt.start_at_ms, expt.max_alive_time_ms) {
            (Some(start), max_alive) if max_alive > 0 => Some(start.saturating_add(max_alive)),
            _ => None,
        }
    }

    fn timed_out(expt: &Experiment, now: i64) -> bool {
        Self::deadline_ms(expt).is_some_and(|deadline| now > deadline)
    }

    fn emit_status(&self, expt: &Experiment, status: ExptStatus, code: (i32, u8)) {
        self.metrics.emit_expt_eval(
            expt.workspace_id,
            expt.expt_type.as_str(),
            mode(expt.expt_type),
            status.as_str(),
            code,
        );
    }

    async fn drive(
        &self,
        experiment_id: i64,
        control: &RunControl,
    ) -> Result<ExptStatus, ServiceError> {
        let mut expt = self.load(experiment_id).await?;
        if expt.status == ExptStatus::Pending {
            let now = now_ms();
            let started = self
                .experiments
                .transition_status(
                    experiment_id,
                    &ExptStatusChange {
                        from: vec![ExptStatus::Pending],
                        to: ExptStatus::Processing,
                        start_at_ms: Some(now),
                        ..Default::default()
                    },
                    now,
                )
                .await?;
            expt = self.load(experiment_id).await?;
            if started {
                tracing::info!(experiment_id, mode = mode(expt.expt_type), "Experiment started");
                self.emit_status(&expt, ExptStatus::Processing, (0, 0));
            }
        }

        let mut failures = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(expt.status);
            }
            match expt.status {
                status if status.is_terminal() => return Ok(status),
                ExptStatus::Pending => return Ok(ExptStatus::Pending),
                ExptStatus::Draining => {
                    return self.finish(&expt, ExptStatus::Terminated, None).await;
                }
                _ => {}
            }

            if Self::timed_out(&expt, now_ms()) {
                let now = now_ms();
                self.experiments
                    .transition_status(
                        experiment_id,
                        &ExptStatusChange {
                            from: vec![ExptStatus::Processing],
                            to: ExptStatus::Draining,
                            status_message: Some(TIMEOUT_MESSAGE.to_string()),
                            ..Default::default()
                        },
                        now,
                    )
                    .await?;
                tracing::info!(experiment_id, "Experiment exceeded its alive time; draining");
                expt = self.load(experiment_id).await?;
                continue;
            }

            let queued = self.queued_items(experiment_id).await?;
            if queued.is_empty() {
                if expt.expt_type == ExptType::Offline {
                    return self.finish(&expt, ExptStatus::Success, None).await;
                }
                self.refresh_stats(&expt).await?;
                self.idle(&expt, control).await;
            } else {
                match self.run_items(&expt, control, queued).await {
                    Ok(()) => failures = 0,
                    Err(e) if e.is_fatal() => {
                        tracing::error!(experiment_id, error = %e, "Experiment failed");
                        return self
                            .finish(&expt, ExptStatus::Failed, Some(e.to_string()))
                            .await;
                    }
                    Err(e) => {
                        failures += 1;
                        let delay =
                            with_jitter(backoff_delay(self.config.retry_base_delay_ms, failures));
                        tracing::warn!(
                            experiment_id,
                            error = %e,
                            delay_ms = delay.as_millis(),
                            "Experiment pass failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                self.refresh_stats(&expt).await?;
            }
            expt = self.load(experiment_id).await?;
        }
    }

    /// Queued turns grouped per item, in item then turn order
    async fn queued_items(&self, experiment_id: i64) -> Result<Vec<Vec<TurnResult>>, ServiceError> {
        let turns = self.experiments.list_turn_results(experiment_id).await?;
        let mut items: Vec<Vec<TurnResult>> = Vec::new();
        for turn in turns
            .into_iter()
            .filter(|t| t.state == TurnRunState::Queueing)
        {
            match items.last_mut() {
                Some(item) if item[0].item_id == turn.item_id => item.push(turn),
                _ => items.push(vec![turn]),
            }
        }
        Ok(items)
    }

    async fn idle(&self, expt: &Experiment, control: &RunControl) {
        let wait_ms = match Self::deadline_ms(expt) {
            Some(deadline) => (deadline - now_ms() + 1).clamp(1, IDLE_POLL_MS),
            None => IDLE_POLL_MS,
        };
        tokio::select! {
            _ = control.stop.cancelled() => {}
            _ = control.wake.notified() => {}
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(wait_ms as u64)) => {}
        }
    }

    async fn refresh_stats(&self, expt: &Experiment) -> Result<ExptStats, ServiceError> {
        let turns = self.experiments.list_turn_results(expt.id).await?;
        let stats = tally(&turns);
        self.experiments
            .update_stats(expt.id, &stats, now_ms())
            .await?;
        Ok(stats)
    }

    async fn finish(
        &self,
        expt: &Experiment,
        status: ExptStatus,
        message: Option<String>,
    ) -> Result<ExptStatus, ServiceError> {
        let now = now_ms();
        self.experiments
            .transition_turns(expt.id, TurnRunState::Queueing, TurnRunState::Terminated, now)
            .await?;
        let stats = self.refresh_stats(expt).await?;
        let code = match status {
            ExptStatus::Failed => (CODE_FATAL, 1),
            _ => (0, 0),
        };
        let changed = self
            .experiments
            .transition_status(
                expt.id,
                &ExptStatusChange {
                    from: vec![ExptStatus::Processing, ExptStatus::Draining],
                    to: status,
                    status_message: message,
                    end_at_ms: Some(now),
                    ..Default::default()
                },
                now,
            )
            .await?;
        if changed {
            tracing::info!(
                experiment_id = expt.id,
                %status,
                success = stats.success_turn_cnt,
                failed = stats.fail_turn_cnt,
                "Experiment finished"
            );
            self.emit_status(expt, status, code);
            let started = Instant::now();
            let aggregated = self.save_aggregate(expt.id).await;
            self.metrics
                .emit_calculate_aggr(expt.workspace_id, &aggregated, started.elapsed());
            if let Err(e) = aggregated {
                tracing::warn!(experiment_id = expt.id, error = %e, "Aggregation failed");
            }
        }
        Ok(self.load(expt.id).await?.status)
    }

    async fn save_aggregate(&self, experiment_id: i64) -> Result<(), ServiceError> {
        let turns = self.experiments.list_turn_results(experiment_id).await?;
        let aggregate = self.aggregator.aggregate(experiment_id, &turns, now_ms());
        self.experiments.save_aggregate(&aggregate).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Items and turns
    // ------------------------------------------------------------------------

    async fn run_items(
        &self,
        expt: &Experiment,
        control: &RunControl,
        items: Vec<Vec<TurnResult>>,
    ) -> Result<(), ServiceError> {
        let concurrency = expt
            .eval_conf
            .item_concur_num
            .unwrap_or(self.config.item_concur_num)
            .max(1);
        let halt = control.stop.child_token();
        let mut runs = stream::iter(items)
            .map(|turns| self.run_item(expt, &halt, turns))
            .buffer_unordered(concurrency);

        let mut first_error: Option<ServiceError> = None;
        while let Some(result) = runs.next().await {
            if let Err(e) = result {
                if e.is_fatal() {
                    halt.cancel();
                }
                let replace = match &first_error {
                    None => true,
                    Some(prev) => e.is_fatal() && !prev.is_fatal(),
                };
                if replace {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn run_item(
        &self,
        expt: &Experiment,
        halt: &CancellationToken,
        turns: Vec<TurnResult>,
    ) -> Result<(), ServiceError> {
        if halt.is_cancelled() || self.shutdown.is_cancelled() || Self::timed_out(expt, now_ms())
        {
            return Ok(());
        }
        let started = Instant::now();
        let mut code = (0, 0);
        let mut retry = RetryInfo::default();
        for turn in turns {
            let done = self.run_turn(expt, turn).await?;
            retry.retry |= done.retry > 0;
            if done.is_err && code.1 == 0 {
                code = (done.code, 1);
                retry.stable = done.stable;
            }
        }
        self.metrics.emit_item_eval(
            expt.workspace_id,
            expt.expt_type.as_str(),
            retry,
            code,
            started.elapsed(),
        );
        Ok(())
    }

    /// Execute one turn with retries; `Err` only for experiment-ending or
    /// storage failures
    async fn run_turn(
        &self,
        expt: &Experiment,
        mut turn: TurnResult,
    ) -> Result<TurnResult, ServiceError> {
        let started = Instant::now();
        turn.state = TurnRunState::Processing;
        turn.updated_at_ms = now_ms();
        self.experiments.upsert_turn_result(&turn).await?;

        let timeout = Duration::from_secs(self.config.turn_timeout_secs.max(1));
        let result = loop {
            let attempt = match tokio::time::timeout(timeout, self.execute_turn(expt, &turn)).await
            {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Transient(format!(
                    "turn timed out after {}s",
                    timeout.as_secs()
                ))),
            };
            match attempt {
                Err(e) if e.is_retryable() && turn.retry < self.config.max_retries => {
                    turn.retry += 1;
                    turn.is_err = true;
                    turn.stable = false;
                    turn.code = e.code();
                    turn.error_message = e.to_string();
                    turn.updated_at_ms = now_ms();
                    self.experiments.upsert_turn_result(&turn).await?;
                    let delay =
                        with_jitter(backoff_delay(self.config.retry_base_delay_ms, turn.retry));
                    tracing::warn!(
                        experiment_id = expt.id,
                        item_id = turn.item_id,
                        turn_id = turn.turn_id,
                        attempt = turn.retry,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying turn"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        };

        match &result {
            Ok(outcome) => {
                turn.state = TurnRunState::Success;
                turn.target_output = outcome.target_output.fields.clone();
                turn.evaluator_records = outcome.evaluator_records.clone();
                turn.input_tokens = outcome.input_tokens;
                turn.output_tokens = outcome.output_tokens;
                turn.is_err = false;
                turn.stable = true;
                turn.code = 0;
                turn.error_message.clear();
            }
            Err(e) => {
                turn.state = TurnRunState::Fail;
                turn.is_err = true;
                turn.stable = !e.is_retryable();
                turn.code = e.code();
                turn.error_message = e.to_string();
            }
        }
        turn.updated_at_ms = now_ms();
        self.experiments.upsert_turn_result(&turn).await?;
        self.metrics.emit_turn_eval(
            expt.workspace_id,
            RetryInfo {
                retry: turn.retry > 0,
                stable: turn.stable,
            },
            get_code(&result),
            started.elapsed(),
        );

        match result {
            Err(e) if e.is_fatal() => Err(e),
            _ => Ok(turn),
        }
    }

    async fn execute_turn(
        &self,
        expt: &Experiment,
        turn: &TurnResult,
    ) -> Result<TurnOutcome, ServiceError> {
        let connector = &expt.eval_conf.connector_conf;
        let invocation = TargetInvocation {
            workspace_id: expt.workspace_id,
            target_id: expt.target_id,
            target_version_id: expt.target_version_id,
            experiment_id: expt.id,
            item_id: turn.item_id,
            turn_id: turn.turn_id,
            inputs: project(&connector.target_conf.ingress_conf.eval_set_adapter, &turn.inputs)?,
        };
        let started = Instant::now();
        let output = self.target.invoke(&invocation).await;
        self.metrics
            .emit_target_invoke(expt.workspace_id, &output, started.elapsed());
        let output = output?;

        let concurrency = connector
            .evaluators_conf
            .evaluator_concur_num
            .unwrap_or(self.config.evaluator_concur_num)
            .max(1);
        let evaluations: Vec<_> = connector
            .evaluators_conf
            .evaluator_conf
            .iter()
            .map(|conf| self.run_evaluator(expt, turn, &output, conf))
            .collect();
        let runs: Vec<Result<(EvaluatorRecord, i64, i64), ServiceError>> =
            stream::iter(evaluations)
                .buffered(concurrency)
                .collect()
                .await;

        let mut outcome = TurnOutcome {
            input_tokens: output.input_tokens,
            output_tokens: output.output_tokens,
            evaluator_records: Vec::with_capacity(runs.len()),
            target_output: output,
        };
        for run in runs {
            let (record, input_tokens, output_tokens) = run?;
            outcome.input_tokens += input_tokens;
            outcome.output_tokens += output_tokens;
            outcome.evaluator_records.push(record);
        }
        Ok(outcome)
    }

    /// One evaluator verdict; ordinary evaluator failures are kept on the record
    async fn run_evaluator(
        &self,
        expt: &Experiment,
        turn: &TurnResult,
        output: &TargetOutput,
        conf: &EvaluatorConf,
    ) -> Result<(EvaluatorRecord, i64, i64), ServiceError> {
        let invocation = EvaluatorInvocation {
            workspace_id: expt.workspace_id,
            evaluator_version_id: conf.evaluator_version_id,
            experiment_id: expt.id,
            item_id: turn.item_id,
            turn_id: turn.turn_id,
            eval_set_fields: project(&conf.ingress_conf.eval_set_adapter, &turn.inputs)?,
            target_fields: project(&conf.ingress_conf.target_adapter, &output.fields)?,
        };
        let started = Instant::now();
        let result = self.evaluator.evaluate(&invocation).await;
        let model_id = result
            .as_ref()
            .map(|o| o.model_id.as_str())
            .unwrap_or_default();
        self.metrics
            .emit_evaluator_run(expt.workspace_id, model_id, &result, started.elapsed());

        let mut record = EvaluatorRecord {
            evaluator_version_id: conf.evaluator_version_id,
            score: None,
            option: None,
            reasoning: String::new(),
            correction: None,
            error: None,
        };
        match result {
            Ok(out) => {
                record.score = out.score;
                record.option = out.option;
                record.reasoning = out.reasoning;
                Ok((record, out.input_tokens, out.output_tokens))
            }
            Err(e) if e.is_retryable() || e.is_fatal() => Err(e),
            Err(e) => {
                record.error = Some(e.to_string());
                Ok((record, 0, 0))
            }
        }
    }
}
