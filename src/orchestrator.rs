//! Workflow orchestrator.
//!
//! Drives the five-state pipeline:
//!
//! ```text
//! ExtractFeatures -> ReasonOcr -> {PriceCard || VerifyAuthenticity} -> Aggregate
//! ```
//!
//! Each stage runs under its own retry budget and hard deadline. Extract
//! and Aggregate failures terminate the execution through the error
//! persistor; the middle stages substitute fallback values and the
//! pipeline continues, so Aggregate always observes all three inputs. The
//! whole execution runs under one deadline; on expiry in-flight work is
//! cancelled and whatever intermediate outputs exist are persisted.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::aggregate::Aggregator;
use crate::authenticity::{AuthenticityAgent, AuthenticityResult};
use crate::config::PipelineConfig;
use crate::context::{Stage, StageContext, TerminalState};
use crate::error::Error;
use crate::failure::{ErrorPersistor, PartialOutputs};
use crate::objects::ObjectRef;
use crate::pricing::{PricingAgent, PricingResult};
use crate::reasoning::{
    fallback_metadata, CardHints, OcrContext, ReasoningAgent, ReasoningOutcome, VisualContext,
};
use crate::retry::{retry, with_deadline, RetryPolicy};
use crate::store::CardRecord;
use crate::telemetry::{ExecutionTrace, StageReport, StageStatus};
use crate::vision::FeatureExtractor;

/// Input for one pipeline execution, shaped from a `CardCreated` event.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    /// Correlation key; also the idempotency key at the trigger.
    pub request_id: String,
    pub owner_id: String,
    pub card_id: String,
    pub front_key: String,
    pub back_key: Option<String>,
    pub hints: Option<CardHints>,
}

/// Terminal result of one execution.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub request_id: String,
    pub terminal_state: TerminalState,
    /// The persisted record on success.
    pub record: Option<CardRecord>,
    /// Stage telemetry in execution order.
    pub trace: ExecutionTrace,
}

/// State shared with the deadline watchdog: which stage is running and
/// which outputs already exist.
#[derive(Default)]
struct ExecutionShared {
    current_stage: Mutex<Option<Stage>>,
    partials: Mutex<PartialOutputs>,
}

impl ExecutionShared {
    fn enter(&self, stage: Stage) {
        if let Ok(mut current) = self.current_stage.lock() {
            *current = Some(stage);
        }
    }

    fn current(&self) -> Stage {
        self.current_stage
            .lock()
            .ok()
            .and_then(|current| *current)
            .unwrap_or(Stage::ExtractFeatures)
    }

    fn snapshot(&self) -> PartialOutputs {
        self.partials
            .lock()
            .map(|partials| partials.clone())
            .unwrap_or_default()
    }
}

/// Drives executions over the shared stage agents.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    extractor: Arc<FeatureExtractor>,
    reasoner: Arc<ReasoningAgent>,
    pricer: Arc<PricingAgent>,
    authenticator: Arc<AuthenticityAgent>,
    aggregator: Arc<Aggregator>,
    persistor: Arc<ErrorPersistor>,
    bucket: String,
}

impl PipelineOrchestrator {
    /// Wire an orchestrator over the stage agents.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<FeatureExtractor>,
        reasoner: Arc<ReasoningAgent>,
        pricer: Arc<PricingAgent>,
        authenticator: Arc<AuthenticityAgent>,
        aggregator: Arc<Aggregator>,
        persistor: Arc<ErrorPersistor>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            config,
            extractor,
            reasoner,
            pricer,
            authenticator,
            aggregator,
            persistor,
            bucket: bucket.into(),
        }
    }

    /// Run one execution to its terminal state.
    ///
    /// Exceeding the execution deadline cancels in-flight stage work,
    /// persists whatever intermediate outputs exist, and reports `failed`.
    pub async fn run(&self, input: PipelineInput) -> PipelineOutcome {
        let ctx = StageContext::new(
            input.request_id.clone(),
            input.owner_id.clone(),
            input.card_id.clone(),
            self.config.execution_deadline(),
        );
        let shared = Arc::new(ExecutionShared::default());

        tracing::info!(
            request_id = %ctx.request_id,
            owner_id = %ctx.owner_id,
            card_id = %ctx.card_id,
            "pipeline execution started"
        );

        let inner = self.run_stages(&ctx, &input, &shared);
        match tokio::time::timeout(self.config.execution_deadline(), inner).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let stage = shared.current();
                let error = Error::deadline_exceeded(self.config.execution_deadline_ms);
                tracing::error!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    stage = %stage,
                    "execution deadline exceeded, aborting"
                );
                self.persistor
                    .persist_failure(&ctx, stage, &error, shared.snapshot())
                    .await;

                let mut trace = ExecutionTrace::new();
                trace.record(StageReport::new(
                    stage.as_str(),
                    ctx.elapsed_ms(),
                    1,
                    StageStatus::Failed,
                ));
                PipelineOutcome {
                    request_id: ctx.request_id.clone(),
                    terminal_state: TerminalState::Failed,
                    record: None,
                    trace,
                }
            }
        }
    }

    async fn run_stages(
        &self,
        ctx: &StageContext,
        input: &PipelineInput,
        shared: &ExecutionShared,
    ) -> PipelineOutcome {
        let mut trace = ExecutionTrace::new();

        // --- ExtractFeatures -------------------------------------------------
        shared.enter(Stage::ExtractFeatures);
        let front_ref = ObjectRef::new(&self.bucket, &input.front_key);
        let back_ref = input
            .back_key
            .as_ref()
            .map(|key| ObjectRef::new(&self.bucket, key));

        let started = Instant::now();
        let extract_deadline_ms = self.config.stage_deadlines.extract_ms;
        let outcome = retry(&RetryPolicy::stage(), |_| {
            let front_ref = front_ref.clone();
            let back_ref = back_ref.clone();
            async move {
                with_deadline(
                    ctx.stage_deadline(extract_deadline_ms),
                    self.extractor
                        .extract_all(&ctx.owner_id, &front_ref, back_ref.as_ref()),
                )
                .await
            }
        })
        .await;

        let features = match outcome.result {
            Ok(features) => {
                trace.record(StageReport::new(
                    Stage::ExtractFeatures.as_str(),
                    started.elapsed().as_millis() as u64,
                    outcome.attempts,
                    StageStatus::Ok,
                ));
                features
            }
            Err(error) => {
                trace.record(StageReport::new(
                    Stage::ExtractFeatures.as_str(),
                    started.elapsed().as_millis() as u64,
                    outcome.attempts,
                    StageStatus::Failed,
                ));
                self.persistor
                    .persist_failure(
                        ctx,
                        Stage::ExtractFeatures,
                        &error,
                        PartialOutputs::default(),
                    )
                    .await;
                return PipelineOutcome {
                    request_id: ctx.request_id.clone(),
                    terminal_state: TerminalState::Failed,
                    record: None,
                    trace,
                };
            }
        };

        // --- ReasonOcr -------------------------------------------------------
        shared.enter(Stage::ReasonOcr);
        let front = &features.front;
        let ocr_context = OcrContext {
            blocks: front.blocks.clone(),
            visual: VisualContext {
                holo_variance: front.holo_variance,
                border_symmetry: front.borders.symmetry_score,
                quality: front.quality,
            },
            hints: input.hints.clone(),
        };

        let started = Instant::now();
        let reason_deadline = ctx.stage_deadline(self.config.stage_deadlines.reason_ms);
        let reasoned = with_deadline(reason_deadline, async {
            Ok(self.reasoner.reason(ctx, &ocr_context).await)
        })
        .await;

        let (outcome_reason, reason_attempts, reason_usage) = match reasoned {
            Ok(stage) => (stage.outcome, stage.attempts, stage.usage),
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %error,
                    "reasoning stage deadline elapsed, substituting fallback metadata"
                );
                (
                    ReasoningOutcome::FellBack(fallback_metadata(&ocr_context)),
                    1,
                    Default::default(),
                )
            }
        };
        let reasoning_fell_back = outcome_reason.fallback_used();
        let metadata = outcome_reason.into_metadata();
        if let Ok(mut partials) = shared.partials.lock() {
            partials.metadata = Some(metadata.clone());
        }
        trace.record(
            StageReport::new(
                Stage::ReasonOcr.as_str(),
                started.elapsed().as_millis() as u64,
                reason_attempts,
                if reasoning_fell_back {
                    StageStatus::Fallback
                } else {
                    StageStatus::Ok
                },
            )
            .with_tokens(reason_usage.input_tokens, reason_usage.output_tokens)
            .with_confidence(metadata.overall_confidence)
            .with_fallback_used(reasoning_fell_back),
        );

        // --- PriceCard || VerifyAuthenticity ---------------------------------
        shared.enter(Stage::PriceCard);
        let price_deadline_ms = self.config.stage_deadlines.price_ms;
        let price_future = async {
            let started = Instant::now();
            let outcome = retry(&RetryPolicy::stage(), |_| {
                let features = front.clone();
                let metadata = metadata.clone();
                async move {
                    with_deadline(ctx.stage_deadline(price_deadline_ms), async {
                        Ok(self.pricer.price(ctx, &features, &metadata).await)
                    })
                    .await
                }
            })
            .await;
            (outcome, started.elapsed().as_millis() as u64)
        };

        let authenticity_deadline_ms = self.config.stage_deadlines.authenticity_ms;
        let authenticity_future = async {
            let started = Instant::now();
            let outcome = retry(&RetryPolicy::stage(), |_| {
                let features = front.clone();
                let metadata = metadata.clone();
                let front_ref = front_ref.clone();
                async move {
                    with_deadline(
                        ctx.stage_deadline(authenticity_deadline_ms),
                        self.authenticator.verify(ctx, &features, &metadata, &front_ref),
                    )
                    .await
                }
            })
            .await;
            (outcome, started.elapsed().as_millis() as u64)
        };

        let ((price_outcome, price_latency), (auth_outcome, auth_latency)) =
            tokio::join!(price_future, authenticity_future);

        let (pricing, pricing_fell_back) = match price_outcome.result {
            Ok(stage) => {
                trace.record(
                    StageReport::new(
                        Stage::PriceCard.as_str(),
                        price_latency,
                        price_outcome.attempts,
                        StageStatus::Ok,
                    )
                    .with_tokens(stage.usage.input_tokens, stage.usage.output_tokens)
                    .with_confidence(stage.result.confidence)
                    .with_fallback_used(stage.summary_fallback),
                );
                (stage.result, false)
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %error,
                    "pricing stage exhausted retries, substituting null valuation"
                );
                trace.record(
                    StageReport::new(
                        Stage::PriceCard.as_str(),
                        price_latency,
                        price_outcome.attempts,
                        StageStatus::Fallback,
                    )
                    .with_fallback_used(true),
                );
                (
                    PricingResult::empty("pricing unavailable: stage budget exhausted"),
                    true,
                )
            }
        };

        let (authenticity, authenticity_fell_back) = match auth_outcome.result {
            Ok(stage) => {
                trace.record(
                    StageReport::new(
                        Stage::VerifyAuthenticity.as_str(),
                        auth_latency,
                        auth_outcome.attempts,
                        StageStatus::Ok,
                    )
                    .with_confidence(stage.result.score)
                    .with_fallback_used(!stage.result.verified_by_ai),
                );
                (stage.result, false)
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %error,
                    "authenticity stage exhausted retries, substituting zero score"
                );
                trace.record(
                    StageReport::new(
                        Stage::VerifyAuthenticity.as_str(),
                        auth_latency,
                        auth_outcome.attempts,
                        StageStatus::Fallback,
                    )
                    .with_fallback_used(true),
                );
                (
                    AuthenticityResult::unverified_zero(
                        "authenticity unavailable: stage budget exhausted",
                    ),
                    true,
                )
            }
        };

        if let Ok(mut partials) = shared.partials.lock() {
            partials.pricing = Some(pricing.clone());
            partials.authenticity = Some(authenticity.clone());
        }

        // --- Aggregate -------------------------------------------------------
        shared.enter(Stage::Aggregate);
        let clean_run = !reasoning_fell_back && !pricing_fell_back && !authenticity_fell_back;
        let started = Instant::now();
        let aggregate_deadline_ms = self.config.stage_deadlines.aggregate_ms;
        let outcome = retry(&RetryPolicy::aggregate(), |_| {
            let metadata = metadata.clone();
            let pricing = pricing.clone();
            let authenticity = authenticity.clone();
            async move {
                with_deadline(
                    ctx.stage_deadline(aggregate_deadline_ms),
                    self.aggregator
                        .aggregate(ctx, metadata, pricing, authenticity, clean_run),
                )
                .await
            }
        })
        .await;

        match outcome.result {
            Ok(record) => {
                trace.record(StageReport::new(
                    Stage::Aggregate.as_str(),
                    started.elapsed().as_millis() as u64,
                    outcome.attempts,
                    StageStatus::Ok,
                ));
                tracing::info!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    elapsed_ms = ctx.elapsed_ms(),
                    clean_run,
                    "pipeline execution succeeded"
                );
                PipelineOutcome {
                    request_id: ctx.request_id.clone(),
                    terminal_state: TerminalState::Success,
                    record: Some(record),
                    trace,
                }
            }
            Err(error) => {
                trace.record(StageReport::new(
                    Stage::Aggregate.as_str(),
                    started.elapsed().as_millis() as u64,
                    outcome.attempts,
                    StageStatus::Failed,
                ));
                self.persistor
                    .persist_failure(
                        ctx,
                        Stage::Aggregate,
                        &error,
                        PartialOutputs {
                            metadata: Some(metadata),
                            pricing: Some(pricing),
                            authenticity: Some(authenticity),
                        },
                    )
                    .await;
                PipelineOutcome {
                    request_id: ctx.request_id.clone(),
                    terminal_state: TerminalState::Partial,
                    record: None,
                    trace,
                }
            }
        }
    }
}
