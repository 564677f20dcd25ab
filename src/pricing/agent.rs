//! Pricing agent: adapter fan-out, normalization, and summary.

use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::context::StageContext;
use crate::llm::{extract_json_payload, LlmInvoker, TokenUsage};
use crate::reasoning::CardMetadata;
use crate::retry::{retry, with_deadline, RetryPolicy};
use crate::vision::FeatureEnvelope;

use super::adapter::MarketAdapter;
use super::stats::{drop_outliers, normalize_to_usd_cents, three_point, trend_from_sales};
use super::types::{estimate_condition, CardQuery, Comparable, PricingResult, PricingSummary, Trend};

/// Upper bound on concurrent adapter calls.
const MAX_FAN_OUT: usize = 8;

/// Comparables needed for full count confidence.
const FULL_CONFIDENCE_COMPS: f64 = 20.0;

/// Result of the pricing stage with its telemetry inputs.
#[derive(Debug, Clone)]
pub struct PricedStage {
    pub result: PricingResult,
    pub llm_attempts: u32,
    pub usage: TokenUsage,
    /// True when the summary was synthesized from statistics alone.
    pub summary_fallback: bool,
}

/// Aggregates prices across the configured market adapters.
pub struct PricingAgent {
    adapters: Vec<Arc<dyn MarketAdapter>>,
    invoker: Arc<LlmInvoker>,
    adapter_timeout: Duration,
    total_configured: usize,
}

impl PricingAgent {
    /// Create an agent over the enabled subset of `adapters`.
    pub fn new(
        adapters: Vec<Arc<dyn MarketAdapter>>,
        invoker: Arc<LlmInvoker>,
        config: &PipelineConfig,
    ) -> Self {
        let total_configured = config.adapters_enabled.len().max(1);
        let enabled: Vec<Arc<dyn MarketAdapter>> = adapters
            .into_iter()
            .filter(|a| config.adapters_enabled.contains(a.id()))
            .collect();
        Self {
            adapters: enabled,
            invoker,
            adapter_timeout: Duration::from_millis(config.adapter_call_timeout_ms),
            total_configured,
        }
    }

    /// Produce a valuation for the identified card.
    ///
    /// Adapter failures contribute nothing; with no data at all the result
    /// is the null valuation. This stage never errors.
    pub async fn price(
        &self,
        ctx: &StageContext,
        features: &FeatureEnvelope,
        metadata: &CardMetadata,
    ) -> PricedStage {
        let Some(name) = metadata.name.value.clone() else {
            return PricedStage {
                result: PricingResult::empty("no card name available to query market sources"),
                llm_attempts: 0,
                usage: TokenUsage::default(),
                summary_fallback: true,
            };
        };

        let query = CardQuery {
            name,
            set: metadata.set.best_value().map(String::from),
            number: metadata.collector_number.value.clone(),
            rarity: metadata.rarity.value.clone(),
            condition: estimate_condition(&features.quality),
        };

        let raw = self.fan_out(ctx, &query).await;

        let normalized: Vec<(Comparable, i64)> = raw
            .into_iter()
            .filter_map(|comp| normalize_to_usd_cents(&comp).map(|cents| (comp, cents)))
            .collect();
        let retained = drop_outliers(normalized);

        if retained.is_empty() {
            tracing::info!(
                request_id = %ctx.request_id,
                owner_id = %ctx.owner_id,
                card_id = %ctx.card_id,
                query = %query.name,
                "no comparables retained, returning null valuation"
            );
            return PricedStage {
                result: PricingResult::empty(format!(
                    "no comparable sales found across {} configured sources",
                    self.total_configured
                )),
                llm_attempts: 0,
                usage: TokenUsage::default(),
                summary_fallback: true,
            };
        }

        let sources: BTreeSet<String> =
            retained.iter().map(|(c, _)| c.source.clone()).collect();
        let mut prices: Vec<i64> = retained.iter().map(|(_, cents)| *cents).collect();
        let (low, median, high) = three_point(&mut prices);
        let comps_count = retained.len() as u64;

        let diversity = sources.len() as f64 / self.total_configured as f64;
        let confidence = (comps_count as f64 / FULL_CONFIDENCE_COMPS).min(1.0) * diversity;

        let trend = trend_from_sales(&retained);
        let (summary, llm_attempts, usage, summary_fallback) = self
            .summarize(ctx, &query, comps_count, (low, median, high), trend, confidence)
            .await;

        PricedStage {
            result: PricingResult {
                value_low: Some(low),
                value_median: Some(median),
                value_high: Some(high),
                comps_count,
                sources: sources.into_iter().collect(),
                confidence,
                summary,
            },
            llm_attempts,
            usage,
            summary_fallback,
        }
    }

    async fn fan_out(&self, ctx: &StageContext, query: &CardQuery) -> Vec<Comparable> {
        let bound = self.adapters.len().clamp(1, MAX_FAN_OUT);
        let semaphore = Arc::new(Semaphore::new(bound));

        let calls = self.adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let semaphore = Arc::clone(&semaphore);
            let query = query.clone();
            let timeout = self.adapter_timeout;
            let request_id = ctx.request_id.clone();
            let owner_id = ctx.owner_id.clone();
            let card_id = ctx.card_id.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                let outcome = retry(&RetryPolicy::adapter(), |_| {
                    let query = query.clone();
                    let adapter = Arc::clone(&adapter);
                    async move {
                        with_deadline(timeout, adapter.fetch_comparables(&query)).await
                    }
                })
                .await;

                match outcome.result {
                    Ok(comps) => Some(comps),
                    Err(error) => {
                        tracing::warn!(
                            request_id = %request_id,
                            owner_id = %owner_id,
                            card_id = %card_id,
                            adapter = adapter.id(),
                            error = %error,
                            "market adapter exhausted retries, contributing nothing"
                        );
                        None
                    }
                }
            }
        });

        join_all(calls)
            .await
            .into_iter()
            .flatten()
            .flatten()
            .collect()
    }

    async fn summarize(
        &self,
        ctx: &StageContext,
        query: &CardQuery,
        comps_count: u64,
        (low, median, high): (i64, i64, i64),
        trend: Trend,
        confidence: f64,
    ) -> (PricingSummary, u32, TokenUsage, bool) {
        let system = "You are a trading-card market analyst. Summarize the valuation \
                      statistics you are given. Do not invent data. Respond with a single \
                      JSON object: {\"fairValueCents\": integer, \"trend\": \"up\"|\"down\"|\"stable\", \
                      \"confidence\": number, \"rationale\": string}."
            .to_string();
        let user = format!(
            "Card: {}\nComparables used: {}\n10th percentile: {} cents\nMedian: {} cents\n\
             90th percentile: {} cents\nObserved trend: {}\nStatistical confidence: {:.2}\n\n\
             Produce the summary JSON.",
            query.name, comps_count, low, median, high, trend, confidence
        );

        let (result, attempts) = self.invoker.invoke(&system, &user).await;

        let parsed = result.and_then(|response| {
            let usage = response.usage;
            let value = extract_json_payload(&response.content)?;
            let wire: SummaryWire = serde_json::from_value(value)?;
            Ok((wire, usage))
        });

        match parsed {
            Ok((wire, usage)) => (
                PricingSummary {
                    fair_value_cents: Some(wire.fair_value_cents),
                    trend: wire.trend,
                    confidence: wire.confidence.clamp(0.0, 1.0),
                    rationale: wire.rationale,
                },
                attempts,
                usage,
                false,
            ),
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %error,
                    "summary LLM call failed, synthesizing from statistics"
                );
                (
                    PricingSummary {
                        fair_value_cents: Some(median),
                        trend,
                        confidence,
                        rationale: format!(
                            "synthesized from {} comparables: median {} cents, trend {}",
                            comps_count, median, trend
                        ),
                    },
                    attempts,
                    TokenUsage::default(),
                    true,
                )
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryWire {
    fair_value_cents: i64,
    trend: Trend,
    confidence: f64,
    rationale: String,
}
