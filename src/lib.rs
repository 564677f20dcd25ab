//! # cardiq-core
//!
//! A multi-agent valuation pipeline for trading-card scans. An uploaded
//! image emits a creation event; the orchestrator extracts visual features,
//! reasons over the OCR text with a deterministic LLM call, prices the card
//! against market feeds and scores its authenticity in parallel, then
//! aggregates everything back onto the owner's record.
//!
//! ## Core Components
//!
//! - **Vision**: OCR, moderation, boundary cropping, pixel analyses
//! - **Reasoning**: schema-validated LLM inference with a rule-based fallback
//! - **Pricing**: market-adapter fan-out and three-point valuation
//! - **Authenticity**: perceptual hashing and signal fusion
//! - **Orchestrator**: per-stage retry/fallback/catch and the parallel fork
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardiq_core::{EventTrigger, PipelineOrchestrator};
//!
//! let orchestrator = Arc::new(PipelineOrchestrator::new(
//!     config, extractor, reasoner, pricer, authenticator, aggregator, persistor, "cards",
//! ));
//! let trigger = EventTrigger::new(orchestrator);
//! trigger.listen(bus.subscribe()).await;
//! ```

pub mod aggregate;
pub mod authenticity;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod failure;
pub mod llm;
pub mod objects;
pub mod orchestrator;
pub mod pricing;
pub mod reasoning;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod trigger;
pub mod vision;

// Re-exports for convenience
pub use aggregate::Aggregator;
pub use authenticity::{AuthenticityAgent, AuthenticityResult, PerceptualHash, ReferenceHashTable};
pub use config::{DeleteMode, PipelineConfig, StageDeadlines};
pub use context::{Stage, StageContext, TerminalState};
pub use error::{Error, ErrorKind, Result};
pub use events::{
    CardCreatedDetail, DeadLetter, DeadLetterQueue, EventBus, EventDetail, EventEnvelope,
    ValuationCompletedDetail,
};
pub use failure::{ErrorPersistor, PartialOutputs};
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmClientConfig, LlmInvoker,
    ResponseCache, TokenUsage,
};
pub use objects::{MemoryObjectStore, ObjectRef, ObjectStore, PresignedUpload};
pub use orchestrator::{PipelineInput, PipelineOrchestrator, PipelineOutcome};
pub use pricing::{
    AdapterConfig, AuctionFeedAdapter, CardQuery, Comparable, MarketAdapter, MarketplaceAdapter,
    PriceHistoryAdapter, PricingAgent, PricingResult, PricingSummary, Trend,
};
pub use reasoning::{
    CardHints, CardMetadata, FieldResult, MultiCandidateResult, OcrContext, ReasoningAgent,
    ReasoningOutcome, SetField,
};
pub use retry::{retry, with_deadline, RetryOutcome, RetryPolicy};
pub use store::{CardRecord, RecordError, RecordPage, SqliteCardStore};
pub use telemetry::{ExecutionTrace, StageReport, StageStatus};
pub use trigger::EventTrigger;
pub use vision::{
    BorderMetrics, BoundingBox, DetectedLabel, ExtractedFeatures, FeatureEnvelope, FeatureExtractor,
    FontMetrics, ImageMetadata, ImageQuality, OcrBlock, OcrBlockType, VisionBackend,
};
