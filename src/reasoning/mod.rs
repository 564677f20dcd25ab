//! OCR reasoning: deterministic LLM inference with a rule-based fallback.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardiq_core::reasoning::{OcrContext, ReasoningAgent};
//!
//! let agent = ReasoningAgent::new(invoker);
//! let stage = agent.reason(&ctx, &ocr_context).await;
//! if stage.outcome.fallback_used() {
//!     println!("fallback metadata: {}", stage.outcome.metadata().reasoning_trail);
//! }
//! ```

mod agent;
mod fuzzy;
mod metadata;
mod prompt;

pub use agent::{fallback_metadata, ReasonedStage, ReasoningAgent};
pub use fuzzy::{best_match, is_match, similarity, MIN_SIMILARITY};
pub use metadata::{
    CandidateValue, CardHints, CardMetadata, FieldResult, MultiCandidateResult, ReasoningOutcome,
    SetField,
};
pub use prompt::{build_system_prompt, build_user_prompt, OcrContext, VisualContext};
