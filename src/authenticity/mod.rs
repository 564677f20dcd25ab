//! Authenticity scoring: perceptual hashing plus signal fusion.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardiq_core::authenticity::{AuthenticityAgent, ReferenceHashTable};
//!
//! let agent = AuthenticityAgent::new(objects, Arc::new(reference_table), invoker);
//! let stage = agent.verify(&ctx, &features, &metadata, &front_ref).await?;
//! println!("score {:.2}, fake: {}", stage.result.score, stage.result.fake_detected);
//! ```

mod agent;
mod phash;
mod reference;

pub use agent::{AuthenticityAgent, AuthenticityResult, VerifiedStage};
pub use phash::PerceptualHash;
pub use reference::ReferenceHashTable;
