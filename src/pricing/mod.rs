//! Market pricing: adapter fan-out, outlier filtering, three-point valuation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardiq_core::pricing::PricingAgent;
//!
//! let agent = PricingAgent::new(adapters, invoker, &config);
//! let stage = agent.price(&ctx, &features, &metadata).await;
//! println!("median: {:?} cents from {} comps", stage.result.value_median, stage.result.comps_count);
//! ```

mod adapter;
mod agent;
mod stats;
mod types;

pub use adapter::{
    AdapterConfig, AuctionFeedAdapter, MarketAdapter, MarketplaceAdapter, PriceHistoryAdapter,
};
pub use agent::{PricedStage, PricingAgent};
pub use stats::{drop_outliers, normalize_to_usd_cents, percentile_of_sorted, trend_from_sales};
pub use types::{
    estimate_condition, CardQuery, Comparable, ConditionBand, PricingResult, PricingSummary, Trend,
};
