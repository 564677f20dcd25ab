//! Statistical aggregation over comparables.

use chrono::{DateTime, Utc};

use super::types::{Comparable, Trend};

/// IQR multiplier for the outlier fence.
const IQR_FENCE: f64 = 1.5;

/// Relative median movement below which the trend reads as stable.
const STABLE_BAND: f64 = 0.05;

/// USD conversion rates for the currencies market feeds actually report.
/// Unknown currencies drop the comparable rather than guessing.
fn usd_rate(currency: &str) -> Option<f64> {
    match currency.to_ascii_uppercase().as_str() {
        "USD" => Some(1.0),
        "EUR" => Some(1.08),
        "GBP" => Some(1.27),
        "JPY" => Some(0.0067),
        _ => None,
    }
}

/// Convert a comparable's price to USD cents; `None` for unknown currencies.
pub fn normalize_to_usd_cents(comp: &Comparable) -> Option<i64> {
    usd_rate(&comp.currency).map(|rate| (comp.price_cents as f64 * rate).round() as i64)
}

/// Drop comparables whose USD price falls outside the 1.5 x IQR fence.
///
/// Fewer than four data points pass through unfiltered; quartiles are not
/// meaningful below that.
pub fn drop_outliers(mut comps: Vec<(Comparable, i64)>) -> Vec<(Comparable, i64)> {
    if comps.len() < 4 {
        return comps;
    }

    let mut prices: Vec<i64> = comps.iter().map(|(_, cents)| *cents).collect();
    prices.sort_unstable();

    let q1 = percentile_of_sorted(&prices, 25.0);
    let q3 = percentile_of_sorted(&prices, 75.0);
    let iqr = (q3 - q1) as f64;
    let low_fence = q1 as f64 - IQR_FENCE * iqr;
    let high_fence = q3 as f64 + IQR_FENCE * iqr;

    comps.retain(|(_, cents)| {
        let v = *cents as f64;
        v >= low_fence && v <= high_fence
    });
    comps
}

/// Nearest-rank percentile over a sorted slice.
pub fn percentile_of_sorted(sorted: &[i64], percentile: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (percentile / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// The 10th/50th/90th percentiles over retained USD prices.
pub fn three_point(prices: &mut Vec<i64>) -> (i64, i64, i64) {
    prices.sort_unstable();
    (
        percentile_of_sorted(prices, 10.0),
        percentile_of_sorted(prices, 50.0),
        percentile_of_sorted(prices, 90.0),
    )
}

/// Trend from the median of the recent half against the older half.
pub fn trend_from_sales(comps: &[(Comparable, i64)]) -> Trend {
    if comps.len() < 4 {
        return Trend::Stable;
    }

    let mut by_date: Vec<(DateTime<Utc>, i64)> = comps
        .iter()
        .map(|(comp, cents)| (comp.sold_at, *cents))
        .collect();
    by_date.sort_by_key(|(sold_at, _)| *sold_at);

    let split = by_date.len() / 2;
    let mut older: Vec<i64> = by_date[..split].iter().map(|(_, c)| *c).collect();
    let mut recent: Vec<i64> = by_date[split..].iter().map(|(_, c)| *c).collect();
    older.sort_unstable();
    recent.sort_unstable();

    let older_median = percentile_of_sorted(&older, 50.0);
    let recent_median = percentile_of_sorted(&recent, 50.0);
    if older_median == 0 {
        return Trend::Stable;
    }

    let movement = (recent_median - older_median) as f64 / older_median as f64;
    if movement.abs() < STABLE_BAND {
        Trend::Stable
    } else if movement > 0.0 {
        Trend::Up
    } else {
        Trend::Down
    }
}
