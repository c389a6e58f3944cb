//! Subscription boundary types.
//!
//! A subscriber delivers the self vessel's values once per period as a batch
//! of raw updates. These types describe what is asked for and what comes back,
//! independently of how the values are transported.

use crate::model::RawUpdate;
use std::time::Duration;

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFilter {
    /// Context, "vessels.self" for the own vessel.
    pub context: String,
    /// Path pattern, "*" for every path.
    pub paths: String,
    /// Sampling period.
    pub period: Duration,
}

impl SubscriptionFilter {
    /// Every path of the self vessel.
    pub fn self_all(period: Duration) -> Self {
        Self {
            context: "vessels.self".to_string(),
            paths: "*".to_string(),
            period,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period.as_millis().min(u64::MAX as u128) as u64
    }
}

/// Delivered by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// One poll cycle worth of values, in delivery order.
    Batch(Vec<RawUpdate>),
    /// The subscription failed; the subscriber decides whether to retry.
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_all() {
        let filter = SubscriptionFilter::self_all(Duration::from_secs(60));
        assert_eq!(filter.context, "vessels.self");
        assert_eq!(filter.paths, "*");
        assert_eq!(filter.period_ms(), 60_000);
    }
}
