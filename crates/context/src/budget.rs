//! Intent → token budget allocation.
//!
//! Every known intent maps to a configured policy. `Intent::Unknown` (and
//! any intent whose policy is missing) fails closed: the smallest
//! configured total, the run cache only, and the fast deadline.

use std::collections::BTreeMap;
use strata_config::BudgetsConfig;
use strata_core::context::TokenBudget;
use strata_core::layer::{Intent, LatencyClass, MemoryLayer};
use tracing::debug;

pub struct TokenBudgetAllocator {
    budgets: BudgetsConfig,
}

impl TokenBudgetAllocator {
    pub fn new(budgets: BudgetsConfig) -> Self {
        Self { budgets }
    }

    pub fn allocate(&self, intent: Intent) -> TokenBudget {
        let Some(policy) = self.budgets.policy(intent) else {
            return self.fail_closed(intent);
        };

        TokenBudget {
            intent,
            total: policy.total,
            per_layer: policy.layers.to_map(),
            fallback: policy.fallback,
            latency: policy.latency,
        }
    }

    /// The most conservative budget the configuration allows.
    pub fn fail_closed(&self, intent: Intent) -> TokenBudget {
        let total = self.budgets.smallest_total();
        debug!(intent = %intent, total, "Fail-closed budget");
        TokenBudget {
            intent,
            total,
            per_layer: BTreeMap::from([(MemoryLayer::RunCache, total)]),
            fallback: None,
            latency: LatencyClass::Fast,
        }
    }
}

impl Default for TokenBudgetAllocator {
    fn default() -> Self {
        Self::new(BudgetsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_decision_uses_all_layers() {
        let budget = TokenBudgetAllocator::default().allocate(Intent::TradeDecision);
        assert_eq!(budget.total, 5000);
        assert_eq!(budget.latency, LatencyClass::Deep);
        assert_eq!(budget.layers().collect::<Vec<_>>(), MemoryLayer::ALL.to_vec());
        assert_eq!(budget.ceiling(MemoryLayer::Vector), 2000);
    }

    #[test]
    fn price_only_is_run_cache_only() {
        let budget = TokenBudgetAllocator::default().allocate(Intent::PriceOnly);
        assert_eq!(budget.total, 600);
        assert_eq!(budget.layers().collect::<Vec<_>>(), vec![MemoryLayer::RunCache]);
        assert_eq!(budget.latency, LatencyClass::Fast);
    }

    #[test]
    fn user_prefs_carries_session_fallback() {
        let budget = TokenBudgetAllocator::default().allocate(Intent::UserPrefs);
        let fallback = budget.fallback.unwrap();
        assert_eq!(fallback.primary, MemoryLayer::Session);
        assert_eq!(fallback.fallback, MemoryLayer::Persistent);
    }

    #[test]
    fn unknown_fails_closed() {
        let budget = TokenBudgetAllocator::default().allocate(Intent::Unknown);
        assert_eq!(budget.intent, Intent::Unknown);
        assert_eq!(budget.total, 600);
        assert_eq!(budget.per_layer, BTreeMap::from([(MemoryLayer::RunCache, 600)]));
        assert_eq!(budget.latency, LatencyClass::Fast);
        assert!(budget.fallback.is_none());
    }

    #[test]
    fn fail_closed_tracks_configured_minimum() {
        let mut budgets = BudgetsConfig::default();
        budgets.conversation.total = 300;
        let budget = TokenBudgetAllocator::new(budgets).allocate(Intent::Unknown);
        assert_eq!(budget.total, 300);
    }

    #[test]
    fn every_known_intent_has_a_budget() {
        let allocator = TokenBudgetAllocator::default();
        for intent in Intent::ALL {
            let budget = allocator.allocate(intent);
            assert!(budget.total > 0, "{intent}");
            assert!(budget.layers().next().is_some(), "{intent}");
        }
    }
}
