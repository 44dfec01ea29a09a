//! Budget enforcement over fetched layer content.
//!
//! Assembly runs in two passes:
//!
//! 1. **Per-layer ceilings**: each layer keeps the longest prefix of its
//!    items that fits its ceiling.
//! 2. **Total budget**: while the sum still exceeds the total, trailing
//!    items are removed from the lowest-priority non-empty layer
//!    (vector → session → persistent → run cache).
//!
//! A layer emptied by either pass is reported missing with
//! `MissingReason::Trimmed`. Assembly is deterministic: identical inputs
//! always produce identical outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_core::context::{LayerContent, MemoryContext, MissingReason, TokenBudget};
use strata_core::error::AssemblyError;
use strata_core::layer::MemoryLayer;
use tracing::{debug, warn};

/// Verification failures tolerated before returning an empty context.
const MAX_ATTEMPTS: usize = 3;

/// Items removed from one layer during budget enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: MemoryLayer,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

/// An assembled context plus what had to be cut to get there.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub context: MemoryContext,
    pub drops: Vec<DropInfo>,
}

/// Stateless; create one and reuse it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Fit `fetched` into `budget`. Layers in `missing` are recorded as
    /// attempted-but-missing with their reason.
    pub fn assemble(
        &self,
        budget: &TokenBudget,
        fetched: BTreeMap<MemoryLayer, LayerContent>,
        missing: BTreeMap<MemoryLayer, MissingReason>,
    ) -> Assembly {
        let mut limit = budget.total;

        for attempt in 1..=MAX_ATTEMPTS {
            match Self::fit(budget, fetched.clone(), limit) {
                Ok((layers, trimmed, drops)) => {
                    let mut context = MemoryContext::empty(budget.intent, budget.total);
                    context.layers_attempted.extend(fetched.keys().copied());
                    for (layer, reason) in &missing {
                        context.mark_missing(*layer, *reason);
                    }
                    for layer in trimmed {
                        context.mark_missing(layer, MissingReason::Trimmed);
                    }
                    context.layers = layers;
                    context.recount();

                    debug!(
                        intent = %budget.intent,
                        tokens = context.tokens_used,
                        budget = budget.total,
                        drops = drops.len(),
                        "Context assembled"
                    );
                    return Assembly { context, drops };
                }
                Err(AssemblyError::BudgetViolation { used, budget: allowed }) => {
                    warn!(attempt, used, budget = allowed, "Assembled context over budget, retrying tighter");
                    limit = allowed.saturating_sub(used - allowed);
                }
            }
        }

        warn!(intent = %budget.intent, "Assembly failed verification, returning empty context");
        let mut context = MemoryContext::empty(budget.intent, budget.total);
        for (layer, reason) in &missing {
            context.mark_missing(*layer, *reason);
        }
        for layer in fetched.keys() {
            context.mark_missing(*layer, MissingReason::Trimmed);
        }
        Assembly {
            context,
            drops: Vec::new(),
        }
    }

    #[allow(clippy::type_complexity)]
    fn fit(
        budget: &TokenBudget,
        mut layers: BTreeMap<MemoryLayer, LayerContent>,
        limit: usize,
    ) -> Result<(BTreeMap<MemoryLayer, LayerContent>, Vec<MemoryLayer>, Vec<DropInfo>), AssemblyError> {
        let mut drops = Vec::new();
        let mut trimmed = Vec::new();

        // ── Pass 1: per-layer ceilings ─────────────────────────────────────
        for (layer, content) in layers.iter_mut() {
            let (items, tokens) = content.fit_to(budget.ceiling(*layer).min(limit));
            if items > 0 {
                drops.push(DropInfo {
                    layer: *layer,
                    items_dropped: items,
                    tokens_dropped: tokens,
                    reason: "Over layer ceiling".into(),
                });
            }
        }

        // ── Pass 2: total budget, lowest priority first ────────────────────
        let mut total: usize = layers.values().map(LayerContent::tokens).sum();
        for layer in MemoryLayer::trim_order() {
            if total <= limit {
                break;
            }
            let Some(content) = layers.get_mut(&layer) else {
                continue;
            };
            let mut items = 0;
            let mut tokens = 0;
            while total > limit {
                let Some(item) = content.items.pop() else {
                    break;
                };
                total -= item.tokens;
                items += 1;
                tokens += item.tokens;
            }
            if items > 0 {
                drops.push(DropInfo {
                    layer,
                    items_dropped: items,
                    tokens_dropped: tokens,
                    reason: "Over total budget".into(),
                });
            }
        }

        // Layers that were cut to nothing count as trimmed
        layers.retain(|layer, content| {
            if content.is_empty() {
                if drops.iter().any(|d| d.layer == *layer) {
                    trimmed.push(*layer);
                }
                false
            } else {
                true
            }
        });

        let used: usize = layers.values().map(LayerContent::tokens).sum();
        if used > limit {
            return Err(AssemblyError::BudgetViolation { used, budget: limit });
        }
        Ok((layers, trimmed, drops))
    }
}
