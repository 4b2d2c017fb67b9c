//! Per-model usage tracking and daily-limit fallback.
//!
//! Counters live in a table keyed by model id, separate from the immutable
//! registry; every mutation goes through [`UsageTracker::track_usage`], which
//! keeps the single-writer rule auditable. Counters reset lazily: whenever a
//! model is tracked or checked on a new calendar day, the previous day's
//! accumulation no longer counts.

use crate::core::registry::{Model, ModelRegistry};
use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Day-scoped usage counters for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageCounters {
    pub requests_today: u32,
    pub tokens_today: u64,
    pub last_reset: NaiveDate,
}

impl UsageCounters {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            requests_today: 0,
            tokens_today: 0,
            last_reset: today,
        }
    }
}

/// Tracks request/token consumption per model and answers routing questions:
/// has a model hit its daily ceiling, and what should be used instead.
pub struct UsageTracker {
    registry: Arc<ModelRegistry>,
    counters: Mutex<HashMap<String, UsageCounters>>,
}

impl UsageTracker {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Record one completed request against a model. Counters from a
    /// previous day are zeroed before the increment.
    pub fn track_usage(&self, model_id: &str, tokens_used: u64) -> UsageCounters {
        self.track_usage_on(model_id, tokens_used, Self::today())
    }

    fn track_usage_on(&self, model_id: &str, tokens_used: u64, today: NaiveDate) -> UsageCounters {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters
            .entry(model_id.to_string())
            .or_insert_with(|| UsageCounters::fresh(today));
        if entry.last_reset != today {
            *entry = UsageCounters::fresh(today);
        }
        entry.requests_today += 1;
        entry.tokens_today += tokens_used;
        *entry
    }

    /// Current counters for a model, if it has ever been tracked. The
    /// snapshot is returned as stored; callers that care about day
    /// boundaries should compare `last_reset` themselves.
    pub fn usage_for(&self, model_id: &str) -> Option<UsageCounters> {
        self.counters.lock().unwrap().get(model_id).copied()
    }

    /// True once a model's tracked usage meets either of its per-day
    /// ceilings. Models without declared limits are never at their limit,
    /// and counters left over from a previous day count as zero.
    pub fn has_reached_daily_limit(&self, model_id: &str) -> bool {
        self.limit_reached_on(model_id, Self::today())
    }

    fn limit_reached_on(&self, model_id: &str, today: NaiveDate) -> bool {
        let model = self.registry.model_by_id(model_id);
        let Some(limits) = &model.rate_limits else {
            return false;
        };

        let counters = self
            .counters
            .lock()
            .unwrap()
            .get(model_id)
            .copied()
            .filter(|c| c.last_reset == today)
            .unwrap_or_else(|| UsageCounters::fresh(today));

        if let Some(requests_per_day) = limits.requests_per_day {
            if counters.requests_today >= requests_per_day {
                return true;
            }
        }
        if let Some(tokens_per_day) = limits.tokens_per_day {
            if counters.tokens_today >= tokens_per_day {
                return true;
            }
        }
        false
    }

    /// Resolve the model to use when `model_id` is at its daily limit.
    ///
    /// Walks the fallback chain until it finds a model under its limit, or
    /// returns the last model in the chain when every link is exhausted. A
    /// model with no chain resolves to the global default. The walk is
    /// bounded by the registry size, so a cyclic chain terminates and is
    /// treated as having no fallback available.
    pub fn fallback_for(&self, model_id: &str) -> Model {
        self.fallback_on(model_id, Self::today())
    }

    fn fallback_on(&self, model_id: &str, today: NaiveDate) -> Model {
        let mut current = self.registry.model_by_id(model_id);
        let mut last: Option<&Model> = None;

        for _ in 0..self.registry.len() {
            let Some(next_id) = current.fallback_model_id.as_deref() else {
                break;
            };
            let next = self.registry.model_by_id(next_id);
            last = Some(next);
            if !self.limit_reached_on(&next.id, today) {
                return next.clone();
            }
            current = next;
        }

        if current.fallback_model_id.is_some() {
            // Depth bound exhausted without reaching a chain end: the chain
            // cycles, so there is no usable fallback.
            return self.registry.default_model().clone();
        }

        last.cloned()
            .unwrap_or_else(|| self.registry.default_model().clone())
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }
}
