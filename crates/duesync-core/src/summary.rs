use serde::Serialize;
use std::collections::HashMap;

/// Broad classification of a per-DUE failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    RateLocked,
    Transient,
    Permanent,
    Normalizer,
    Store,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLocked => "rate_locked",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Normalizer => "normalizer",
            ErrorCategory::Store => "store",
        }
    }
}

/// Final per-run summary printed by the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub successes: u64,
    pub skips: u64,
    pub errors_by_category: HashMap<&'static str, u64>,
}

impl RunSummary {
    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_skip(&mut self) {
        self.skips += 1;
    }

    pub fn record_error(&mut self, category: ErrorCategory) {
        *self.errors_by_category.entry(category.as_str()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.successes += other.successes;
        self.skips += other.skips;
        for (k, v) in other.errors_by_category {
            *self.errors_by_category.entry(k).or_insert(0) += v;
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.errors_by_category.values().sum()
    }
}
