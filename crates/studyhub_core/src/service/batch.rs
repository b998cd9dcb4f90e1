//! Per-item outcome accumulator for non-transactional batches.
//!
//! # Invariants
//! - A batch is a sequence of independent single-item operations.
//! - Failures are recorded and processing continues; nothing is rolled back.

use crate::error::{CoreError, CoreResult};

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemResult {
    pub id: String,
    pub error: Option<CoreError>,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// `{processed, successful, failed}` plus the per-item result list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchSummary {
    /// Folds one item outcome into the summary.
    pub fn record<T>(mut self, id: impl Into<String>, outcome: CoreResult<T>) -> Self {
        self.processed += 1;
        let error = match outcome {
            Ok(_) => {
                self.successful += 1;
                None
            }
            Err(err) => {
                self.failed += 1;
                Some(err)
            }
        };
        self.results.push(BatchItemResult {
            id: id.into(),
            error,
        });
        self
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchItemResult> {
        self.results.iter().filter(|result| !result.is_success())
    }
}
