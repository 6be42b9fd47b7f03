//! # Result Merger
//!
//! Folds per-target results into one [`LogicalResult`].
//!
//! Results are re-keyed by route index first, so the outcome does not
//! depend on completion order. Failures never discard successful work:
//! a multi-target statement with failed targets returns
//! `PartialFailure` carrying the merged result of the targets that
//! succeeded.

use tracing::warn;

use crate::algorithms::merge::{merge_row_sets, MergePlan};
use crate::domain::{
    ExecOutcome, LogicalResult, PartialFailure, RowSet, ShardResult, ShardingError,
    StatementKind, TargetFailure,
};

/// Stateless merger.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResultMerger;

impl ResultMerger {
    /// Merge results with no SELECT post-processing.
    pub fn merge_kind(
        kind: StatementKind,
        results: Vec<ShardResult>,
    ) -> Result<LogicalResult, ShardingError> {
        Self::merge(&MergePlan::pass_through(kind), results)
    }

    /// Merge results according to a router-produced plan.
    pub fn merge(
        plan: &MergePlan,
        mut results: Vec<ShardResult>,
    ) -> Result<LogicalResult, ShardingError> {
        results.sort_by_key(|r| r.route_index);
        let total = results.len();
        let mut succeeded = Vec::with_capacity(total);
        let mut failed = Vec::new();
        let mut outcomes = Vec::with_capacity(total);
        for result in results {
            match result.outcome {
                Ok(outcome) => {
                    succeeded.push(result.target);
                    outcomes.push(outcome);
                }
                Err(error) => failed.push(TargetFailure {
                    target: result.target,
                    error,
                }),
            }
        }
        if total == 1 && failed.len() == 1 {
            let failure = failed.remove(0);
            return Err(ShardingError::Execution {
                target: failure.target,
                source: failure.error,
            });
        }
        let merged = Self::combine(plan, outcomes)?;
        if failed.is_empty() {
            return Ok(merged);
        }
        warn!(
            kind = %plan.kind,
            failed = failed.len(),
            total,
            "[shardline] statement partially failed"
        );
        Err(ShardingError::PartialFailure(Box::new(PartialFailure {
            partial: merged,
            succeeded,
            failed,
        })))
    }

    fn combine(
        plan: &MergePlan,
        outcomes: Vec<ExecOutcome>,
    ) -> Result<LogicalResult, ShardingError> {
        if plan.kind.is_mutation() {
            let rows = outcomes
                .iter()
                .map(|outcome| match outcome {
                    ExecOutcome::Affected(n) => *n,
                    ExecOutcome::Rows(_) => 0,
                })
                .sum();
            return Ok(LogicalResult::affected(rows));
        }
        let sets: Vec<RowSet> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                ExecOutcome::Rows(rows) => Some(rows),
                ExecOutcome::Affected(_) => None,
            })
            .collect();
        Ok(LogicalResult::Rows(merge_row_sets(plan, sets)?))
    }
}
