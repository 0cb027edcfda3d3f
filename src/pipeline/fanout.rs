//! Bounded-parallel sub-tasks inside one stage.
//!
//! A stage declares how sub-task failures combine: [`FanOutPolicy::FailFast`]
//! aborts on the first failure, [`FanOutPolicy::BestEffort`] waits for every
//! sub-task and reports successes and failures side by side.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{StageError, StageResult};

/// How sub-task failures affect the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutPolicy {
    /// Any failure fails the whole stage; outstanding sub-tasks are dropped.
    FailFast,
    /// Every sub-task runs to completion; failures are collected.
    BestEffort,
}

/// Outcome of a fan-out, in input order.
#[derive(Debug)]
pub struct FanOutReport<T> {
    pub succeeded: Vec<(String, T)>,
    pub failed: Vec<(String, StageError)>,
}

impl<T> FanOutReport<T> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// True when every sub-task failed or a strict majority did.
    pub fn exceeds_failure_budget(&self) -> bool {
        let total = self.total();
        total > 0 && (self.succeeded.is_empty() || self.failed.len() * 2 > total)
    }

    /// Converts an over-budget report into an aggregate error.
    pub fn into_result(self) -> StageResult<Self> {
        if self.exceeds_failure_budget() {
            return Err(StageError::AggregateFailure {
                failed: self.failed.len(),
                total: self.total(),
                details: describe_failures(&self.failed),
            });
        }
        Ok(self)
    }
}

/// `label: error; label: error` for a set of failures.
pub fn describe_failures(failed: &[(String, StageError)]) -> String {
    failed
        .iter()
        .map(|(label, err)| format!("{}: {}", label, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runs labelled sub-tasks with at most `concurrency` in flight.
///
/// Under `FailFast` the first failure is returned as an `AggregateFailure`
/// naming the sub-task; under `BestEffort` the call itself never fails.
pub async fn fan_out<T, Fut>(
    tasks: Vec<(String, Fut)>,
    concurrency: usize,
    policy: FanOutPolicy,
) -> StageResult<FanOutReport<T>>
where
    Fut: Future<Output = StageResult<T>>,
{
    let total = tasks.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let futures = tasks.into_iter().map(|(label, task)| {
        let sem = Arc::clone(&semaphore);
        async move {
            let result = match sem.acquire().await {
                Ok(_permit) => task.await,
                Err(_) => Err(StageError::External("fan-out limiter closed".to_string())),
            };
            (label, result)
        }
    });

    match policy {
        FanOutPolicy::FailFast => {
            let ordered = futures::future::try_join_all(futures.map(|f| async move {
                let (label, result) = f.await;
                match result {
                    Ok(value) => Ok((label, value)),
                    Err(err) => Err((label, err)),
                }
            }))
            .await;
            match ordered {
                Ok(succeeded) => Ok(FanOutReport {
                    succeeded,
                    failed: Vec::new(),
                }),
                Err((label, err)) => Err(StageError::AggregateFailure {
                    failed: 1,
                    total,
                    details: format!("{}: {}", label, err),
                }),
            }
        }
        FanOutPolicy::BestEffort => {
            let mut report = FanOutReport {
                succeeded: Vec::new(),
                failed: Vec::new(),
            };
            for (label, result) in futures::future::join_all(futures).await {
                match result {
                    Ok(value) => report.succeeded.push((label, value)),
                    Err(err) => report.failed.push((label, err)),
                }
            }
            Ok(report)
        }
    }
}
