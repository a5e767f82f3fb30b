use crate::domain::model::{Outcome, SubmitVerdict, TaskResult};
use serde::{Deserialize, Serialize};

/// Latency distribution of one measured call, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p95: f64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let len = sorted.len();

        let median = if len % 2 == 1 {
            sorted[len / 2]
        } else {
            (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
        };

        Some(Self {
            min: sorted[0],
            max: sorted[len - 1],
            avg: sorted.iter().sum::<f64>() / len as f64,
            median,
            p95: percentile(&sorted, 0.95),
        })
    }
}

/// Nearest-rank percentile over an ascending slice: `sorted[floor(len * q)]`, clamped.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * q) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Counts per outcome class for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub success: usize,
    pub already_done: usize,
    pub rejected: usize,
    pub error: usize,
}

impl OutcomeTally {
    pub fn from_results(results: &[TaskResult]) -> Self {
        let mut tally = Self::default();
        for r in results {
            match r.outcome {
                Outcome::Success => tally.success += 1,
                Outcome::AlreadyDone => tally.already_done += 1,
                Outcome::Rejected => tally.rejected += 1,
                Outcome::Error => tally.error += 1,
            }
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.success + self.already_done + self.rejected + self.error
    }

    pub fn failed(&self) -> usize {
        self.rejected + self.error
    }
}

/// Verdict counts for the single-challenge race, `error` covering every non-200 result.
/// `other` holds 200 responses whose verdict string is not one of the four known ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictTally {
    pub correct: usize,
    pub submitted: usize,
    pub wait: usize,
    pub wrong: usize,
    #[serde(default)]
    pub other: usize,
    pub error: usize,
}

impl VerdictTally {
    pub fn from_results(results: &[TaskResult]) -> Self {
        let mut tally = Self::default();
        for r in results {
            match &r.verdict {
                Some(SubmitVerdict::Correct) => tally.correct += 1,
                Some(SubmitVerdict::Submitted) => tally.submitted += 1,
                Some(SubmitVerdict::Wait) => tally.wait += 1,
                Some(SubmitVerdict::Wrong) => tally.wrong += 1,
                Some(SubmitVerdict::Other(_)) => tally.other += 1,
                None => tally.error += 1,
            }
        }
        tally
    }

    pub fn success_rate(&self, total: usize) -> f64 {
        rate(self.correct + self.submitted, total)
    }
}

pub fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Relative improvement from `before` to `after` in percent; positive means faster.
pub fn improvement(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        return 0.0;
    }
    (before - after) / before * 100.0
}
