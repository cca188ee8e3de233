//! Run statistics, the outcome taxonomy, and timing aggregation.

use serde::Serialize;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[derive(strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunOutcome {
    Ok,
    /// Output differed from the first run beyond tolerance.
    OutputNonDeterministic,
    RuntimeError,
    /// Planned but not executed because an earlier run failed hard.
    Skipped,
}

/// One timed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStat {
    pub wall_time_ns: u64,
    pub outcome: RunOutcome,
}

impl RunStat {
    pub fn skipped() -> Self {
        Self { wall_time_ns: 0, outcome: RunOutcome::Skipped }
    }
}

/// Terminal classification of one kernel instance.
///
/// Exactly one is recorded per instance: the first terminal condition in
/// this order. Build problems dominate bind problems, bind problems
/// dominate runtime failures, and nondeterminism is reported only when
/// everything else went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[derive(strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Ok,
    BuildFailure,
    NoArgumentsFound,
    UnsupportedArgumentType,
    InputSizeMismatch,
    RuntimeError,
    OutputNonDeterministic,
    UnknownError,
}

/// Wall-time summary over the successful runs of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunAggregate {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: u64,
}

/// Aggregate timings over runs with outcome [`RunOutcome::Ok`].
///
/// Nondeterministic, failed, and skipped runs are excluded; with zero
/// successful runs there is no aggregate at all, so a total failure can
/// never read as an instantly fast success.
pub fn aggregate(runs: &[RunStat]) -> Option<RunAggregate> {
    let mut count: u64 = 0;
    let mut sum: u128 = 0;
    let mut min_ns = u64::MAX;
    let mut max_ns = 0u64;

    for run in runs.iter().filter(|run| run.outcome == RunOutcome::Ok) {
        count += 1;
        sum += u128::from(run.wall_time_ns);
        min_ns = min_ns.min(run.wall_time_ns);
        max_ns = max_ns.max(run.wall_time_ns);
    }

    if count == 0 {
        return None;
    }
    let mean_ns = (sum / u128::from(count)) as u64;
    Some(RunAggregate { min_ns, max_ns, mean_ns })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(ns: u64) -> RunStat {
        RunStat { wall_time_ns: ns, outcome: RunOutcome::Ok }
    }

    #[test]
    fn empty_and_all_failed_have_no_aggregate() {
        assert_eq!(aggregate(&[]), None);
        let failed = [RunStat { wall_time_ns: 100, outcome: RunOutcome::RuntimeError }, RunStat::skipped()];
        assert_eq!(aggregate(&failed), None);
    }

    #[test]
    fn mean_lies_between_min_and_max() {
        let runs = [ok(100), ok(300), ok(200)];
        let agg = aggregate(&runs).expect("aggregate");
        assert_eq!(agg.min_ns, 100);
        assert_eq!(agg.max_ns, 300);
        assert!(agg.min_ns <= agg.mean_ns && agg.mean_ns <= agg.max_ns);
        assert_eq!(agg.mean_ns, 200);
    }

    #[test]
    fn nondeterministic_runs_are_excluded() {
        let runs = [ok(100), RunStat { wall_time_ns: 1_000_000, outcome: RunOutcome::OutputNonDeterministic }];
        let agg = aggregate(&runs).expect("one ok run");
        assert_eq!(agg.max_ns, 100);
        assert_eq!(agg.mean_ns, 100);
    }

    #[test]
    fn outcome_spelling_is_snake_case() {
        assert_eq!(Outcome::OutputNonDeterministic.to_string(), "output_non_deterministic");
        assert_eq!(Outcome::Ok.to_string(), "ok");
        assert_eq!(RunOutcome::Skipped.to_string(), "skipped");
    }
}
