//! Unit scheduling: sequential fold or a bounded parallel pool.
//!
//! Each unit evaluates in its own worker-owned [`EvalContext`]; workers
//! never share evaluation state. Parallel execution staggers worker
//! start-ups by the configured ramp-up interval and collects results in
//! finish-time order (ties broken by input order).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{error, info};

use gwen_syntax::status::aggregate;
use gwen_syntax::{EvalStatus, Feature, Position, SourceRef, Spec, SpecType};

use crate::context::EvalContext;
use crate::engine::Engine;
use crate::report::Reporter;
use crate::settings::Settings;
use crate::stream::{FeatureStream, FeatureUnit};

/// The scheduling atom. Per-scenario granularity is reserved for a
/// future scheduler; the engine is untouched by the choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitGranularity {
    #[default]
    Feature,
    Scenario,
}

/// The finalised, immutable result of one evaluated unit.
#[derive(Debug, Clone)]
pub struct SpecResult {
    pub spec: Spec,
    pub status: EvalStatus,
    pub unit_name: String,
    pub unit_index: usize,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl SpecResult {
    fn from_spec(unit: &FeatureUnit, spec: Spec, started: DateTime<Utc>) -> Self {
        Self {
            status: spec.eval_status(),
            spec,
            unit_name: unit.name(),
            unit_index: unit.index,
            started,
            finished: Utc::now(),
        }
    }

    /// A synthetic failure for a unit that never produced a tree (e.g.
    /// its feature file failed to parse).
    fn synthetic_failure(unit: &FeatureUnit, error: &anyhow::Error, started: DateTime<Utc>) -> Self {
        let uri = unit.feature_file.display().to_string();
        let feature = Feature::new(unit.name(), SourceRef::new(uri, Position::new(1, 1)));
        Self {
            spec: Spec::new(feature, SpecType::Feature),
            status: EvalStatus::Failed {
                nanos: 0,
                error: error.to_string(),
            },
            unit_name: unit.name(),
            unit_index: unit.index,
            started,
            finished: Utc::now(),
        }
    }
}

/// The accumulated results of a run, in finish-time order.
#[derive(Debug, Clone, Default)]
pub struct ResultsSummary {
    pub results: Vec<SpecResult>,
}

impl ResultsSummary {
    pub fn new() -> Self {
        Self::default()
    }

    fn fold(mut self, result: SpecResult) -> Self {
        self.results.push(result);
        self
    }

    /// The aggregated status over all unit results.
    pub fn status(&self) -> EvalStatus {
        aggregate(self.results.iter().map(|r| &r.status), false)
    }

    /// Unit counts per status keyword, in status order.
    pub fn feature_counts(&self) -> Vec<(&'static str, usize)> {
        let keywords = [
            "Passed", "Loaded", "Sustained", "Skipped", "Pending", "Disabled", "Failed",
        ];
        keywords
            .iter()
            .map(|keyword| {
                let count = self
                    .results
                    .iter()
                    .filter(|r| r.status.keyword() == *keyword)
                    .count();
                (*keyword, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// The process exit code for this summary.
    pub fn exit_code(&self) -> i32 {
        if self.status().is_ok_exit() {
            0
        } else {
            1
        }
    }
}

/// Builds a fresh evaluation context per unit.
pub type ContextFactory = dyn Fn() -> EvalContext + Send + Sync;

/// Schedules feature units onto the engine and feeds reporters.
pub struct Launcher {
    settings: Settings,
    engine: Arc<Engine>,
    context_factory: Box<ContextFactory>,
    reporters: Mutex<Vec<Box<dyn Reporter>>>,
    stop: Arc<AtomicBool>,
    granularity: UnitGranularity,
}

impl Launcher {
    pub fn new(settings: Settings, engine: Engine) -> Self {
        let factory_settings = settings.clone();
        Self {
            settings,
            engine: Arc::new(engine),
            context_factory: Box::new(move || EvalContext::new(factory_settings.clone())),
            reporters: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
            granularity: UnitGranularity::Feature,
        }
    }

    /// Builder: supply custom per-unit contexts (e.g. with a JS engine
    /// plugged in).
    pub fn with_context_factory(
        mut self,
        factory: impl Fn() -> EvalContext + Send + Sync + 'static,
    ) -> Self {
        self.context_factory = Box::new(factory);
        self
    }

    /// Builder: a flag that stops further unit submissions when set
    /// (in-flight units complete and reporters still close).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Builder: the scheduling granularity.
    pub fn with_granularity(mut self, granularity: UnitGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reporter);
    }

    /// Runs the stream to completion and returns the summary.
    pub fn run(&self, stream: &FeatureStream) -> Result<ResultsSummary> {
        {
            let mut reporters = self.reporters.lock().unwrap_or_else(|e| e.into_inner());
            for reporter in reporters.iter_mut() {
                reporter
                    .init(&self.engine)
                    .context("reporter failed to initialise")?;
            }
        }

        let units: Vec<&FeatureUnit> = stream.units().collect();
        info!(
            units = units.len(),
            parallel = self.settings.parallel,
            granularity = ?self.granularity,
            "scheduling feature units"
        );
        let summary = if self.settings.parallel {
            self.run_parallel(&units)
        } else {
            self.run_sequential(&units)
        };

        let mut reporters = self.reporters.lock().unwrap_or_else(|e| e.into_inner());
        for reporter in reporters.iter_mut() {
            if let Err(error) = reporter.report_summary(&summary) {
                error!(%error, "reporter failed on summary");
            }
        }
        let status = summary.status();
        for reporter in reporters.iter_mut() {
            if let Err(error) = reporter.close(&self.engine, &status) {
                error!(%error, "reporter failed to close");
            }
        }
        Ok(summary)
    }

    /// Folds the unit stream one at a time, honouring failfast.
    fn run_sequential(&self, units: &[&FeatureUnit]) -> ResultsSummary {
        let failfast = self.settings.failfast_exit && !self.settings.dry_run;
        let mut summary = ResultsSummary::new();
        for unit in units {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let result = self.evaluate_one(unit);
            summary = summary.fold(result);
            if failfast && summary.status().is_failed() {
                info!("failfast: stopping after first failed unit");
                break;
            }
        }
        summary
    }

    /// One rayon task per unit, ramp-up staggered, results ordered by
    /// finish time with input order breaking ties.
    fn run_parallel(&self, units: &[&FeatureUnit]) -> ResultsSummary {
        let workers = if self.settings.max_parallel_units == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.settings.max_parallel_units
        };
        let rampup = self.settings.rampup_interval;
        let ticket = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build();
        let mut results: Vec<SpecResult> = match pool {
            Ok(pool) => pool.install(|| {
                units
                    .par_iter()
                    .filter(|_| !self.stop.load(Ordering::SeqCst))
                    .map(|unit| {
                        let slot = ticket.fetch_add(1, Ordering::SeqCst);
                        if !rampup.is_zero() && slot < workers {
                            std::thread::sleep(rampup * slot as u32);
                        }
                        self.evaluate_one(unit)
                    })
                    .collect()
            }),
            Err(error) => {
                error!(%error, "failed to build worker pool, falling back to sequential");
                return self.run_sequential(units);
            }
        };

        results.sort_by(|a, b| {
            a.finished
                .cmp(&b.finished)
                .then(a.unit_index.cmp(&b.unit_index))
        });
        results
            .into_iter()
            .fold(ResultsSummary::new(), ResultsSummary::fold)
    }

    /// Evaluates one unit in a fresh context and reports the detail.
    fn evaluate_one(&self, unit: &FeatureUnit) -> SpecResult {
        let started = Utc::now();
        let mut ctx = (self.context_factory)();
        ctx.reset();
        let result = match self.engine.evaluate_unit(&mut ctx, unit) {
            Ok(spec) => SpecResult::from_spec(unit, spec, started),
            Err(error) => {
                error!(unit = %unit.name(), %error, "unit evaluation aborted");
                SpecResult::synthetic_failure(unit, &error, started)
            }
        };

        let mut reporters = self.reporters.lock().unwrap_or_else(|e| e.into_inner());
        for reporter in reporters.iter_mut() {
            if let Err(error) = reporter.report_detail(unit, &result) {
                error!(%error, "reporter failed on unit detail");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(status: EvalStatus, index: usize) -> SpecResult {
        let sref = SourceRef::new("f.feature", Position::new(1, 1));
        SpecResult {
            spec: Spec::new(Feature::new("f", sref), SpecType::Feature),
            status,
            unit_name: format!("unit-{}", index),
            unit_index: index,
            started: Utc::now(),
            finished: Utc::now(),
        }
    }

    #[test]
    fn summary_aggregates_to_worst_status() {
        let summary = ResultsSummary::new()
            .fold(result_with(EvalStatus::passed(1), 0))
            .fold(result_with(
                EvalStatus::Failed {
                    nanos: 1,
                    error: "x".to_string(),
                },
                1,
            ));
        assert!(summary.status().is_failed());
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn summary_counts_by_status() {
        let summary = ResultsSummary::new()
            .fold(result_with(EvalStatus::passed(1), 0))
            .fold(result_with(EvalStatus::passed(1), 1))
            .fold(result_with(EvalStatus::Skipped, 2));
        let counts = summary.feature_counts();
        assert_eq!(counts, vec![("Passed", 2), ("Skipped", 1)]);
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn pending_results_exit_nonzero() {
        let summary = ResultsSummary::new().fold(result_with(EvalStatus::Pending, 0));
        assert_eq!(summary.exit_code(), 1);
    }
}
