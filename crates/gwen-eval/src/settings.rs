//! Runtime settings for the Gwen engine.
//!
//! [`Settings`] is the explicit configuration handle passed through the
//! evaluation context; nothing reads global mutable state. Values merge
//! in order: built-in defaults, global `~/.gwen.toml`, local
//! `gwen.toml` (searched upward from the start directory), environment
//! variables, then CLI options.
//!
//! # Config file: `gwen.toml`
//!
//! ```toml
//! # gwen.toml example
//! state_level = "feature"          # gwen.state.level
//! failfast_exit = false            # gwen.feature.failfast.exit
//! max_parallel_units = 4           # gwen.parallel.maxThreads
//! rampup_interval_seconds = 0      # gwen.rampup.interval.seconds
//! assertion_mode = "hard"          # gwen.assertion.mode
//! dry_run = false                  # gwen.dryRun
//! ```
//!
//! All fields are optional. Local values override global values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Which scopes survive a context reset between units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateLevel {
    #[default]
    Feature,
    Scenario,
    StepDef,
}

impl StateLevel {
    pub fn parse(value: &str) -> Option<StateLevel> {
        match value {
            "feature" => Some(StateLevel::Feature),
            "scenario" => Some(StateLevel::Scenario),
            "stepDef" | "stepdef" => Some(StateLevel::StepDef),
            _ => None,
        }
    }
}

/// Whether assertion failures stop the scenario or are sustained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssertionMode {
    #[default]
    Hard,
    Soft,
}

impl AssertionMode {
    pub fn parse(value: &str) -> Option<AssertionMode> {
        match value {
            "hard" => Some(AssertionMode::Hard),
            "soft" => Some(AssertionMode::Soft),
            _ => None,
        }
    }
}

/// TOML-friendly intermediate representation (all fields optional).
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    state_level: Option<String>,
    failfast_exit: Option<bool>,
    max_parallel_units: Option<usize>,
    rampup_interval_seconds: Option<u64>,
    assertion_mode: Option<String>,
    dry_run: Option<bool>,
    parallel: Option<bool>,
    unit_timeout_seconds: Option<u64>,
    max_loop_iterations: Option<usize>,
    loop_delay_millis: Option<u64>,
}

/// Resolved engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Scope retention between units (`gwen.state.level`).
    pub state_level: StateLevel,
    /// Stop scheduling units once the summary turns Failed
    /// (`gwen.feature.failfast.exit`). Never applies in dry-run.
    pub failfast_exit: bool,
    /// Worker pool size for parallel execution
    /// (`gwen.parallel.maxThreads`). `0` means one worker per CPU.
    pub max_parallel_units: usize,
    /// Seconds between worker start-ups
    /// (`gwen.rampup.interval.seconds`).
    pub rampup_interval: Duration,
    /// Hard or soft assertions (`gwen.assertion.mode`).
    pub assertion_mode: AssertionMode,
    /// Translate and interpolate without executing side effects
    /// (`gwen.dryRun`).
    pub dry_run: bool,
    /// Evaluate units on the worker pool instead of sequentially.
    pub parallel: bool,
    /// Hard per-unit timeout; `None` disables the deadline.
    pub unit_timeout: Option<Duration>,
    /// Upper bound on while/until iterations.
    pub max_loop_iterations: usize,
    /// Delay between while/until iterations.
    pub loop_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_level: StateLevel::Feature,
            failfast_exit: false,
            max_parallel_units: 0,
            rampup_interval: Duration::ZERO,
            assertion_mode: AssertionMode::Hard,
            dry_run: false,
            parallel: false,
            unit_timeout: None,
            max_loop_iterations: 100,
            loop_delay: Duration::from_millis(10),
        }
    }
}

impl Settings {
    /// Creates settings with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings by merging the global and local `gwen.toml` files,
    /// then applying environment defaults.
    pub fn load(start_dir: impl AsRef<Path>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(global) = Self::find_global_file() {
            settings.merge_file(&Self::read_file(&global)?);
        }
        if let Some(local) = Self::find_local_file(start_dir) {
            settings.merge_file(&Self::read_file(&local)?);
        }
        settings.apply_env();
        Ok(settings)
    }

    /// Parses settings from a TOML string over the defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: SettingsFile = toml::from_str(toml_str).context("failed to parse settings")?;
        let mut settings = Self::default();
        settings.merge_file(&file);
        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<SettingsFile> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    fn merge_file(&mut self, file: &SettingsFile) {
        if let Some(level) = file.state_level.as_deref().and_then(StateLevel::parse) {
            self.state_level = level;
        }
        if let Some(failfast) = file.failfast_exit {
            self.failfast_exit = failfast;
        }
        if let Some(max) = file.max_parallel_units {
            self.max_parallel_units = max;
        }
        if let Some(secs) = file.rampup_interval_seconds {
            self.rampup_interval = Duration::from_secs(secs);
        }
        if let Some(mode) = file.assertion_mode.as_deref().and_then(AssertionMode::parse) {
            self.assertion_mode = mode;
        }
        if let Some(dry_run) = file.dry_run {
            self.dry_run = dry_run;
        }
        if let Some(parallel) = file.parallel {
            self.parallel = parallel;
        }
        if let Some(secs) = file.unit_timeout_seconds {
            self.unit_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(max) = file.max_loop_iterations {
            self.max_loop_iterations = max;
        }
        if let Some(millis) = file.loop_delay_millis {
            self.loop_delay = Duration::from_millis(millis);
        }
    }

    /// Applies `GWEN_DRY_RUN` and `GWEN_PARALLEL` when the matching
    /// setting was not set by a file. Called once at startup.
    fn apply_env(&mut self) {
        if !self.dry_run {
            if let Ok(value) = std::env::var("GWEN_DRY_RUN") {
                self.dry_run = value == "true" || value == "1";
            }
        }
        if !self.parallel {
            if let Ok(value) = std::env::var("GWEN_PARALLEL") {
                self.parallel = value == "true" || value == "1";
            }
        }
    }

    fn find_global_file() -> Option<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".gwen.toml"))
            .filter(|p| p.is_file())
    }

    /// Walks up from `start_dir` looking for `gwen.toml`.
    fn find_local_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
        let mut dir = start_dir.as_ref().to_path_buf();
        if let Ok(abs) = dir.canonicalize() {
            dir = abs;
        }
        loop {
            let file = dir.join("gwen.toml");
            if file.is_file() {
                return Some(file);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Builder: set dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builder: set parallel execution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Builder: set the assertion mode.
    pub fn with_assertion_mode(mut self, mode: AssertionMode) -> Self {
        self.assertion_mode = mode;
        self
    }

    /// Builder: set the state level.
    pub fn with_state_level(mut self, level: StateLevel) -> Self {
        self.state_level = level;
        self
    }

    /// Builder: set the worker pool size (`0` = one per CPU).
    pub fn with_max_parallel_units(mut self, max: usize) -> Self {
        self.max_parallel_units = max;
        self
    }

    /// Builder: set failfast.
    pub fn with_failfast_exit(mut self, failfast: bool) -> Self {
        self.failfast_exit = failfast;
        self
    }

    /// Builder: set the ramp-up interval between worker start-ups.
    pub fn with_rampup_interval(mut self, interval: Duration) -> Self {
        self.rampup_interval = interval;
        self
    }

    /// Builder: bound while/until loops.
    pub fn with_max_loop_iterations(mut self, max: usize) -> Self {
        self.max_loop_iterations = max;
        self
    }

    /// Builder: set the delay between loop iterations.
    pub fn with_loop_delay(mut self, delay: Duration) -> Self {
        self.loop_delay = delay;
        self
    }
}
