//! # gwen-eval
//!
//! The evaluation engine for Gwen: it normalises parsed specs, streams
//! feature units from input paths, and evaluates steps against
//! pluggable binding back-ends, sequentially or on a bounded worker
//! pool. The main entry points are [`Engine`] for single units and
//! [`Launcher`] for whole runs.

/// Binding back-ends and collaborator traits.
pub mod binding;
/// Composite step control flow (if/while/until/for-each).
pub mod composites;
/// The worker-owned evaluation context.
pub mod context;
/// The step evaluation engine.
pub mod engine;
/// Runtime error kinds.
pub mod error;
/// The node-event bus.
pub mod events;
/// String interpolation (`${…}` and `$<…>`).
pub mod interpolation;
/// Launcher and results summary.
pub mod launcher;
/// Outline expansion and node-path assignment.
pub mod normalizer;
/// Reporter contract and persisted report layout.
pub mod report;
/// Layered key/value state.
pub mod scope;
/// Engine settings.
pub mod settings;
/// Feature-unit assembly from input paths.
pub mod stream;
/// Data tables and their annotations.
pub mod table;

pub use binding::{FnJsEngine, JsEngine, NullJsEngine, ProcessRunner, ShellRunner};
pub use context::EvalContext;
pub use engine::{Engine, StepTranslator, TagFilter};
pub use error::{ErrorKind, EvalError};
pub use events::{EventPhase, NodeEvent, NodeEventBus, NodeEventListener};
pub use launcher::{Launcher, ResultsSummary, SpecResult, UnitGranularity};
pub use normalizer::normalise;
pub use report::{Reporter, ReportFormat, SysoutReporter};
pub use scope::ScopeStack;
pub use settings::{AssertionMode, Settings, StateLevel};
pub use stream::{assemble, DataRecord, FeatureStream, FeatureUnit};
pub use table::DataTable;
