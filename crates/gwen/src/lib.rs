// Umbrella re-exports for the Gwen interpreter.
pub use gwen_syntax::{
    parse, pretty_print, Background, EvalStatus, Examples, Feature, NodeType, ParseError, Rule,
    Scenario, SourceRef, Spec, SpecType, Step, Tag,
};

pub use gwen_eval::{
    assemble, normalise, DataTable, Engine, ErrorKind, EvalContext, EvalError, FeatureStream,
    FeatureUnit, Launcher, Reporter, ResultsSummary, ScopeStack, Settings, SpecResult,
    StepTranslator, TagFilter,
};

pub mod prelude {
    pub use crate::{assemble, normalise, parse, pretty_print, Engine, Launcher};
    pub use crate::{EvalContext, EvalStatus, Scenario, Settings, Spec, SpecResult, Step};
}
