//! The spec node model.
//!
//! Nodes are immutable value types with `with_*` copy constructors:
//! evaluation never mutates a parsed tree, it produces new nodes with
//! updated statuses and attachments. Every node carries a stable `uuid`
//! and a [`SourceRef`]; node paths are assigned by the normaliser.

use std::path::PathBuf;

use uuid::Uuid;

use crate::error::Position;
use crate::status::{aggregate, EvalStatus};
use crate::tags::{has_reserved, ReservedTag, Tag};

/// The closed set of node kinds in a spec tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Feature,
    Meta,
    Background,
    Rule,
    Scenario,
    StepDef,
    Examples,
    Step,
    Tag,
    Unit,
}

/// A reference into source text: uri, position, and (after
/// normalisation) the node's canonical path within its spec.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub uri: String,
    pub line: usize,
    pub column: usize,
    /// `/`-delimited path of `name[occurrence]` segments; `None` until
    /// the normaliser assigns it.
    pub node_path: Option<String>,
}

impl SourceRef {
    pub fn new(uri: impl Into<String>, position: Position) -> Self {
        Self {
            uri: uri.into(),
            line: position.line,
            column: position.column,
            node_path: None,
        }
    }

    pub fn with_node_path(mut self, path: impl Into<String>) -> Self {
        self.node_path = Some(path.into());
        self
    }
}

/// One `name[occurrence]` segment of a node path. The `[k]` suffix is
/// appended only when several siblings share the same name.
pub fn node_path_segment(name: &str, occurrence: usize, same_named_siblings: usize) -> String {
    if same_named_siblings > 1 {
        format!("{}[{}]", name, occurrence)
    } else {
        name.to_string()
    }
}

/// The 1-based occurrence of `name` at `index` among `names`.
pub fn occurrence_in(names: &[&str], index: usize) -> usize {
    names[..index].iter().filter(|n| **n == names[index]).count() + 1
}

/// A fenced multi-line string argument to a step.
#[derive(Debug, Clone, PartialEq)]
pub struct DocString {
    pub line: usize,
    pub content: String,
    pub media_type: Option<String>,
}

/// One row of an inline data table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub line: usize,
    pub cells: Vec<String>,
}

impl TableRow {
    pub fn new(line: usize, cells: Vec<String>) -> Self {
        Self { line, cells }
    }
}

/// A file attached to a step during evaluation.
pub type Attachment = (String, PathBuf);

/// A single Given/When/Then/And/But action line.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub uuid: Uuid,
    pub source_ref: SourceRef,
    pub keyword: String,
    pub text: String,
    pub table: Vec<TableRow>,
    pub doc_string: Option<DocString>,
    pub eval_status: EvalStatus,
    pub attachments: Vec<Attachment>,
    /// The StepDef this step resolved to, populated at dispatch time.
    pub stepdef: Option<Box<Scenario>>,
    pub params: Vec<(String, String)>,
    pub caller_params: Vec<(String, String)>,
}

impl Step {
    pub fn new(keyword: impl Into<String>, text: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            keyword: keyword.into(),
            text: text.into(),
            table: Vec::new(),
            doc_string: None,
            eval_status: EvalStatus::Pending,
            attachments: Vec::new(),
            stepdef: None,
            params: Vec::new(),
            caller_params: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::Step
    }

    /// The display name used in node paths and reports.
    pub fn name(&self) -> &str {
        &self.text
    }

    /// The full source line, keyword included.
    pub fn expression(&self) -> String {
        format!("{} {}", self.keyword, self.text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_status(mut self, status: EvalStatus) -> Self {
        self.eval_status = status;
        self
    }

    pub fn with_table(mut self, table: Vec<TableRow>) -> Self {
        self.table = table;
        self
    }

    pub fn with_doc_string(mut self, doc_string: Option<DocString>) -> Self {
        self.doc_string = doc_string;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_caller_params(mut self, params: Vec<(String, String)>) -> Self {
        self.caller_params = params;
        self
    }

    pub fn with_stepdef(mut self, stepdef: Scenario) -> Self {
        self.stepdef = Some(Box::new(stepdef));
        self
    }

    /// A fresh copy with a new identity, used when replicating
    /// background steps into expanded scenarios.
    pub fn copy_fresh(&self) -> Self {
        let mut copy = self.clone();
        copy.uuid = Uuid::new_v4();
        copy
    }
}

/// Steps prepended to every scenario in their scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    pub uuid: Uuid,
    pub source_ref: SourceRef,
    pub keyword: String,
    pub name: String,
    pub description: Vec<String>,
    pub steps: Vec<Step>,
}

impl Background {
    pub fn new(name: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            keyword: "Background".to_string(),
            name: name.into(),
            description: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::Background
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn eval_status(&self) -> EvalStatus {
        aggregate(self.steps.iter().map(|s| &s.eval_status), false)
    }

    /// A fresh deep copy with new identities for itself and its steps.
    pub fn copy_fresh(&self) -> Self {
        let mut copy = self.clone();
        copy.uuid = Uuid::new_v4();
        copy.steps = self.steps.iter().map(Step::copy_fresh).collect();
        copy
    }
}

/// A table of example records, with the scenarios expanded from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Examples {
    pub uuid: Uuid,
    pub source_ref: SourceRef,
    pub tags: Vec<Tag>,
    pub keyword: String,
    pub name: String,
    pub description: Vec<String>,
    pub table: Vec<TableRow>,
    pub scenarios: Vec<Scenario>,
}

impl Examples {
    pub fn new(name: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            tags: Vec::new(),
            keyword: "Examples".to_string(),
            name: name.into(),
            description: Vec::new(),
            table: Vec::new(),
            scenarios: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::Examples
    }

    pub fn with_table(mut self, table: Vec<TableRow>) -> Self {
        self.table = table;
        self
    }

    pub fn with_scenarios(mut self, scenarios: Vec<Scenario>) -> Self {
        self.scenarios = scenarios;
        self
    }

    pub fn eval_status(&self) -> EvalStatus {
        aggregate(self.scenarios.iter().map(Scenario::eval_status).collect::<Vec<_>>().iter(), false)
    }
}

/// An ordered sequence of steps; an outline when `examples` is non-empty,
/// a StepDef when tagged `@StepDef`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub uuid: Uuid,
    pub source_ref: SourceRef,
    pub tags: Vec<Tag>,
    pub keyword: String,
    pub name: String,
    pub description: Vec<String>,
    pub background: Option<Background>,
    pub steps: Vec<Step>,
    pub examples: Vec<Examples>,
    pub params: Vec<(String, String)>,
    pub caller_params: Vec<(String, String)>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            tags: Vec::new(),
            keyword: "Scenario".to_string(),
            name: name.into(),
            description: Vec::new(),
            background: None,
            steps: Vec::new(),
            examples: Vec::new(),
            params: Vec::new(),
            caller_params: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        if self.is_stepdef() {
            NodeType::StepDef
        } else {
            NodeType::Scenario
        }
    }

    pub fn is_outline(&self) -> bool {
        !self.examples.is_empty()
    }

    pub fn is_stepdef(&self) -> bool {
        has_reserved(&self.tags, ReservedTag::StepDef)
    }

    pub fn is_for_each(&self) -> bool {
        has_reserved(&self.tags, ReservedTag::ForEach)
    }

    pub fn is_synthetic(&self) -> bool {
        has_reserved(&self.tags, ReservedTag::Synthetic)
    }

    pub fn is_ignored(&self) -> bool {
        has_reserved(&self.tags, ReservedTag::Ignore)
    }

    pub fn is_synchronized(&self) -> bool {
        has_reserved(&self.tags, ReservedTag::Synchronized)
    }

    pub fn data_table_tag(&self) -> Option<&Tag> {
        crate::tags::find_reserved(&self.tags, ReservedTag::DataTable)
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = keyword.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_background(mut self, background: Option<Background>) -> Self {
        self.background = background;
        self
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_examples(mut self, examples: Vec<Examples>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_caller_params(mut self, params: Vec<(String, String)>) -> Self {
        self.caller_params = params;
        self
    }

    /// The scenarios that actually execute: the expansion when this is
    /// an outline, otherwise the scenario itself.
    pub fn evaluated_scenarios(&self) -> Vec<&Scenario> {
        if self.is_outline() {
            self.examples
                .iter()
                .flat_map(|e| e.scenarios.iter())
                .collect()
        } else {
            vec![self]
        }
    }

    /// Derived status: outlines aggregate their expanded scenarios,
    /// plain scenarios aggregate background plus steps.
    pub fn eval_status(&self) -> EvalStatus {
        if self.is_outline() {
            let statuses: Vec<EvalStatus> = self
                .examples
                .iter()
                .flat_map(|e| e.scenarios.iter())
                .map(Scenario::eval_status)
                .collect();
            return aggregate(statuses.iter(), false);
        }
        let mut statuses: Vec<&EvalStatus> = Vec::new();
        if let Some(background) = &self.background {
            statuses.extend(background.steps.iter().map(|s| &s.eval_status));
        }
        statuses.extend(self.steps.iter().map(|s| &s.eval_status));
        aggregate(statuses.into_iter(), self.is_stepdef())
    }
}

/// A group of scenarios sharing additional context.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub uuid: Uuid,
    pub source_ref: SourceRef,
    pub keyword: String,
    pub name: String,
    pub description: Vec<String>,
    pub background: Option<Background>,
    pub scenarios: Vec<Scenario>,
}

impl Rule {
    pub fn new(name: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            keyword: "Rule".to_string(),
            name: name.into(),
            description: Vec::new(),
            background: None,
            scenarios: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::Rule
    }

    pub fn with_background(mut self, background: Option<Background>) -> Self {
        self.background = background;
        self
    }

    pub fn with_scenarios(mut self, scenarios: Vec<Scenario>) -> Self {
        self.scenarios = scenarios;
        self
    }

    pub fn eval_status(&self) -> EvalStatus {
        let statuses: Vec<EvalStatus> = self.scenarios.iter().map(Scenario::eval_status).collect();
        aggregate(statuses.iter(), false)
    }
}

/// The feature header: language, tags, name and description.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub uuid: Uuid,
    pub source_ref: SourceRef,
    pub language: String,
    pub tags: Vec<Tag>,
    pub keyword: String,
    pub name: String,
    pub description: Vec<String>,
}

impl Feature {
    pub fn new(name: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            language: "en".to_string(),
            tags: Vec::new(),
            keyword: "Feature".to_string(),
            name: name.into(),
            description: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::Feature
    }
}

/// Whether a spec came from a `.feature` or a `.meta` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecType {
    Feature,
    Meta,
}

/// A parsed specification: one feature with its backgrounds, scenarios
/// and rules, plus any meta specs loaded alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    pub uuid: Uuid,
    pub spec_type: SpecType,
    pub feature: Feature,
    pub background: Option<Background>,
    pub scenarios: Vec<Scenario>,
    pub rules: Vec<Rule>,
    pub file: Option<PathBuf>,
    pub meta_specs: Vec<Spec>,
}

impl Spec {
    pub fn new(feature: Feature, spec_type: SpecType) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            spec_type,
            feature,
            background: None,
            scenarios: Vec::new(),
            rules: Vec::new(),
            file: None,
            meta_specs: Vec::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self.spec_type {
            SpecType::Feature => NodeType::Root,
            SpecType::Meta => NodeType::Meta,
        }
    }

    pub fn with_background(mut self, background: Option<Background>) -> Self {
        self.background = background;
        self
    }

    pub fn with_scenarios(mut self, scenarios: Vec<Scenario>) -> Self {
        self.scenarios = scenarios;
        self
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_file(mut self, file: PathBuf) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_meta_specs(mut self, meta_specs: Vec<Spec>) -> Self {
        self.meta_specs = meta_specs;
        self
    }

    /// All scenarios, top-level and under rules, in source order.
    pub fn all_scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios
            .iter()
            .chain(self.rules.iter().flat_map(|r| r.scenarios.iter()))
    }

    /// All StepDef scenarios declared in this spec.
    pub fn stepdefs(&self) -> impl Iterator<Item = &Scenario> {
        self.all_scenarios().filter(|s| s.is_stepdef())
    }

    /// Derived status over every evaluated scenario. Meta specs that
    /// declared only StepDefs report [`EvalStatus::Loaded`].
    pub fn eval_status(&self) -> EvalStatus {
        let statuses: Vec<EvalStatus> = self
            .all_scenarios()
            .filter(|s| !s.is_stepdef())
            .map(Scenario::eval_status)
            .collect();
        if statuses.is_empty() && self.spec_type == SpecType::Meta {
            return EvalStatus::Loaded;
        }
        aggregate(statuses.iter(), false)
    }

    /// The root-to-leaf step chains whose leaves are failing, used by
    /// reporters to render error trails.
    pub fn error_trails(&self) -> Vec<Vec<Step>> {
        let mut trails = Vec::new();
        for scenario in self.all_scenarios() {
            for evaluated in scenario.evaluated_scenarios() {
                if let Some(background) = &evaluated.background {
                    for step in &background.steps {
                        collect_trails(step, &mut Vec::new(), &mut trails);
                    }
                }
                for step in &evaluated.steps {
                    collect_trails(step, &mut Vec::new(), &mut trails);
                }
            }
        }
        trails
    }
}

fn collect_trails(step: &Step, chain: &mut Vec<Step>, trails: &mut Vec<Vec<Step>>) {
    if !step.eval_status.is_failed() {
        return;
    }
    chain.push(step.clone());
    match &step.stepdef {
        Some(stepdef) => {
            let before = trails.len();
            for inner in &stepdef.steps {
                collect_trails(inner, chain, trails);
            }
            // The leaf is this step itself when no inner step failed.
            if trails.len() == before {
                trails.push(chain.clone());
            }
        }
        None => trails.push(chain.clone()),
    }
    chain.pop();
}
