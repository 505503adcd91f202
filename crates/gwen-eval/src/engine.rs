//! The step evaluation engine.
//!
//! One step evaluates through a fixed pipeline: interpolate the text,
//! publish the before event, health-check (first step of a scenario),
//! translate (composite, then StepDef, then unit translator), execute,
//! finalise (attachments, error details, status promotion), publish the
//! after event. Scenarios, backgrounds and rules walk their steps in
//! source order; a hard failure skips the remaining siblings.

use crate::bail_eval;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use anyhow::{Context as _, Result};
use regex::Regex;
use tracing::debug;

use gwen_syntax::status::aggregate;
use gwen_syntax::{
    parse, Background, EvalStatus, NodeType, Scenario, Spec, Step, Tag,
};

use crate::binding;
use crate::composites::{self, Composite};
use crate::context::EvalContext;
use crate::error::{kind_of, ErrorKind, EvalError};
use crate::interpolation::{
    interpolate_params, interpolate_string, interpolate_string_dry_run,
    interpolate_string_lenient,
};
use crate::normalizer::normalise;
use crate::scope::{FEATURE_SCOPE, PARAMS_SCOPE_PREFIX, RULE_SCOPE, SCENARIO_SCOPE};
use crate::settings::StateLevel;
use crate::stream::FeatureUnit;

/// The attachment name reserved for failure dumps.
pub const ERROR_DETAILS: &str = "Error details";

/// A pluggable unit-step translator. Domain step libraries implement
/// this to extend the engine's vocabulary; translators are consulted in
/// registration order before the built-in vocabulary.
pub trait StepTranslator: Send + Sync {
    /// Returns an action when this translator recognises the step.
    fn translate(&self, step: &Step) -> Option<StepAction>;
}

/// The executable form of a translated unit step.
pub type StepAction = Box<dyn FnOnce(&mut EvalContext, &Step) -> Result<()> + Send>;

/// An include/exclude tag filter (`@x,~@y,…`).
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl TagFilter {
    /// Parses the CLI form: comma-separated `@name` to include and
    /// `~@name` to exclude.
    pub fn parse(expression: &str) -> Result<TagFilter> {
        let mut filter = TagFilter::default();
        for token in expression.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(name) = token.strip_prefix("~@") {
                filter.excludes.push(name.to_string());
            } else if let Some(name) = token.strip_prefix('@') {
                filter.includes.push(name.to_string());
            } else {
                bail_eval!(
                    ErrorKind::InvalidTag,
                    "tag filter entries must start with '@' or '~@': '{}'",
                    token
                );
            }
        }
        Ok(filter)
    }

    /// True when a scenario with these tags should evaluate: none of
    /// the excludes and, when includes are given, at least one of them.
    pub fn accepts(&self, tags: &[Tag]) -> bool {
        if tags.iter().any(|t| self.excludes.contains(&t.name)) {
            return false;
        }
        self.includes.is_empty() || tags.iter().any(|t| self.includes.contains(&t.name))
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
}

/// The evaluation engine. Stateless apart from its translators and tag
/// filter; all evaluation state lives in the [`EvalContext`].
pub struct Engine {
    translators: Vec<Box<dyn StepTranslator>>,
    filter: TagFilter,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            translators: Vec::new(),
            filter: TagFilter::default(),
        }
    }

    /// Builder: apply an include/exclude tag filter to scenarios.
    pub fn with_tag_filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Registers a domain step translator ahead of the built-in
    /// vocabulary.
    pub fn register_translator(&mut self, translator: Box<dyn StepTranslator>) {
        self.translators.push(translator);
    }

    /// Evaluates one feature unit: loads its meta files, parses and
    /// normalises the feature, binds the data record, and walks the
    /// spec.
    pub fn evaluate_unit(&self, ctx: &mut EvalContext, unit: &FeatureUnit) -> Result<Spec> {
        ctx.start_unit_clock();

        let mut meta_specs = Vec::new();
        for meta_file in &unit.meta_files {
            let spec = load_spec(meta_file)?;
            ctx.load_stepdefs(&spec)?;
            meta_specs.push(spec);
        }

        let spec = load_spec(&unit.feature_file)?;
        ctx.load_stepdefs(&spec)?;

        if !ctx.scopes.contains_scope(FEATURE_SCOPE) {
            ctx.scopes.push_scope(FEATURE_SCOPE);
        }
        if let Some(record) = &unit.data_record {
            for (name, value) in &record.fields {
                ctx.scopes.set_in(FEATURE_SCOPE, name.clone(), value.clone());
            }
            ctx.scopes
                .set_in(FEATURE_SCOPE, "data.record.number", record.number.to_string());
        }

        let evaluated = self.evaluate_spec(ctx, spec)?;
        Ok(evaluated.with_meta_specs(meta_specs))
    }

    /// Walks a normalised spec, producing the evaluated tree.
    pub fn evaluate_spec(&self, ctx: &mut EvalContext, spec: Spec) -> Result<Spec> {
        let feature = spec.feature.clone();
        ctx.events.publish_before(
            feature.node_type(),
            &feature.name,
            feature.uuid,
            EvalStatus::Pending,
        );
        ctx.events.push_node(NodeType::Feature, feature.name.clone());

        let spec_background = spec.background.clone();
        let mut evaluated = spec;

        let scenarios = std::mem::take(&mut evaluated.scenarios);
        evaluated.scenarios = scenarios
            .into_iter()
            .map(|s| self.evaluate_scenario(ctx, s, spec_background.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let rules = std::mem::take(&mut evaluated.rules);
        evaluated.rules = rules
            .into_iter()
            .map(|mut rule| {
                ctx.events.push_node(NodeType::Rule, rule.name.clone());
                ctx.scopes.push_scope(RULE_SCOPE);
                let background = rule.background.clone().or_else(|| spec_background.clone());
                let scenarios = std::mem::take(&mut rule.scenarios);
                let result = scenarios
                    .into_iter()
                    .map(|s| self.evaluate_scenario(ctx, s, background.as_ref()))
                    .collect::<Result<Vec<_>>>();
                ctx.scopes.pop_scope();
                ctx.events.pop_node();
                Ok(rule.with_scenarios(result?))
            })
            .collect::<Result<Vec<_>>>()?;

        ctx.events.pop_node();
        ctx.events.publish_after(
            feature.node_type(),
            &feature.name,
            feature.uuid,
            evaluated.eval_status(),
        );
        Ok(evaluated)
    }

    fn evaluate_scenario(
        &self,
        ctx: &mut EvalContext,
        scenario: Scenario,
        parent_background: Option<&Background>,
    ) -> Result<Scenario> {
        // StepDef declarations load into the library; they only run
        // when called.
        if scenario.is_stepdef() {
            return Ok(scenario);
        }
        if !self.filter.accepts(&scenario.tags) {
            debug!(name = %scenario.name, "scenario filtered out");
            return Ok(mark_steps(scenario, EvalStatus::Skipped));
        }

        ctx.events.publish_before(
            scenario.node_type(),
            &scenario.name,
            scenario.uuid,
            EvalStatus::Pending,
        );
        ctx.events.push_node(NodeType::Scenario, scenario.name.clone());

        let evaluated = if scenario.is_ignored() {
            Ok(mark_steps(scenario, EvalStatus::Disabled))
        } else if scenario.is_outline() {
            self.evaluate_outline(ctx, scenario, parent_background)
        } else {
            self.evaluate_plain_scenario(ctx, scenario, parent_background)
        };

        ctx.events.pop_node();
        match evaluated {
            Ok(scenario) => {
                ctx.events.publish_after(
                    scenario.node_type(),
                    &scenario.name,
                    scenario.uuid,
                    scenario.eval_status(),
                );
                Ok(scenario)
            }
            Err(error) => Err(error),
        }
    }

    fn evaluate_outline(
        &self,
        ctx: &mut EvalContext,
        mut outline: Scenario,
        parent_background: Option<&Background>,
    ) -> Result<Scenario> {
        let examples = std::mem::take(&mut outline.examples);
        let examples = examples
            .into_iter()
            .map(|mut examples| {
                ctx.events.push_node(NodeType::Examples, examples.name.clone());
                let scenarios = std::mem::take(&mut examples.scenarios);
                let result = scenarios
                    .into_iter()
                    .map(|s| self.evaluate_scenario(ctx, s, parent_background))
                    .collect::<Result<Vec<_>>>();
                ctx.events.pop_node();
                Ok(examples.with_scenarios(result?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(outline.with_examples(examples))
    }

    fn evaluate_plain_scenario(
        &self,
        ctx: &mut EvalContext,
        mut scenario: Scenario,
        parent_background: Option<&Background>,
    ) -> Result<Scenario> {
        // Feature-level state persists across scenarios; a scenario
        // scope is only pushed when the state level isolates scenarios.
        let scoped = ctx.settings.state_level == StateLevel::Scenario;
        if scoped {
            ctx.scopes.reset(StateLevel::Scenario);
            ctx.scopes.push_scope(SCENARIO_SCOPE);
        }
        for (name, value) in &scenario.params {
            ctx.scopes.set(format!("<{}>", name), value.clone());
        }

        let background = scenario
            .background
            .take()
            .or_else(|| parent_background.map(Background::copy_fresh));

        let result = (|| -> Result<Scenario> {
            let mut background_failed = false;
            let background = match background {
                Some(mut background) => {
                    ctx.events.publish_before(
                        background.node_type(),
                        &background.name,
                        background.uuid,
                        EvalStatus::Pending,
                    );
                    ctx.events.push_node(NodeType::Background, background.name.clone());
                    let steps = std::mem::take(&mut background.steps);
                    let steps = self.evaluate_steps(ctx, steps, false)?;
                    ctx.events.pop_node();
                    let evaluated = background.with_steps(steps);
                    ctx.events.publish_after(
                        evaluated.node_type(),
                        &evaluated.name,
                        evaluated.uuid,
                        evaluated.eval_status(),
                    );
                    background_failed = evaluated.eval_status().is_failed();
                    Some(evaluated)
                }
                None => None,
            };

            let steps = std::mem::take(&mut scenario.steps);
            let steps = if background_failed {
                steps
                    .into_iter()
                    .map(|s| s.with_status(EvalStatus::Skipped))
                    .collect()
            } else {
                self.evaluate_steps(ctx, steps, false)?
            };

            Ok(scenario.with_background(background).with_steps(steps))
        })();

        if scoped {
            ctx.scopes.pop_scope();
        }
        result
    }

    /// Evaluates steps in source order. A hard failure (status Failed)
    /// skips the remaining siblings; sustained soft failures continue.
    pub fn evaluate_steps(
        &self,
        ctx: &mut EvalContext,
        steps: Vec<Step>,
        in_stepdef: bool,
    ) -> Result<Vec<Step>> {
        let mut evaluated = Vec::with_capacity(steps.len());
        let mut skipping = false;
        for (index, step) in steps.into_iter().enumerate() {
            if skipping {
                evaluated.push(step.with_status(EvalStatus::Skipped));
                continue;
            }
            let health_check = index == 0 && !in_stepdef;
            let step = self.evaluate_step_checked(ctx, &step, health_check)?;
            skipping = step.eval_status.is_failed();
            evaluated.push(step);
        }
        Ok(evaluated)
    }

    /// Evaluates a single step through the full pipeline.
    pub fn evaluate_step(&self, ctx: &mut EvalContext, step: &Step) -> Result<Step> {
        self.evaluate_step_checked(ctx, step, false)
    }

    fn evaluate_step_checked(
        &self,
        ctx: &mut EvalContext,
        step: &Step,
        health_check: bool,
    ) -> Result<Step> {
        let started = Instant::now();

        // 1. Interpolate (params first, then properties).
        let step = match self.interpolate_step(ctx, step) {
            Ok(step) => step,
            Err(error) => {
                let failed = self.finalise(ctx, step.clone(), started, Some(error));
                publish_step_events(ctx, &failed, false);
                return Ok(failed);
            }
        };

        // 2. Before event.
        publish_step_events(ctx, &step, true);
        ctx.events.push_node(NodeType::Step, step.text.clone());

        // 3. Health check at the first step of a scenario.
        let outcome = if health_check {
            self.health_check(ctx).and_then(|_| {
                // 4 + 5. Translate and execute.
                self.translate_and_execute(ctx, &step)
            })
        } else {
            self.translate_and_execute(ctx, &step)
        };

        ctx.events.pop_node();

        // 6. Finalise.
        let finalised = match outcome {
            Ok(evaluated) => self.finalise(ctx, evaluated, started, None),
            Err(error) => self.finalise(ctx, step.clone(), started, Some(error)),
        };

        // 7. After event.
        publish_step_events(ctx, &finalised, false);
        Ok(finalised)
    }

    /// Resolves `$<param>` and `${property}` placeholders in the step
    /// text and doc-string. A composite step interpolates leniently:
    /// its loop variables only resolve once an iteration binds them.
    fn interpolate_step(&self, ctx: &mut EvalContext, step: &Step) -> Result<Step> {
        let lenient = composites::parse_composite(&step.text).is_some();
        let text = self.interpolate_mode(ctx, &step.text, lenient)?;
        let doc_string = match &step.doc_string {
            Some(doc) => Some(gwen_syntax::DocString {
                line: doc.line,
                content: self.interpolate_mode(ctx, &doc.content, lenient)?,
                media_type: doc.media_type.clone(),
            }),
            None => None,
        };
        Ok(step.clone().with_text(text).with_doc_string(doc_string))
    }

    /// Interpolates arbitrary text against the context: parameters from
    /// the scope stack, properties through binding resolution with an
    /// environment-variable fallback.
    pub fn interpolate_text(&self, ctx: &mut EvalContext, text: &str) -> Result<String> {
        self.interpolate_mode(ctx, text, false)
    }

    fn interpolate_mode(&self, ctx: &mut EvalContext, text: &str, lenient: bool) -> Result<String> {
        let dry_run = ctx.dry_run();
        let js = Arc::clone(&ctx.js);
        let runner = Arc::clone(&ctx.runner);
        let scopes = RefCell::new(&mut ctx.scopes);
        let failure: RefCell<Option<anyhow::Error>> = RefCell::new(None);

        let lookup = |name: &str| -> Option<String> {
            let mut scopes = scopes.borrow_mut();
            if name.starts_with('<') {
                return scopes.get_opt(name).map(str::to_string);
            }
            match binding::resolve(&mut scopes, name, js.as_ref(), runner.as_ref(), dry_run) {
                Ok(value) => Some(value),
                Err(error) if kind_of(&error) == ErrorKind::UnboundBinding => {
                    std::env::var(name).ok()
                }
                Err(error) => {
                    failure.borrow_mut().get_or_insert(error);
                    None
                }
            }
        };

        let result = if lenient {
            interpolate_string_lenient(text, &lookup)
        } else if dry_run {
            interpolate_string_dry_run(text, &lookup)
        } else {
            interpolate_params(text, &lookup)
                .and_then(|expanded| interpolate_string(&expanded, &lookup))
        };
        if let Some(error) = failure.into_inner() {
            return Err(error);
        }
        result
    }

    /// Attempts translation in order: composite, StepDef, unit.
    fn translate_and_execute(&self, ctx: &mut EvalContext, step: &Step) -> Result<Step> {
        ctx.check_deadline()?;

        if let Some(composite) = composites::parse_composite(&step.text) {
            let mut eval = |ctx: &mut EvalContext, inner: Step| self.evaluate_step(ctx, &inner);
            let eval: &mut composites::DoStepEval = &mut eval;
            return match composite {
                Composite::IfDefined {
                    do_text,
                    name,
                    negate,
                } => composites::execute_if_defined(ctx, step, &name, negate, &do_text, eval),
                Composite::IfCondition {
                    do_text,
                    expression,
                } => composites::execute_if_condition(ctx, step, &expression, &do_text, eval),
                Composite::WhileCondition {
                    do_text,
                    expression,
                } => composites::execute_loop(ctx, step, &expression, &do_text, false, eval),
                Composite::UntilCondition {
                    do_text,
                    expression,
                } => composites::execute_loop(ctx, step, &expression, &do_text, true, eval),
                Composite::ForEachDelimited {
                    do_text,
                    element,
                    source,
                    delimiter,
                } => composites::execute_for_each(
                    ctx, step, &do_text, &element, &source, &delimiter, eval,
                ),
            };
        }

        if let Some(stepdef) = ctx.lookup_stepdef(&step.text).cloned() {
            return self.call_stepdef(ctx, &stepdef, step);
        }

        for translator in &self.translators {
            if let Some(action) = translator.translate(step) {
                let started = Instant::now();
                action(ctx, step)?;
                let status = if ctx.dry_run() {
                    EvalStatus::Loaded
                } else {
                    EvalStatus::passed(started.elapsed().as_nanos())
                };
                return Ok(step.clone().with_status(status));
            }
        }

        self.execute_builtin(ctx, step)
    }

    /// Calls a StepDef: a fresh parameter scope per call, recursion
    /// guarded through the scope stack, `@ForEach` tables fanned out
    /// one call per record.
    fn call_stepdef(&self, ctx: &mut EvalContext, stepdef: &Scenario, step: &Step) -> Result<Step> {
        let scope_name = format!("{}{}", PARAMS_SCOPE_PREFIX, stepdef.name);
        let has_new_args = step
            .params
            .iter()
            .any(|(name, _)| name != "iteration.number");
        if ctx.scopes.contains_scope(&scope_name) && !has_new_args {
            bail_eval!(
                ErrorKind::RecursiveStepDef,
                "StepDef '{}' calls itself without new arguments",
                stepdef.name
            );
        }

        if stepdef.is_for_each() {
            if step.table.is_empty() {
                bail_eval!(
                    ErrorKind::DataTable,
                    "step '{}' requires a data table",
                    step.text
                );
            }
            let annotation = stepdef.data_table_tag().and_then(|tag| tag.value.clone());
            let call = |ctx: &mut EvalContext, _record: usize| {
                self.call_stepdef_body(ctx, stepdef, step, &scope_name)
            };
            return composites::for_each_table_records(ctx, step, annotation.as_deref(), call);
        }

        self.call_stepdef_body(ctx, stepdef, step, &scope_name)
    }

    fn call_stepdef_body(
        &self,
        ctx: &mut EvalContext,
        stepdef: &Scenario,
        step: &Step,
        scope_name: &str,
    ) -> Result<Step> {
        // A synchronized StepDef body never runs concurrently across
        // workers. The guard is keyed by StepDef name and acquired only
        // at the outermost frame: nested re-entry with new arguments
        // already holds it.
        let reentrant = ctx.scopes.contains_scope(scope_name);
        let lock = (stepdef.is_synchronized() && !reentrant)
            .then(|| synchronized_lock(&stepdef.name));
        let _guard = lock
            .as_ref()
            .map(|mutex| mutex.lock().unwrap_or_else(|e| e.into_inner()));

        ctx.events.push_node(NodeType::StepDef, stepdef.name.clone());
        ctx.scopes.push_scope(scope_name.to_string());
        for (name, value) in stepdef.params.iter().chain(step.params.iter()) {
            ctx.scopes.set(format!("<{}>", name), value.clone());
        }

        let body = stepdef.clone().with_caller_params(step.params.clone());
        let result = self.evaluate_steps(ctx, body.steps.clone(), true);

        ctx.scopes.pop_scope();
        ctx.events.pop_node();

        let steps = result?;
        let status = aggregate(steps.iter().map(|s| &s.eval_status), true);
        Ok(step
            .clone()
            .with_stepdef(body.with_steps(steps))
            .with_status(status))
    }

    /// Validates the visible scope before the first step of a scenario:
    /// every JS-function binding must reference a bound function.
    fn health_check(&self, ctx: &EvalContext) -> Result<()> {
        for (_, name, value) in ctx.scopes.visible() {
            if let Some(base) = name.strip_suffix("/function/jsRef") {
                if ctx
                    .scopes
                    .get_opt(&format!("{}/javascript", value))
                    .is_none()
                {
                    bail_eval!(
                        ErrorKind::UnboundBinding,
                        "'{}' references JS function '{}' which is not bound",
                        base,
                        value
                    );
                }
            }
        }
        Ok(())
    }

    /// The built-in step vocabulary: bindings, captures, assertions and
    /// attachments. Anything unrecognised is an undefined step.
    fn execute_builtin(&self, ctx: &mut EvalContext, step: &Step) -> Result<Step> {
        let started = Instant::now();
        let vocabulary = vocabulary();
        let text = &step.text;
        let dry_run = ctx.dry_run();

        if let Some(captures) = vocabulary.js.captures(text) {
            binding::bind_js(&mut ctx.scopes, &captures[1], &captures[2]);
        } else if let Some(captures) = vocabulary.js_evaluated.captures(text) {
            binding::bind_js(&mut ctx.scopes, &captures[1], &captures[2]);
        } else if let Some(captures) = vocabulary.js_function_delimited.captures(text) {
            binding::bind_js_function(
                &mut ctx.scopes,
                &captures[1],
                &captures[2],
                &captures[3],
                Some(&captures[4]),
            );
        } else if let Some(captures) = vocabulary.js_function.captures(text) {
            binding::bind_js_function(&mut ctx.scopes, &captures[1], &captures[2], &captures[3], None);
        } else if let Some(captures) = vocabulary.file.captures(text) {
            binding::bind_file(&mut ctx.scopes, &captures[1], &captures[2]);
        } else if let Some(captures) = vocabulary.sysproc.captures(text) {
            binding::bind_sysproc(&mut ctx.scopes, &captures[1], &captures[2]);
        } else if let Some(captures) = vocabulary.load_strategy.captures(text) {
            binding::bind_load_strategy(&mut ctx.scopes, &captures[1], &captures[2] == "lazily");
        } else if let Some(captures) = vocabulary.capture.captures(text) {
            if !dry_run {
                let value = self.resolve_binding(ctx, &captures[1])?;
                binding::bind_value(&mut ctx.scopes, &captures[2], &value);
            }
        } else if let Some(captures) = vocabulary.attach.captures(text) {
            if !dry_run {
                ctx.add_attachment(captures[2].to_string(), PathBuf::from(&captures[1]));
            }
        } else if let Some(captures) = vocabulary.should_not_be.captures(text) {
            if !dry_run {
                let actual = self.resolve_binding(ctx, &captures[1])?;
                self.assert_that(
                    ctx,
                    actual != captures[2],
                    format!("'{}' should not be \"{}\"", &captures[1], &captures[2]),
                )?;
            }
        } else if let Some(captures) = vocabulary.should_be.captures(text) {
            if !dry_run {
                let actual = self.resolve_binding(ctx, &captures[1])?;
                self.assert_that(
                    ctx,
                    actual == captures[2],
                    format!(
                        "'{}' should be \"{}\" but was \"{}\"",
                        &captures[1], &captures[2], actual
                    ),
                )?;
            }
        } else if let Some(captures) = vocabulary.should_not_contain.captures(text) {
            if !dry_run {
                let actual = self.resolve_binding(ctx, &captures[1])?;
                self.assert_that(
                    ctx,
                    !actual.contains(&captures[2]),
                    format!("'{}' should not contain \"{}\"", &captures[1], &captures[2]),
                )?;
            }
        } else if let Some(captures) = vocabulary.should_contain.captures(text) {
            if !dry_run {
                let actual = self.resolve_binding(ctx, &captures[1])?;
                self.assert_that(
                    ctx,
                    actual.contains(&captures[2]),
                    format!(
                        "'{}' should contain \"{}\" but was \"{}\"",
                        &captures[1], &captures[2], actual
                    ),
                )?;
            }
        } else if let Some(captures) = vocabulary.should_match.captures(text) {
            if !dry_run {
                let actual = self.resolve_binding(ctx, &captures[1])?;
                let pattern = Regex::new(&captures[2]).map_err(|e| {
                    anyhow::anyhow!(EvalError::new(
                        ErrorKind::Syntax,
                        format!("invalid regex \"{}\": {}", &captures[2], e),
                    ))
                })?;
                self.assert_that(
                    ctx,
                    pattern.is_match(&actual),
                    format!(
                        "'{}' should match regex \"{}\" but was \"{}\"",
                        &captures[1], &captures[2], actual
                    ),
                )?;
            }
        } else if let Some(captures) = vocabulary.should_not_be_defined.captures(text) {
            if !dry_run {
                self.assert_that(
                    ctx,
                    binding::kind_of_binding(&ctx.scopes, &captures[1]).is_none(),
                    format!("'{}' should not be defined", &captures[1]),
                )?;
            }
        } else if let Some(captures) = vocabulary.should_be_defined.captures(text) {
            if !dry_run {
                self.assert_that(
                    ctx,
                    binding::kind_of_binding(&ctx.scopes, &captures[1]).is_some(),
                    format!("'{}' should be defined", &captures[1]),
                )?;
            }
        } else if let Some(captures) = vocabulary.value.captures(text) {
            binding::bind_value(&mut ctx.scopes, &captures[1], &captures[2]);
        } else {
            bail_eval!(
                ErrorKind::UndefinedStep,
                "no StepDef or vocabulary entry matches '{}'",
                text
            );
        }

        let status = if dry_run {
            EvalStatus::Loaded
        } else {
            EvalStatus::passed(started.elapsed().as_nanos())
        };
        Ok(step.clone().with_status(status))
    }

    fn resolve_binding(&self, ctx: &mut EvalContext, name: &str) -> Result<String> {
        let js = Arc::clone(&ctx.js);
        let runner = Arc::clone(&ctx.runner);
        binding::resolve(
            &mut ctx.scopes,
            name,
            js.as_ref(),
            runner.as_ref(),
            ctx.settings.dry_run,
        )
    }

    fn assert_that(&self, ctx: &EvalContext, ok: bool, message: String) -> Result<()> {
        if ok {
            return Ok(());
        }
        let kind = match ctx.settings.assertion_mode {
            crate::settings::AssertionMode::Hard => ErrorKind::AssertionHard,
            crate::settings::AssertionMode::Soft => ErrorKind::AssertionSoft,
        };
        Err(anyhow::anyhow!(EvalError::new(kind, message)))
    }

    /// Moves pending attachments onto the step, attaches the error
    /// details dump on failure, and applies the status promotions
    /// (soft assertion failures sustain, disabled errors disable).
    fn finalise(
        &self,
        ctx: &mut EvalContext,
        step: Step,
        started: Instant,
        error: Option<anyhow::Error>,
    ) -> Step {
        let nanos = started.elapsed().as_nanos();
        let mut step = match error {
            Some(error) => {
                let status = match kind_of(&error) {
                    ErrorKind::AssertionSoft => EvalStatus::Sustained {
                        nanos,
                        error: error.to_string(),
                    },
                    ErrorKind::Disabled => EvalStatus::Disabled,
                    _ => EvalStatus::Failed {
                        nanos,
                        error: error.to_string(),
                    },
                };
                step.with_status(status)
            }
            None => step,
        };

        let mut attachments = std::mem::take(&mut step.attachments);
        attachments.extend(ctx.drain_attachments());

        if step.eval_status.is_failed()
            && !attachments.iter().any(|(name, _)| name == ERROR_DETAILS)
        {
            if let Some(file) = write_error_details(ctx, &step) {
                attachments.push((ERROR_DETAILS.to_string(), file));
            }
        }

        step.with_attachments(attachments)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads, parses and normalises a `.feature` or `.meta` file. Parse
/// failures surface as syntax errors that abort only this unit.
pub fn load_spec(file: &std::path::Path) -> Result<Spec> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read: {}", file.display()))?;
    let uri = file.display().to_string();
    let spec = parse(&source, &uri).map_err(|e| {
        anyhow::anyhow!(EvalError::new(
            ErrorKind::Syntax,
            format!("{}: {}", uri, e)
        ))
    })?;
    normalise(spec.with_file(file.to_path_buf()))
}

fn mark_steps(mut scenario: Scenario, status: EvalStatus) -> Scenario {
    if let Some(background) = scenario.background.take() {
        let steps = background
            .steps
            .iter()
            .map(|s| s.clone().with_status(status.clone()))
            .collect();
        scenario.background = Some(background.with_steps(steps));
    }
    scenario.steps = scenario
        .steps
        .into_iter()
        .map(|s| s.with_status(status.clone()))
        .collect();
    if scenario.is_outline() {
        scenario.examples = scenario
            .examples
            .into_iter()
            .map(|mut examples| {
                examples.scenarios = examples
                    .scenarios
                    .into_iter()
                    .map(|s| mark_steps(s, status.clone()))
                    .collect();
                examples
            })
            .collect();
    }
    scenario
}

fn publish_step_events(ctx: &mut EvalContext, step: &Step, before: bool) {
    if before {
        ctx.events
            .publish_before(NodeType::Step, &step.text, step.uuid, EvalStatus::Pending);
    } else {
        ctx.events
            .publish_after(NodeType::Step, &step.text, step.uuid, step.eval_status.clone());
    }
}

/// Writes the visible-scope dump plus the error message to a file for
/// the "Error details" attachment.
fn write_error_details(ctx: &EvalContext, step: &Step) -> Option<PathBuf> {
    let mut dump = String::new();
    if let Some(error) = step.eval_status.error() {
        dump.push_str(error);
        dump.push_str("\n\n");
    }
    dump.push_str("Visible scope:\n");
    dump.push_str(&ctx.scopes.dump());

    let file = std::env::temp_dir().join(format!("gwen-{}-error.txt", step.uuid));
    std::fs::write(&file, dump).ok()?;
    Some(file)
}

fn synchronized_lock(name: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(locks.entry(name.to_string()).or_default())
}

struct Vocabulary {
    js: Regex,
    js_evaluated: Regex,
    js_function_delimited: Regex,
    js_function: Regex,
    file: Regex,
    sysproc: Regex,
    load_strategy: Regex,
    capture: Regex,
    attach: Regex,
    should_not_be: Regex,
    should_be: Regex,
    should_not_contain: Regex,
    should_contain: Regex,
    should_match: Regex,
    should_not_be_defined: Regex,
    should_be_defined: Regex,
    value: Regex,
}

fn vocabulary() -> &'static Vocabulary {
    static VOCABULARY: OnceLock<Vocabulary> = OnceLock::new();
    VOCABULARY.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("vocabulary patterns are static");
        Vocabulary {
            js: compile(r#"^(.+?) is defined by javascript "(.*)"$"#),
            js_evaluated: compile(r#"^(.+?) is "(.*)" evaluated$"#),
            js_function_delimited: compile(
                r#"^(.+?) is defined by js function "(.+?)" applied to "(.*)" delimited by "(.+)"$"#,
            ),
            js_function: compile(r#"^(.+?) is defined by js function "(.+?)" applied to "(.*)"$"#),
            file: compile(r#"^(.+?) is defined by file "(.+)"$"#),
            sysproc: compile(r#"^(.+?) is defined by system process "(.+)"$"#),
            load_strategy: compile(r"^(.+?) is loaded (eagerly|lazily)$"),
            capture: compile(r"^I capture (.+?) as (.+)$"),
            attach: compile(r#"^I attach "(.+?)" as "(.+)"$"#),
            should_not_be: compile(r#"^(.+?) should not be "(.*)"$"#),
            should_be: compile(r#"^(.+?) should be "(.*)"$"#),
            should_not_contain: compile(r#"^(.+?) should not contain "(.*)"$"#),
            should_contain: compile(r#"^(.+?) should contain "(.*)"$"#),
            should_match: compile(r#"^(.+?) should match regex "(.*)"$"#),
            should_not_be_defined: compile(r"^(.+?) should not be defined$"),
            should_be_defined: compile(r"^(.+?) should be defined$"),
            value: compile(r#"^(?:my )?(.+?) is "(.*)"$"#),
        }
    })
}
