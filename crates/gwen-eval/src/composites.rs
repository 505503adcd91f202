//! Composite step control flow.
//!
//! A composite step wraps an inner "do" step with a guard or loop:
//!
//! - `<step> if <name> is [not] defined`
//! - `<step> if "<javascript>"`
//! - `<step> while "<javascript>"` / `<step> until "<javascript>"`
//! - `<step> for each <element> in "<source>" delimited by "<delimiter>"`
//!
//! The loops are plain bounded loops; each iteration evaluates the
//! inner step through the engine callback and the results are collected
//! into a synthetic body attached to the composite step.

use anyhow::Result;
use gwen_syntax::status::aggregate;
use gwen_syntax::{EvalStatus, Scenario, Step, Tag};

use crate::context::EvalContext;
use crate::scope::RECORD_SCOPE;
use crate::table::DataTable;

/// The parsed form of a composite step.
#[derive(Debug, Clone, PartialEq)]
pub enum Composite {
    IfDefined {
        do_text: String,
        name: String,
        negate: bool,
    },
    IfCondition {
        do_text: String,
        expression: String,
    },
    WhileCondition {
        do_text: String,
        expression: String,
    },
    UntilCondition {
        do_text: String,
        expression: String,
    },
    ForEachDelimited {
        do_text: String,
        element: String,
        source: String,
        delimiter: String,
    },
}

/// Recognises a composite step. The rightmost operator wins so inner
/// composites stay part of the do-step text.
pub fn parse_composite(text: &str) -> Option<Composite> {
    if let Some(composite) = parse_if_defined(text) {
        return Some(composite);
    }
    if let Some((do_text, element, source, delimiter)) = parse_for_each(text) {
        return Some(Composite::ForEachDelimited {
            do_text,
            element,
            source,
            delimiter,
        });
    }
    let builders: [(&str, fn(String, String) -> Composite); 3] = [
        (" if ", |do_text, expression| Composite::IfCondition { do_text, expression }),
        (" while ", |do_text, expression| Composite::WhileCondition { do_text, expression }),
        (" until ", |do_text, expression| Composite::UntilCondition { do_text, expression }),
    ];
    for (operator, build) in builders {
        if let Some((do_text, expression)) = split_quoted_operand(text, operator) {
            return Some(build(do_text, expression));
        }
    }
    None
}

fn parse_if_defined(text: &str) -> Option<Composite> {
    for (suffix, negate) in [(" is not defined", true), (" is defined", false)] {
        if let Some(head) = text.strip_suffix(suffix) {
            if let Some(split) = head.rfind(" if ") {
                let do_text = head[..split].to_string();
                let name = head[split + 4..].to_string();
                if !do_text.is_empty() && !name.is_empty() {
                    return Some(Composite::IfDefined {
                        do_text,
                        name,
                        negate,
                    });
                }
            }
        }
    }
    None
}

/// Splits `<do> <operator> "<operand>"`; the operand must be the quoted
/// tail of the text.
fn split_quoted_operand(text: &str, operator: &str) -> Option<(String, String)> {
    let tail = text.strip_suffix('"')?;
    let marker = format!("{}\"", operator);
    let split = tail.rfind(&marker)?;
    let do_text = &text[..split];
    let operand = &tail[split + marker.len()..];
    if do_text.is_empty() {
        return None;
    }
    Some((do_text.to_string(), operand.to_string()))
}

fn parse_for_each(text: &str) -> Option<(String, String, String, String)> {
    let tail = text.strip_suffix('"')?;
    let delim_split = tail.rfind(" delimited by \"")?;
    let delimiter = &tail[delim_split + 15..];
    let head = &text[..delim_split];
    let source = head.strip_suffix('"')?;
    let in_split = source.rfind(" in \"")?;
    let source_value = &source[in_split + 5..];
    let head = &head[..in_split + 1];
    let each_split = head.rfind(" for each ")?;
    let do_text = &text[..each_split];
    let element = head[each_split + 10..].trim_end();
    if do_text.is_empty() || element.is_empty() {
        return None;
    }
    Some((
        do_text.to_string(),
        element.to_string(),
        source_value.to_string(),
        delimiter.to_string(),
    ))
}

/// The engine callback that evaluates one synthesized inner step.
pub type DoStepEval<'a> = dyn FnMut(&mut EvalContext, Step) -> Result<Step> + 'a;

/// Interprets the string a JS condition produced as a boolean.
pub fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "" | "0" | "null" | "undefined"
    )
}

/// Evaluates a JS guard expression, negated when requested.
pub fn js_condition(ctx: &EvalContext, expression: &str) -> Result<bool> {
    let value = ctx.js.evaluate(expression)?;
    Ok(is_truthy(&value))
}

/// Builds the synthetic body scenario that records loop iterations.
fn iterations_body(step: &Step, iterations: Vec<Step>) -> Scenario {
    Scenario::new(step.text.clone(), step.source_ref.clone())
        .with_tags(vec![Tag::new("Synthetic", step.source_ref.clone())])
        .with_steps(iterations)
}

fn inner_step(step: &Step, text: &str, iteration: usize) -> Step {
    let mut inner = step.copy_fresh();
    inner.text = text.to_string();
    inner.keyword = step.keyword.clone();
    inner.params.push(("iteration.number".to_string(), iteration.to_string()));
    inner
}

/// `doStep if <name> is [not] defined`: the inner step runs only when
/// the binding test holds; otherwise the composite abstains.
pub fn execute_if_defined(
    ctx: &mut EvalContext,
    step: &Step,
    name: &str,
    negate: bool,
    do_text: &str,
    eval: &mut DoStepEval,
) -> Result<Step> {
    let defined = crate::binding::kind_of_binding(&ctx.scopes, name).is_some();
    let satisfied = defined != negate;
    if !satisfied && !ctx.dry_run() {
        return Ok(step.clone().with_status(EvalStatus::abstained()));
    }
    let evaluated = eval(ctx, inner_step(step, do_text, 1))?;
    let status = evaluated.eval_status.clone();
    Ok(step
        .clone()
        .with_stepdef(iterations_body(step, vec![evaluated]))
        .with_status(status))
}

/// `doStep if "<js>"`.
pub fn execute_if_condition(
    ctx: &mut EvalContext,
    step: &Step,
    expression: &str,
    do_text: &str,
    eval: &mut DoStepEval,
) -> Result<Step> {
    let satisfied = if ctx.dry_run() {
        true
    } else {
        js_condition(ctx, expression)?
    };
    if !satisfied {
        return Ok(step.clone().with_status(EvalStatus::abstained()));
    }
    let evaluated = eval(ctx, inner_step(step, do_text, 1))?;
    let status = evaluated.eval_status.clone();
    Ok(step
        .clone()
        .with_stepdef(iterations_body(step, vec![evaluated]))
        .with_status(status))
}

/// `doStep while "<js>"` tests before each iteration; `until` runs the
/// body first and tests afterwards. Both are bounded by the configured
/// maximum and pause for the configured delay between iterations.
pub fn execute_loop(
    ctx: &mut EvalContext,
    step: &Step,
    expression: &str,
    do_text: &str,
    until: bool,
    eval: &mut DoStepEval,
) -> Result<Step> {
    let max_iterations = ctx.settings.max_loop_iterations.max(1);
    let delay = ctx.settings.loop_delay;
    let mut iterations: Vec<Step> = Vec::new();
    let mut satisfied = false;

    for iteration in 1..=max_iterations {
        ctx.check_deadline()?;
        if ctx.dry_run() {
            // One pass to validate the body, no condition evaluation.
            iterations.push(eval(ctx, inner_step(step, do_text, iteration))?);
            satisfied = true;
            break;
        }
        if !until && !js_condition(ctx, expression)? {
            satisfied = true;
            break;
        }
        ctx.scopes.push_scope(RECORD_SCOPE);
        ctx.scopes.set("iteration.number", iteration.to_string());
        let evaluated = eval(ctx, inner_step(step, do_text, iteration));
        ctx.scopes.pop_scope();
        let evaluated = evaluated?;
        let failed = evaluated.eval_status.is_failed();
        iterations.push(evaluated);
        if failed {
            break;
        }
        if until && js_condition(ctx, expression)? {
            satisfied = true;
            break;
        }
        if iteration < max_iterations && !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    let mut status = aggregate(iterations.iter().map(|s| &s.eval_status), false);
    if !satisfied && !status.is_failed() {
        status = EvalStatus::Failed {
            nanos: status.nanos(),
            error: format!(
                "condition '{}' not satisfied after {} iteration(s)",
                expression, max_iterations
            ),
        };
    }
    Ok(step
        .clone()
        .with_stepdef(iterations_body(step, iterations))
        .with_status(status))
}

/// `doStep for each <element> in "<source>" delimited by "<delimiter>"`.
pub fn execute_for_each(
    ctx: &mut EvalContext,
    step: &Step,
    do_text: &str,
    element: &str,
    source: &str,
    delimiter: &str,
    eval: &mut DoStepEval,
) -> Result<Step> {
    let elements: Vec<String> = if source.is_empty() {
        Vec::new()
    } else {
        source.split(delimiter).map(str::to_string).collect()
    };
    if elements.is_empty() {
        return Ok(step.clone().with_status(EvalStatus::abstained()));
    }

    let mut iterations = Vec::with_capacity(elements.len());
    for (index, value) in elements.iter().enumerate() {
        ctx.check_deadline()?;
        ctx.scopes.push_scope(RECORD_SCOPE);
        ctx.scopes.set(format!("<{}>", element), value.clone());
        ctx.scopes.set(element, value.clone());
        ctx.scopes.set("iteration.number", (index + 1).to_string());
        let evaluated = eval(ctx, inner_step(step, do_text, index + 1));
        ctx.scopes.pop_scope();
        let evaluated = evaluated?;
        let failed = evaluated.eval_status.is_failed();
        iterations.push(evaluated);
        if failed || ctx.dry_run() {
            break;
        }
    }

    let status = aggregate(iterations.iter().map(|s| &s.eval_status), false);
    Ok(step
        .clone()
        .with_stepdef(iterations_body(step, iterations))
        .with_status(status))
}

/// `@ForEach` + `@DataTable` StepDef invocation: one call per record,
/// each in a fresh record scope binding the record's columns and
/// `record.number`.
pub fn for_each_table_records(
    ctx: &mut EvalContext,
    step: &Step,
    annotation: Option<&str>,
    mut call: impl FnMut(&mut EvalContext, usize) -> Result<Step>,
) -> Result<Step> {
    let table = DataTable::parse(annotation, &step.table)?;
    let records = table.records();
    let total = records.len();
    let mut iterations = Vec::with_capacity(total);
    for (index, record) in records.into_iter().enumerate() {
        ctx.check_deadline()?;
        ctx.scopes.push_scope(RECORD_SCOPE);
        for (name, value) in &record {
            ctx.scopes.set(format!("data[{}]", name), value.clone());
            ctx.scopes.set(name.clone(), value.clone());
        }
        ctx.scopes.set("record.number", (index + 1).to_string());
        let evaluated = call(ctx, index + 1);
        ctx.scopes.pop_scope();
        let evaluated = evaluated?;
        let failed = evaluated.eval_status.is_failed();
        iterations.push(evaluated);
        if failed || ctx.dry_run() {
            break;
        }
    }
    let status = aggregate(iterations.iter().map(|s| &s.eval_status), false);
    Ok(step
        .clone()
        .with_stepdef(iterations_body(step, iterations))
        .with_status(status))
}
