//! String interpolation.
//!
//! Two placeholder syntaxes are resolved: `${name}` looks up properties
//! and scoped attributes, `$<name>` looks up StepDef parameters (stored
//! under the key `<name>`). Placeholders nest freely and the innermost
//! resolves first, so `${a-${b}}` and `$<p-${q}>` work. Resolved values
//! are themselves interpolated, so one pass with a total lookup leaves
//! no placeholder behind.

use crate::bail_eval;
use anyhow::Result;

use crate::error::ErrorKind;

/// A name-to-value resolver. Parameter lookups receive the key wrapped
/// in angle brackets (`<name>`), property lookups the bare name.
pub type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

const MAX_DEPTH: usize = 32;

/// How a full pass treats a placeholder the lookup cannot resolve.
#[derive(Clone, Copy, PartialEq)]
enum OnUnresolved {
    /// Raise UnboundAttribute.
    Error,
    /// Dry-run: decorate `$<name>` to `$[param:name]`, keep `${…}`.
    Decorate,
    /// Keep both forms as written for a later retry.
    Keep,
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Full(OnUnresolved),
    ParamsOnly,
}

/// Fully interpolates `input`; unresolved placeholders are an error.
pub fn interpolate_string(input: &str, lookup: &Lookup) -> Result<String> {
    interpolate(input, lookup, Mode::Full(OnUnresolved::Error), 0)
}

/// Dry-run interpolation: unresolved `$<name>` placeholders are
/// decorated to `$[param:name]` and unresolved `${…}` is left as
/// written so it can be retried at evaluation time.
pub fn interpolate_string_dry_run(input: &str, lookup: &Lookup) -> Result<String> {
    interpolate(input, lookup, Mode::Full(OnUnresolved::Decorate), 0)
}

/// Lenient interpolation: everything resolvable is substituted and
/// unresolved placeholders of both forms stay as written. Composite
/// steps use this so loop variables can resolve per iteration.
pub fn interpolate_string_lenient(input: &str, lookup: &Lookup) -> Result<String> {
    interpolate(input, lookup, Mode::Full(OnUnresolved::Keep), 0)
}

/// Restricted pass that expands only `$<…>` placeholders. `${…}` is
/// left untouched, and a missing parameter is an error unless it
/// appears inside a composite `$<${…}>` (skipped, to be completed once
/// properties resolve).
pub fn interpolate_params(input: &str, lookup: &Lookup) -> Result<String> {
    interpolate(input, lookup, Mode::ParamsOnly, 0)
}

fn interpolate(input: &str, lookup: &Lookup, mode: Mode, depth: usize) -> Result<String> {
    if depth > MAX_DEPTH {
        bail_eval!(
            ErrorKind::Interpolation,
            "circular reference while interpolating '{}'",
            input
        );
    }

    let chars: Vec<char> = input.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let (open, close) = if starts_with_at(&chars, i, "${") {
            ('{', '}')
        } else if starts_with_at(&chars, i, "$<") {
            ('<', '>')
        } else {
            out.push(chars[i]);
            i += 1;
            continue;
        };

        let Some(end) = matching_close(&chars, i + 2, open, close) else {
            // No matching close: the '$' is literal text.
            out.push(chars[i]);
            i += 1;
            continue;
        };
        let raw: String = chars[i + 2..end].iter().collect();

        if open == '{' {
            match mode {
                Mode::ParamsOnly => {
                    // Property placeholders pass through untouched.
                    out.push_str("${");
                    out.push_str(&raw);
                    out.push('}');
                }
                Mode::Full(on_unresolved) => {
                    let name = interpolate(&raw, lookup, mode, depth + 1)?;
                    match lookup(&name) {
                        Some(value) => {
                            out.push_str(&interpolate(&value, lookup, mode, depth + 1)?)
                        }
                        None if on_unresolved != OnUnresolved::Error => {
                            out.push_str("${");
                            out.push_str(&name);
                            out.push('}');
                        }
                        None => bail_eval!(
                            ErrorKind::UnboundAttribute,
                            "unbound attribute '{}'",
                            name
                        ),
                    }
                }
            }
        } else {
            match mode {
                Mode::ParamsOnly if raw.contains("${") => {
                    // Composite `$<${…}>`: skip, the property pass will
                    // complete the name first.
                    out.push_str("$<");
                    out.push_str(&raw);
                    out.push('>');
                }
                Mode::ParamsOnly => {
                    let name = interpolate(&raw, lookup, mode, depth + 1)?;
                    match lookup(&format!("<{}>", name)) {
                        Some(value) => {
                            out.push_str(&interpolate(&value, lookup, mode, depth + 1)?)
                        }
                        None => bail_eval!(
                            ErrorKind::UnboundAttribute,
                            "unbound parameter '<{}>'",
                            name
                        ),
                    }
                }
                Mode::Full(on_unresolved) => {
                    let name = interpolate(&raw, lookup, mode, depth + 1)?;
                    match lookup(&format!("<{}>", name)) {
                        Some(value) => {
                            out.push_str(&interpolate(&value, lookup, mode, depth + 1)?)
                        }
                        None => match on_unresolved {
                            OnUnresolved::Decorate => {
                                out.push_str(&format!("$[param:{}]", name));
                            }
                            OnUnresolved::Keep => {
                                out.push_str("$<");
                                out.push_str(&name);
                                out.push('>');
                            }
                            OnUnresolved::Error => bail_eval!(
                                ErrorKind::UnboundAttribute,
                                "unbound parameter '<{}>'",
                                name
                            ),
                        },
                    }
                }
            }
        }
        i = end + 1;
    }

    Ok(out)
}

fn starts_with_at(chars: &[char], i: usize, prefix: &str) -> bool {
    let mut iter = prefix.chars();
    let mut j = i;
    loop {
        match iter.next() {
            None => return true,
            Some(expected) => {
                if chars.get(j) != Some(&expected) {
                    return false;
                }
                j += 1;
            }
        }
    }
}

/// Finds the close matching the placeholder opened just before `from`,
/// accounting for nested placeholders of both kinds.
fn matching_close(chars: &[char], from: usize, open: char, close: char) -> Option<usize> {
    let mut stack = vec![open];
    let mut i = from;
    while i < chars.len() {
        if starts_with_at(chars, i, "${") {
            stack.push('{');
            i += 2;
            continue;
        }
        if starts_with_at(chars, i, "$<") {
            stack.push('<');
            i += 2;
            continue;
        }
        let ch = chars[i];
        let top = *stack.last().expect("stack never empties before return");
        if (ch == '}' && top == '{') || (ch == '>' && top == '<') {
            stack.pop();
            if stack.is_empty() {
                return if ch == close { Some(i) } else { None };
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn resolves_nested_properties_innermost_first() {
        let lookup = lookup_from(&[("b", "0"), ("a-0", "world")]);
        let result = interpolate_string("hello ${a-${b}}", &lookup).unwrap();
        assert_eq!(result, "hello world");
    }

    #[test]
    fn resolves_params_and_properties_together() {
        let lookup = lookup_from(&[("<p>", "1"), ("q", "2")]);
        let result = interpolate_string("x $<p> ${q}", &lookup).unwrap();
        assert_eq!(result, "x 1 2");
    }

    #[test]
    fn dry_run_decorates_unresolved_params_only() {
        let lookup = |_: &str| None;
        let result = interpolate_string_dry_run("x $<p> ${q}", &lookup).unwrap();
        assert_eq!(result, "x $[param:p] ${q}");
    }

    #[test]
    fn interleaved_nesting_resolves() {
        let lookup = lookup_from(&[("q", "name"), ("<p-name>", "done")]);
        let result = interpolate_string("got $<p-${q}>", &lookup).unwrap();
        assert_eq!(result, "got done");
    }

    #[test]
    fn resolved_values_are_interpolated_too() {
        let lookup = lookup_from(&[("a", "${b}"), ("b", "deep")]);
        let result = interpolate_string("${a}", &lookup).unwrap();
        assert_eq!(result, "deep");
    }

    #[test]
    fn unbound_attribute_is_an_error() {
        let lookup = |_: &str| None;
        let err = interpolate_string("${missing}", &lookup).unwrap_err();
        assert_eq!(crate::error::kind_of(&err), ErrorKind::UnboundAttribute);
    }

    #[test]
    fn circular_reference_is_detected() {
        let lookup = lookup_from(&[("a", "${a}")]);
        let err = interpolate_string("${a}", &lookup).unwrap_err();
        assert_eq!(crate::error::kind_of(&err), ErrorKind::Interpolation);
    }

    #[test]
    fn plus_before_digit_in_literal_is_preserved() {
        let lookup = lookup_from(&[("n", "414")]);
        let result = interpolate_string("dial \"+61${n}\"", &lookup).unwrap();
        assert_eq!(result, "dial \"+61414\"");
    }

    #[test]
    fn unmatched_dollar_is_literal() {
        let lookup = |_: &str| None;
        assert_eq!(interpolate_string("cost $5", &lookup).unwrap(), "cost $5");
        assert_eq!(
            interpolate_string("open ${brace", &lookup).unwrap(),
            "open ${brace"
        );
    }

    #[test]
    fn lenient_pass_keeps_unresolved_placeholders() {
        let lookup = lookup_from(&[("a", "1")]);
        let result = interpolate_string_lenient("${a} ${b} $<p>", &lookup).unwrap();
        assert_eq!(result, "1 ${b} $<p>");
    }

    #[test]
    fn params_pass_expands_only_params() {
        let lookup = lookup_from(&[("<p>", "1"), ("q", "2")]);
        let result = interpolate_params("x $<p> ${q}", &lookup).unwrap();
        assert_eq!(result, "x 1 ${q}");
    }

    #[test]
    fn params_pass_errors_on_missing_param() {
        let lookup = |_: &str| None;
        let err = interpolate_params("$<missing>", &lookup).unwrap_err();
        assert_eq!(crate::error::kind_of(&err), ErrorKind::UnboundAttribute);
    }

    #[test]
    fn params_pass_skips_composite_placeholders() {
        let lookup = |_: &str| None;
        let result = interpolate_params("x $<${q}>", &lookup).unwrap();
        assert_eq!(result, "x $<${q}>");
    }

    #[test]
    fn full_pass_is_idempotent_with_total_lookup() {
        let lookup = lookup_from(&[("a", "1"), ("<p>", "2")]);
        let once = interpolate_string("${a} $<p>", &lookup).unwrap();
        assert!(!once.contains("${") && !once.contains("$<"));
        let twice = interpolate_string(&once, &lookup).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn deterministic_across_runs() {
        let lookup = lookup_from(&[("a", "x"), ("b", "y"), ("<p>", "z")]);
        let input = "${a}-${b}-$<p>-${a}";
        let first = interpolate_string(input, &lookup).unwrap();
        for _ in 0..10 {
            assert_eq!(interpolate_string(input, &lookup).unwrap(), first);
        }
    }
}
