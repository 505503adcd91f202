//! Pluggable binding back-ends.
//!
//! A binding associates a name with a way of producing a string value:
//! a literal, a JavaScript expression, a JavaScript function applied to
//! arguments, a file's content, or a system process's output. Bindings
//! persist under deterministic keys in the scope stack so they survive
//! interpolation and can be introspected:
//!
//! | Kind | Keys |
//! |------|------|
//! | Value | `name` |
//! | JS | `name/javascript` |
//! | JSFunction | `name/function/jsRef`, `name/function/args`, `name/function/delimiter` |
//! | File | `name/file` |
//! | Sysproc | `name/sysproc` |
//! | LoadStrategy | `name/loadStrategy`, cache under `name/loaded` |

use crate::bail_eval;
use std::process::Command;

use anyhow::{Context, Result};

use crate::error::ErrorKind;
use crate::scope::ScopeStack;

/// The kinds of binding back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Value,
    Js,
    JsFunction,
    File,
    Sysproc,
}

/// The JavaScript engine collaborator. The engine itself is out of
/// scope; the default [`NullJsEngine`] reports every evaluation as
/// unavailable and tests plug in closures via [`FnJsEngine`].
pub trait JsEngine: Send + Sync {
    fn evaluate(&self, expression: &str) -> Result<String>;
}

/// A [`JsEngine`] that cannot evaluate anything.
pub struct NullJsEngine;

impl JsEngine for NullJsEngine {
    fn evaluate(&self, expression: &str) -> Result<String> {
        bail_eval!(
            ErrorKind::JsExecution,
            "no JavaScript engine is configured (evaluating '{}')",
            expression
        )
    }
}

/// A [`JsEngine`] backed by a closure.
pub struct FnJsEngine<F>(F);

impl<F> FnJsEngine<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> JsEngine for FnJsEngine<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn evaluate(&self, expression: &str) -> Result<String> {
        (self.0)(expression)
    }
}

/// The external-process collaborator.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, command: &str) -> Result<String>;
}

/// Runs commands through `sh -c`, returning trimmed stdout.
pub struct ShellRunner;

impl ProcessRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<String> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .with_context(|| format!("failed to execute: {}", command))?;
        if !output.status.success() {
            bail_eval!(
                ErrorKind::SysprocExecution,
                "command failed: {}\n{}",
                command,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Binds a literal value.
pub fn bind_value(scopes: &mut ScopeStack, name: &str, value: &str) {
    scopes.set_attr(name, value);
}

/// Binds a JavaScript expression.
pub fn bind_js(scopes: &mut ScopeStack, name: &str, expression: &str) {
    scopes.set_attr(format!("{}/javascript", name), expression);
}

/// Binds a JavaScript function application. `js_ref` must itself carry
/// a JS binding; `delimiter` splits `args` into individual arguments at
/// resolve time.
pub fn bind_js_function(
    scopes: &mut ScopeStack,
    name: &str,
    js_ref: &str,
    args: &str,
    delimiter: Option<&str>,
) {
    scopes.set_attr(format!("{}/function/jsRef", name), js_ref);
    scopes.set_attr(format!("{}/function/args", name), args);
    if let Some(delimiter) = delimiter {
        scopes.set_attr(format!("{}/function/delimiter", name), delimiter);
    }
}

/// Binds a file-content lookup.
pub fn bind_file(scopes: &mut ScopeStack, name: &str, path: &str) {
    scopes.set_attr(format!("{}/file", name), path);
}

/// Binds a system-process invocation.
pub fn bind_sysproc(scopes: &mut ScopeStack, name: &str, command: &str) {
    scopes.set_attr(format!("{}/sysproc", name), command);
}

/// Declares the load strategy of a binding.
pub fn bind_load_strategy(scopes: &mut ScopeStack, name: &str, lazy: bool) {
    scopes.set_attr(
        format!("{}/loadStrategy", name),
        if lazy { "lazy" } else { "eager" },
    );
}

/// Pre-resolves and caches a binding declared lazy; a no-op for eager
/// bindings and for lazy ones already loaded.
pub fn bind_if_lazy(
    scopes: &mut ScopeStack,
    name: &str,
    js: &dyn JsEngine,
    runner: &dyn ProcessRunner,
) -> Result<()> {
    let lazy = scopes
        .get_opt(&format!("{}/loadStrategy", name))
        .map(|strategy| strategy == "lazy")
        .unwrap_or(false);
    if !lazy || scopes.get_opt(&format!("{}/loaded", name)).is_some() {
        return Ok(());
    }
    resolve(scopes, name, js, runner, false)?;
    Ok(())
}

/// The binding kind a name resolves to, if any. Cached lazy values and
/// plain values take precedence over deferred back-ends.
pub fn kind_of_binding(scopes: &ScopeStack, name: &str) -> Option<BindingKind> {
    if scopes.get_opt(name).is_some() {
        return Some(BindingKind::Value);
    }
    if scopes.get_opt(&format!("{}/javascript", name)).is_some() {
        return Some(BindingKind::Js);
    }
    if scopes.get_opt(&format!("{}/function/jsRef", name)).is_some() {
        return Some(BindingKind::JsFunction);
    }
    if scopes.get_opt(&format!("{}/file", name)).is_some() {
        return Some(BindingKind::File);
    }
    if scopes.get_opt(&format!("{}/sysproc", name)).is_some() {
        return Some(BindingKind::Sysproc);
    }
    None
}

/// Resolves a binding to its value.
///
/// In dry-run mode the deferred back-ends are not executed; a
/// `$[dryRun:…]` marker is returned instead so interpolation can
/// complete without side effects.
pub fn resolve(
    scopes: &mut ScopeStack,
    name: &str,
    js: &dyn JsEngine,
    runner: &dyn ProcessRunner,
    dry_run: bool,
) -> Result<String> {
    if let Some(cached) = scopes.get_opt(&format!("{}/loaded", name)) {
        return Ok(cached.to_string());
    }
    let Some(kind) = kind_of_binding(scopes, name) else {
        bail_eval!(ErrorKind::UnboundBinding, "'{}' is not bound", name);
    };

    let value = match kind {
        BindingKind::Value => scopes.get(name)?,
        BindingKind::Js => {
            let expression = scopes.get(&format!("{}/javascript", name))?;
            if dry_run {
                return Ok("$[dryRun:javascript]".to_string());
            }
            js.evaluate(&expression)?
        }
        BindingKind::JsFunction => {
            if dry_run {
                return Ok("$[dryRun:jsFunction]".to_string());
            }
            resolve_js_function(scopes, name, js, runner)?
        }
        BindingKind::File => {
            let path = scopes.get(&format!("{}/file", name))?;
            if dry_run {
                return Ok("$[dryRun:file]".to_string());
            }
            std::fs::read_to_string(&path)
                .map(|content| content.trim_end().to_string())
                .with_context(|| format!("failed to read bound file: {}", path))?
        }
        BindingKind::Sysproc => {
            let command = scopes.get(&format!("{}/sysproc", name))?;
            if dry_run {
                return Ok("$[dryRun:sysproc]".to_string());
            }
            runner.run(&command)?
        }
    };

    let lazy = scopes
        .get_opt(&format!("{}/loadStrategy", name))
        .map(|strategy| strategy == "lazy")
        .unwrap_or(false);
    if lazy {
        scopes.set_attr(format!("{}/loaded", name), value.clone());
    }
    Ok(value)
}

/// JSFunction delegates to JS: the referenced function body is applied
/// to the split arguments.
fn resolve_js_function(
    scopes: &mut ScopeStack,
    name: &str,
    js: &dyn JsEngine,
    runner: &dyn ProcessRunner,
) -> Result<String> {
    let js_ref = scopes.get(&format!("{}/function/jsRef", name))?;
    let args = scopes.get(&format!("{}/function/args", name))?;
    let delimiter = scopes
        .get_opt(&format!("{}/function/delimiter", name))
        .map(str::to_string);

    let arguments: Vec<String> = match &delimiter {
        Some(delimiter) => args.split(delimiter.as_str()).map(str::to_string).collect(),
        None => vec![args.clone()],
    };
    for (index, argument) in arguments.iter().enumerate() {
        if argument.is_empty() {
            bail_eval!(
                ErrorKind::MissingJsArgument,
                "argument {} of '{}' applied to '{}' is empty",
                index + 1,
                js_ref,
                name
            );
        }
    }

    let function = resolve(scopes, &js_ref, js, runner, false)?;
    let quoted: Vec<String> = arguments
        .iter()
        .map(|a| format!("\"{}\"", a.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    js.evaluate(&format!("({})({})", function, quoted.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    fn echo_js() -> impl JsEngine {
        FnJsEngine::new(|expr: &str| Ok(format!("js:{}", expr)))
    }

    #[test]
    fn value_binding_resolves_directly() {
        let mut scopes = ScopeStack::new();
        bind_value(&mut scopes, "x", "42");
        let value = resolve(&mut scopes, "x", &NullJsEngine, &ShellRunner, false).unwrap();
        assert_eq!(value, "42");
    }

    #[test]
    fn unbound_name_reports_unbound_binding() {
        let mut scopes = ScopeStack::new();
        let err = resolve(&mut scopes, "ghost", &NullJsEngine, &ShellRunner, false).unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::UnboundBinding);
    }

    #[test]
    fn js_binding_delegates_to_engine() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "now", "new Date()");
        let value = resolve(&mut scopes, "now", &echo_js(), &ShellRunner, false).unwrap();
        assert_eq!(value, "js:new Date()");
    }

    #[test]
    fn js_binding_in_dry_run_is_not_executed() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "now", "explode()");
        let value = resolve(&mut scopes, "now", &NullJsEngine, &ShellRunner, true).unwrap();
        assert_eq!(value, "$[dryRun:javascript]");
    }

    #[test]
    fn js_function_composes_arguments() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "join", "function(a,b){return a+b}");
        bind_js_function(&mut scopes, "result", "join", "x,y", Some(","));
        let value = resolve(&mut scopes, "result", &echo_js(), &ShellRunner, false).unwrap();
        assert_eq!(value, "js:(js:function(a,b){return a+b})(\"x\",\"y\")");
    }

    #[test]
    fn js_function_reports_missing_argument() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "join", "function(a,b){return a+b}");
        bind_js_function(&mut scopes, "result", "join", "x,", Some(","));
        let err = resolve(&mut scopes, "result", &echo_js(), &ShellRunner, false).unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::MissingJsArgument);
    }

    #[test]
    fn lazy_binding_caches_first_resolution() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "x", "expensive()");
        bind_load_strategy(&mut scopes, "x", true);
        let first = resolve(&mut scopes, "x", &echo_js(), &ShellRunner, false).unwrap();
        assert_eq!(first, "js:expensive()");
        // Second resolve hits the cache even with a broken engine.
        let second = resolve(&mut scopes, "x", &NullJsEngine, &ShellRunner, false).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn bind_if_lazy_preloads_only_lazy_bindings() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "eager", "e()");
        bind_js(&mut scopes, "deferred", "d()");
        bind_load_strategy(&mut scopes, "deferred", true);

        bind_if_lazy(&mut scopes, "eager", &echo_js(), &ShellRunner).unwrap();
        bind_if_lazy(&mut scopes, "deferred", &echo_js(), &ShellRunner).unwrap();

        assert!(scopes.get_opt("eager/loaded").is_none());
        assert_eq!(scopes.get_opt("deferred/loaded"), Some("js:d()"));
    }

    #[test]
    fn eager_binding_is_not_cached() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "x", "f()");
        resolve(&mut scopes, "x", &echo_js(), &ShellRunner, false).unwrap();
        assert!(scopes.get_opt("x/loaded").is_none());
    }

    #[test]
    fn file_binding_reads_content() {
        let dir = std::env::temp_dir().join("gwen-binding-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("value.txt");
        std::fs::write(&path, "from file\n").unwrap();

        let mut scopes = ScopeStack::new();
        bind_file(&mut scopes, "content", path.to_str().unwrap());
        let value = resolve(&mut scopes, "content", &NullJsEngine, &ShellRunner, false).unwrap();
        assert_eq!(value, "from file");
    }

    #[test]
    fn sysproc_binding_runs_command() {
        let mut scopes = ScopeStack::new();
        bind_sysproc(&mut scopes, "who", "echo mal");
        let value = resolve(&mut scopes, "who", &NullJsEngine, &ShellRunner, false).unwrap();
        assert_eq!(value, "mal");
    }

    #[test]
    fn kind_precedence_prefers_plain_values() {
        let mut scopes = ScopeStack::new();
        bind_js(&mut scopes, "x", "f()");
        bind_value(&mut scopes, "x", "literal");
        assert_eq!(kind_of_binding(&scopes, "x"), Some(BindingKind::Value));
    }
}
