//! Layered key/value state.
//!
//! The environment is a stack of named scopes: `top` (global), then
//! `feature`, `rule`, `scenario`, one parameter scope per StepDef call
//! (nested for nested calls), and ephemeral `record` scopes for
//! for-each iterations. Lookups see the innermost binding first.

use crate::bail_eval;
use rustc_hash::FxHashMap;

use crate::error::ErrorKind;
use crate::settings::StateLevel;
use anyhow::Result;

/// The scope every stack starts with.
pub const TOP_SCOPE: &str = "top";
/// The feature-level scope pushed per unit.
pub const FEATURE_SCOPE: &str = "feature";
/// The rule-level scope.
pub const RULE_SCOPE: &str = "rule";
/// The scenario-level scope.
pub const SCENARIO_SCOPE: &str = "scenario";
/// Prefix for StepDef parameter scopes; the suffix is the StepDef name.
pub const PARAMS_SCOPE_PREFIX: &str = "params:";
/// The ephemeral per-iteration scope.
pub const RECORD_SCOPE: &str = "record";

/// One named layer of bindings.
#[derive(Debug, Clone)]
pub struct Scope {
    pub name: String,
    entries: FxHashMap<String, String>,
}

impl Scope {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: FxHashMap::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A stack of named scopes with innermost-first visibility.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    /// A fresh stack holding only the `top` scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(TOP_SCOPE)],
        }
    }

    /// Pushes a new innermost scope.
    pub fn push_scope(&mut self, name: impl Into<String>) {
        self.scopes.push(Scope::new(name));
    }

    /// Pops the innermost scope. The `top` scope is never popped.
    pub fn pop_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// The innermost scope's name.
    pub fn current_scope(&self) -> &str {
        &self.scopes[self.scopes.len() - 1].name
    }

    /// Binds `name` in the innermost scope.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let last = self.scopes.len() - 1;
        self.scopes[last].set(name, value);
    }

    /// Binds `name` in the named scope if it is on the stack, falling
    /// back to the innermost scope.
    pub fn set_in(&mut self, scope: &str, name: impl Into<String>, value: impl Into<String>) {
        match self.scopes.iter_mut().rev().find(|s| s.name == scope) {
            Some(scope) => scope.set(name, value),
            None => self.set(name, value),
        }
    }

    /// Binds an attribute in the innermost durable scope, skipping
    /// ephemeral parameter and record scopes so the binding survives
    /// the StepDef call or loop iteration that created it.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let index = self
            .scopes
            .iter()
            .rposition(|s| !s.name.starts_with(PARAMS_SCOPE_PREFIX) && s.name != RECORD_SCOPE)
            .unwrap_or(0);
        self.scopes[index].set(name, value);
    }

    /// Innermost-first lookup.
    pub fn get_opt(&self, name: &str) -> Option<&str> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Innermost-first lookup; unbound names are an error.
    pub fn get(&self, name: &str) -> Result<String> {
        match self.get_opt(name) {
            Some(value) => Ok(value.to_string()),
            None => bail_eval!(
                ErrorKind::UnboundAttribute,
                "'{}' is not bound in scope '{}'",
                name,
                self.current_scope()
            ),
        }
    }

    /// Removes `name` from the innermost scope only.
    pub fn clear(&mut self, name: &str) {
        let last = self.scopes.len() - 1;
        self.scopes[last].entries.remove(name);
    }

    /// True if a scope with the given name is on the stack.
    pub fn contains_scope(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.name == name)
    }

    /// The flattened view: every visible binding with its owning scope,
    /// innermost shadowing outermost, sorted by name.
    pub fn visible(&self) -> Vec<(String, String, String)> {
        let mut seen: FxHashMap<&str, (&str, &str)> = FxHashMap::default();
        for scope in self.scopes.iter().rev() {
            for (name, value) in &scope.entries {
                seen.entry(name.as_str())
                    .or_insert((scope.name.as_str(), value.as_str()));
            }
        }
        let mut visible: Vec<(String, String, String)> = seen
            .into_iter()
            .map(|(name, (scope, value))| (scope.to_string(), name.to_string(), value.to_string()))
            .collect();
        visible.sort_by(|a, b| a.1.cmp(&b.1));
        visible
    }

    /// Renders the visible bindings for error-detail attachments.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (scope, name, value) in self.visible() {
            out.push_str(&format!("{} : {} = {}\n", scope, name, value));
        }
        out
    }

    /// Discards scopes according to the configured state level:
    /// `Feature` truncates to `top`, `Scenario` keeps `top`, `feature`
    /// and any enclosing `rule`, `StepDef` pops only parameter and
    /// record scopes.
    pub fn reset(&mut self, level: StateLevel) {
        match level {
            StateLevel::Feature => self.scopes.truncate(1),
            StateLevel::Scenario => {
                let keep = self
                    .scopes
                    .iter()
                    .rposition(|s| s.name == FEATURE_SCOPE || s.name == RULE_SCOPE)
                    .map(|i| i + 1)
                    .unwrap_or(1);
                self.scopes.truncate(keep);
            }
            StateLevel::StepDef => {
                while self
                    .scopes
                    .last()
                    .map(|s| {
                        s.name.starts_with(PARAMS_SCOPE_PREFIX) || s.name == RECORD_SCOPE
                    })
                    .unwrap_or(false)
                {
                    self.scopes.pop();
                }
            }
        }
    }

    /// Number of scopes on the stack.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
