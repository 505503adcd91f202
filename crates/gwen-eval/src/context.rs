//! The per-unit evaluation context.
//!
//! An [`EvalContext`] bundles the scope stack, the loaded StepDef
//! library, the event bus, the collaborator back-ends and the pending
//! attachment queue. It is owned by exactly one worker; parallel units
//! never share a context. A reused context (interactive mode) is
//! `reset` at the configured state level between units.

use crate::bail_eval;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use rustc_hash::FxHashMap;
use gwen_syntax::ast::Attachment;
use gwen_syntax::{Scenario, Spec};

use crate::binding::{JsEngine, NullJsEngine, ProcessRunner, ShellRunner};
use crate::error::ErrorKind;
use crate::events::NodeEventBus;
use crate::scope::ScopeStack;
use crate::settings::Settings;

/// Worker-owned evaluation state.
pub struct EvalContext {
    pub settings: Settings,
    pub scopes: ScopeStack,
    /// StepDefs by name, read-only after meta load.
    pub stepdefs: FxHashMap<String, Scenario>,
    pub events: NodeEventBus,
    pub js: Arc<dyn JsEngine>,
    pub runner: Arc<dyn ProcessRunner>,
    /// Attachments accumulated since the last step finalised.
    pending_attachments: Vec<Attachment>,
    attachment_count: usize,
    /// Hard deadline for the current unit, when configured.
    pub deadline: Option<Instant>,
}

impl EvalContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            scopes: ScopeStack::new(),
            stepdefs: FxHashMap::default(),
            events: NodeEventBus::new(),
            js: Arc::new(NullJsEngine),
            runner: Arc::new(ShellRunner),
            pending_attachments: Vec::new(),
            attachment_count: 0,
            deadline: None,
        }
    }

    /// Builder: plug in a JavaScript engine.
    pub fn with_js_engine(mut self, js: Arc<dyn JsEngine>) -> Self {
        self.js = js;
        self
    }

    /// Builder: plug in an external-process runner.
    pub fn with_process_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Arms the per-unit deadline from the settings.
    pub fn start_unit_clock(&mut self) {
        self.deadline = self
            .settings
            .unit_timeout
            .map(|timeout| Instant::now() + timeout);
    }

    /// Errors once the unit deadline has passed.
    pub fn check_deadline(&self) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                bail_eval!(ErrorKind::Interrupted, "unit timed out");
            }
        }
        Ok(())
    }

    /// Loads every StepDef declared by a spec (typically a meta spec)
    /// into the library. Redeclaring a name is ambiguous.
    pub fn load_stepdefs(&mut self, spec: &Spec) -> Result<()> {
        for stepdef in spec.stepdefs() {
            if let Some(existing) = self.stepdefs.get(&stepdef.name) {
                // Re-loading the same declaration is fine (shared
                // contexts reload metas); a second declaration from a
                // different location is not.
                let same_origin = existing.source_ref.uri == stepdef.source_ref.uri
                    && existing.source_ref.line == stepdef.source_ref.line;
                if !same_origin {
                    bail_eval!(
                        ErrorKind::Ambiguous,
                        "StepDef '{}' is declared more than once",
                        stepdef.name
                    );
                }
            }
            self.stepdefs
                .insert(stepdef.name.clone(), stepdef.clone());
        }
        Ok(())
    }

    /// Looks up a StepDef by the exact interpolated step text.
    pub fn lookup_stepdef(&self, text: &str) -> Option<&Scenario> {
        self.stepdefs.get(text)
    }

    /// Queues an attachment for the currently evaluating step.
    pub fn add_attachment(&mut self, name: impl Into<String>, file: PathBuf) {
        self.attachment_count += 1;
        self.pending_attachments.push((name.into(), file));
    }

    /// True if an attachment with the given name is pending.
    pub fn has_attachment(&self, name: &str) -> bool {
        self.pending_attachments.iter().any(|(n, _)| n == name)
    }

    /// Moves the pending attachments onto the finalised step.
    pub fn drain_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending_attachments)
    }

    /// Total attachments queued over the context's lifetime, used for
    /// report file numbering.
    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    /// Resets scopes and pending attachments between units at the
    /// configured state level. The StepDef library is kept: lookup is
    /// read-only after meta load.
    pub fn reset(&mut self) {
        self.scopes.reset(self.settings.state_level);
        self.pending_attachments.clear();
        self.deadline = None;
    }
}
