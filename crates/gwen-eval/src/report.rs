//! The report generator contract and persisted-state layout.
//!
//! Formatters (HTML, JUnit, JSON emitters) live outside the core; this
//! module fixes the [`Reporter`] lifecycle they implement, the on-disk
//! layout under the report directory, and a built-in `sysout` reporter
//! that prints aligned status lines.

use std::path::{Path, PathBuf};

use anyhow::Result;

use gwen_syntax::{EvalStatus, Scenario, Spec, Step};

use crate::engine::Engine;
use crate::events::{NodeEvent, NodeEventListener};
use crate::launcher::{ResultsSummary, SpecResult};
use crate::stream::FeatureUnit;

/// The report output formats the CLI accepts. Only `sysout` ships with
/// the core; the others are implemented by formatter collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Html,
    Junit,
    Json,
    Rp,
    Sysout,
}

impl ReportFormat {
    pub fn parse(name: &str) -> Option<ReportFormat> {
        match name {
            "html" => Some(ReportFormat::Html),
            "junit" => Some(ReportFormat::Junit),
            "json" => Some(ReportFormat::Json),
            "rp" => Some(ReportFormat::Rp),
            "sysout" => Some(ReportFormat::Sysout),
            _ => None,
        }
    }

    /// The `summary.<ext>` file name for this format, when it has one.
    pub fn summary_file(&self) -> Option<&'static str> {
        match self {
            ReportFormat::Html => Some("summary.html"),
            ReportFormat::Junit => Some("summary.xml"),
            ReportFormat::Json => Some("summary.json"),
            ReportFormat::Rp | ReportFormat::Sysout => None,
        }
    }
}

/// The reporter lifecycle: `init`, one `report_detail` per finished
/// unit, `report_summary`, then `close`. Reporters receive finalised,
/// immutable results; parallel workers may call `report_detail`
/// concurrently, so implementations buffer per unit (see
/// [`UnitBuffer`]) or stay thread-safe.
pub trait Reporter: Send {
    fn init(&mut self, _engine: &Engine) -> Result<()> {
        Ok(())
    }

    /// Reports one unit; may return the path of a written detail file.
    fn report_detail(&mut self, unit: &FeatureUnit, result: &SpecResult)
        -> Result<Option<PathBuf>>;

    fn report_summary(&mut self, _summary: &ResultsSummary) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _engine: &Engine, _status: &EvalStatus) -> Result<()> {
        Ok(())
    }
}

/// A per-unit event buffer for reporters that subscribe to the node
/// event bus: events accumulate here and are drained when the unit's
/// detail is reported, keeping cross-unit interleaving out of the
/// reporter.
#[derive(Default)]
pub struct UnitBuffer {
    events: Vec<NodeEvent>,
}

impl UnitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.events)
    }
}

impl NodeEventListener for UnitBuffer {
    fn on_event(&mut self, event: &NodeEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Escapes path separators and reserved characters in one node-path
/// segment for use as a file-system name.
pub fn sanitise_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            ch if ch.is_control() => '-',
            ch => ch,
        })
        .collect()
}

/// The per-feature detail directory for a node path:
/// `<report dir>/features/<sanitised path>/`.
pub fn feature_dir(report_dir: &Path, node_path: &str) -> PathBuf {
    let mut dir = report_dir.join("features");
    for segment in node_path.split('/').filter(|s| !s.is_empty()) {
        dir.push(sanitise_segment(segment));
    }
    dir
}

/// The attachment file location: `attachments/<uuid>-<n>.<ext>`.
pub fn attachment_file(report_dir: &Path, step: &Step, number: usize, original: &Path) -> PathBuf {
    let extension = original
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("txt");
    report_dir
        .join("attachments")
        .join(format!("{}-{}.{}", step.uuid, number, extension))
}

/// Copies every step attachment in a result into the report directory,
/// returning the persisted paths.
pub fn persist_attachments(report_dir: &Path, result: &SpecResult) -> Result<Vec<PathBuf>> {
    let target_dir = report_dir.join("attachments");
    std::fs::create_dir_all(&target_dir)?;
    let mut persisted = Vec::new();
    for step in all_steps(&result.spec) {
        for (number, (_, file)) in step.attachments.iter().enumerate() {
            if !file.is_file() {
                continue;
            }
            let target = attachment_file(report_dir, step, number + 1, file);
            std::fs::copy(file, &target)?;
            persisted.push(target);
        }
    }
    Ok(persisted)
}

/// Every step in an evaluated spec, including backgrounds, expanded
/// scenarios and called StepDef bodies.
pub fn all_steps(spec: &Spec) -> Vec<&Step> {
    let mut steps = Vec::new();
    if let Some(background) = &spec.background {
        steps.extend(background.steps.iter());
    }
    for scenario in spec.all_scenarios() {
        collect_scenario_steps(scenario, &mut steps);
    }
    steps
}

fn collect_scenario_steps<'a>(scenario: &'a Scenario, steps: &mut Vec<&'a Step>) {
    if let Some(background) = &scenario.background {
        steps.extend(background.steps.iter());
    }
    for step in &scenario.steps {
        collect_step(step, steps);
    }
    for examples in &scenario.examples {
        for expanded in &examples.scenarios {
            collect_scenario_steps(expanded, steps);
        }
    }
}

fn collect_step<'a>(step: &'a Step, steps: &mut Vec<&'a Step>) {
    steps.push(step);
    if let Some(stepdef) = &step.stepdef {
        for inner in &stepdef.steps {
            collect_step(inner, steps);
        }
    }
}

/// Prints one aligned status line per unit and a final summary block.
pub struct SysoutReporter;

impl Reporter for SysoutReporter {
    fn report_detail(
        &mut self,
        _unit: &FeatureUnit,
        result: &SpecResult,
    ) -> Result<Option<PathBuf>> {
        let name = &result.unit_name;
        let base_len = name.chars().count();
        let dots = ".".repeat(if base_len < 60 { 60 - base_len } else { 1 });
        println!("{}{}{}", name, dots, result.status.keyword());
        Ok(None)
    }

    fn report_summary(&mut self, summary: &ResultsSummary) -> Result<()> {
        println!();
        for (keyword, count) in summary.feature_counts() {
            println!("  {} {} feature(s)", count, keyword);
        }
        println!();
        println!("{}", summary.status().keyword());
        Ok(())
    }
}
