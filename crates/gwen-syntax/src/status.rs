//! Evaluation-status algebra.
//!
//! Statuses form the ordered set
//! `Passed < Loaded < Sustained < Skipped < Pending < Disabled < Failed`.
//! The status of a composite node is the maximum status of its evaluated
//! children, except that `Sustained` is absorbed into `Passed` when the
//! parent is not a StepDef (soft assertion failures are recorded on the
//! failing step but do not fail the enclosing scenario).

use std::fmt;

/// The evaluation status of a spec node.
///
/// `Pending` is the initial status of every unevaluated step. Durations
/// are carried in nanoseconds on the statuses that represent completed
/// work.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalStatus {
    /// The node evaluated successfully. `abstained` marks conditional
    /// steps whose guard was not satisfied (zero-duration pass).
    Passed { nanos: u128, abstained: bool },
    /// A meta or data-only node was loaded without executing anything.
    Loaded,
    /// A soft assertion failed; the failure is recorded but not
    /// propagated to the parent's status.
    Sustained { nanos: u128, error: String },
    /// The node was not evaluated because an earlier sibling failed or a
    /// filter excluded it.
    Skipped,
    /// Not yet evaluated.
    Pending,
    /// Excluded by an `@Ignore` tag or a `Disabled` error.
    Disabled,
    /// Evaluation failed.
    Failed { nanos: u128, error: String },
}

impl EvalStatus {
    /// A zero-duration pass.
    pub fn passed(nanos: u128) -> Self {
        EvalStatus::Passed {
            nanos,
            abstained: false,
        }
    }

    /// A pass recorded for a conditional step whose guard did not hold.
    pub fn abstained() -> Self {
        EvalStatus::Passed {
            nanos: 0,
            abstained: true,
        }
    }

    /// Rank within the ordered status set; higher ranks dominate when
    /// aggregating.
    pub fn rank(&self) -> u8 {
        match self {
            EvalStatus::Passed { .. } => 0,
            EvalStatus::Loaded => 1,
            EvalStatus::Sustained { .. } => 2,
            EvalStatus::Skipped => 3,
            EvalStatus::Pending => 4,
            EvalStatus::Disabled => 5,
            EvalStatus::Failed { .. } => 6,
        }
    }

    /// The status keyword used in reports and summaries.
    pub fn keyword(&self) -> &'static str {
        match self {
            EvalStatus::Passed { .. } => "Passed",
            EvalStatus::Loaded => "Loaded",
            EvalStatus::Sustained { .. } => "Sustained",
            EvalStatus::Skipped => "Skipped",
            EvalStatus::Pending => "Pending",
            EvalStatus::Disabled => "Disabled",
            EvalStatus::Failed { .. } => "Failed",
        }
    }

    /// Nanoseconds spent producing this status.
    pub fn nanos(&self) -> u128 {
        match self {
            EvalStatus::Passed { nanos, .. }
            | EvalStatus::Sustained { nanos, .. }
            | EvalStatus::Failed { nanos, .. } => *nanos,
            _ => 0,
        }
    }

    /// The error message carried by a failed or sustained status.
    pub fn error(&self) -> Option<&str> {
        match self {
            EvalStatus::Sustained { error, .. } | EvalStatus::Failed { error, .. } => {
                Some(error.as_str())
            }
            _ => None,
        }
    }

    /// True for statuses that count as evaluated when aggregating.
    pub fn is_evaluated(&self) -> bool {
        !matches!(self, EvalStatus::Pending)
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, EvalStatus::Passed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EvalStatus::Failed { .. })
    }

    pub fn is_sustained(&self) -> bool {
        matches!(self, EvalStatus::Sustained { .. })
    }

    /// True when a run finishing with this status should exit zero.
    pub fn is_ok_exit(&self) -> bool {
        matches!(
            self,
            EvalStatus::Passed { .. }
                | EvalStatus::Loaded
                | EvalStatus::Sustained { .. }
                | EvalStatus::Skipped
        )
    }
}

impl fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Aggregates child statuses into a parent status.
///
/// Only evaluated children participate. The result carries the sum of
/// the children's durations. `stepdef_parent` disables the
/// Sustained-to-Passed absorption so a StepDef call reports the soft
/// failure of its body.
pub fn aggregate<'a, I>(statuses: I, stepdef_parent: bool) -> EvalStatus
where
    I: IntoIterator<Item = &'a EvalStatus>,
{
    let mut total_nanos: u128 = 0;
    let mut max: Option<&EvalStatus> = None;
    let mut any = false;

    for status in statuses {
        any = true;
        total_nanos += status.nanos();
        if !status.is_evaluated() {
            continue;
        }
        match max {
            Some(current) if current.rank() >= status.rank() => {}
            _ => max = Some(status),
        }
    }

    let Some(max) = max else {
        return if any {
            EvalStatus::Pending
        } else {
            EvalStatus::Passed {
                nanos: 0,
                abstained: false,
            }
        };
    };

    match max {
        EvalStatus::Passed { .. } => EvalStatus::passed(total_nanos),
        EvalStatus::Loaded => EvalStatus::Loaded,
        EvalStatus::Sustained { error, .. } => {
            if stepdef_parent {
                EvalStatus::Sustained {
                    nanos: total_nanos,
                    error: error.clone(),
                }
            } else {
                EvalStatus::passed(total_nanos)
            }
        }
        EvalStatus::Skipped => EvalStatus::Skipped,
        EvalStatus::Pending => EvalStatus::Pending,
        EvalStatus::Disabled => EvalStatus::Disabled,
        EvalStatus::Failed { error, .. } => EvalStatus::Failed {
            nanos: total_nanos,
            error: error.clone(),
        },
    }
}
