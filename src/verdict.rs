// SPDX-License-Identifier: AGPL-3.0-or-later

//! Gate decision over the collected step results

use std::collections::BTreeMap;

use crate::config::EnforcementConfig;
use crate::model::{EnforcementPhase, StepResult, StepStatus, Verdict, VerdictStatus};

/// Derive the verdict. A `FAIL` step always fails the gate; a step that
/// requires enforcement fails it unless its phase is `WARN`.
pub fn aggregate(results: &[StepResult], enforcement: &EnforcementConfig) -> Verdict {
    let mut reasons = Vec::new();
    let mut phased = BTreeMap::new();

    for result in results {
        let phase = enforcement.phase_for(&result.step);
        phased.insert(result.step.clone(), phase.to_string());

        if result.status == StepStatus::Fail {
            reasons.push(match &result.reason {
                Some(reason) => format!("{} failed: {}", result.step, reason),
                None => format!("{} failed", result.step),
            });
            continue;
        }
        if result.requires_enforcement {
            match phase {
                EnforcementPhase::Block => {
                    reasons.push(format!("{} requires enforcement", result.step))
                }
                EnforcementPhase::Warn => reasons.push(format!(
                    "{} requires enforcement (advisory: phase WARN)",
                    result.step
                )),
            }
        }
    }

    let failing = results.iter().any(|r| {
        r.status == StepStatus::Fail
            || (r.requires_enforcement && enforcement.phase_for(&r.step) == EnforcementPhase::Block)
    });

    Verdict {
        status: if failing { VerdictStatus::Fail } else { VerdictStatus::Pass },
        reasons,
        phased_enforcement: phased,
    }
}
