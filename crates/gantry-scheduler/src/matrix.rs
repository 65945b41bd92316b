//! Matrix expansion.
//!
//! Expands one job template into concrete job instances, one per point
//! in the Cartesian product of its axes. Axes combine in declaration
//! order and values keep their listed order, so expansion is fully
//! deterministic. Axis values are substituted into each instance's
//! steps at expansion time.

use gantry_core::interpolation::InterpolationContext;
use gantry_core::run::JobInstance;
use gantry_core::workflow::{JobTemplate, StepDefinition};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a template into its job instances. A template with no
    /// matrix yields exactly one instance with an empty axis assignment.
    pub fn expand(
        &self,
        template: &JobTemplate,
        env: &HashMap<String, String>,
        git_ref: &str,
    ) -> Vec<JobInstance> {
        let (combos, fail_fast) = match &template.matrix {
            Some(matrix) => (cartesian(matrix), matrix.fail_fast),
            None => (vec![Vec::new()], false),
        };

        combos
            .into_iter()
            .map(|combo| {
                let mut interp = InterpolationContext::new();
                interp.env = env.clone();
                interp.matrix = combo.iter().cloned().collect();
                interp.git_ref = git_ref.to_string();

                let steps: Vec<StepDefinition> = template
                    .steps
                    .iter()
                    .map(|step| substitute(step, &interp))
                    .collect();
                JobInstance::new(template.name.clone(), combo, steps, fail_fast)
            })
            .collect()
    }
}

fn cartesian(matrix: &gantry_core::workflow::MatrixConfig) -> Vec<Vec<(String, String)>> {
    let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for axis in &matrix.axes {
        let mut next = Vec::with_capacity(combos.len() * axis.values.len());
        for combo in &combos {
            for value in &axis.values {
                let mut extended = combo.clone();
                extended.push((axis.name.clone(), value.clone()));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

fn substitute(step: &StepDefinition, interp: &InterpolationContext) -> StepDefinition {
    let mut step = step.clone();
    step.run = step.run.as_ref().map(|c| interp.interpolate(c));
    step.env = step
        .env
        .iter()
        .map(|(k, v)| (k.clone(), interp.interpolate(v)))
        .collect();
    if let Some(uses) = &mut step.uses {
        uses.with = uses
            .with
            .iter()
            .map(|(k, v)| (k.clone(), interp.interpolate(v)))
            .collect();
    }
    step
}
