//! Structural and semantic plan validation.
//!
//! The validator is pure: it inspects a plan and either accepts it or
//! returns every defect it found. A rejected plan is never handed to the
//! executor; the executor re-runs this check defensively on each call.

use std::collections::HashSet;
use thiserror::Error;

use crate::context::parse_reference;
use crate::types::{ExecutionPlan, ParameterValue, PlanStep, StepId};

/// One defect found in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("plan id is empty")]
    EmptyPlanId,

    #[error("user request is empty")]
    EmptyUserRequest,

    #[error("plan has no steps")]
    NoSteps,

    #[error("step ids must be positive")]
    ZeroStepId,

    #[error("step id {0} appears more than once")]
    DuplicateStepId(StepId),

    #[error("step id {step_id} follows step id {previous}; ids must increase in execution order")]
    OutOfOrderStepId { step_id: StepId, previous: StepId },

    #[error("step {step_id}: function name is empty")]
    EmptyFunctionName { step_id: StepId },

    #[error("step {step_id}: input schema has no fields")]
    EmptySchema { step_id: StepId },

    #[error("step {step_id}: condition expression is empty")]
    EmptyCondition { step_id: StepId },

    #[error("step {step_id}: parameter '{parameter}' holds malformed reference '{reference}'")]
    MalformedReference {
        step_id: StepId,
        parameter: String,
        reference: String,
    },

    #[error("step {step_id}: parameter '{parameter}' references step {target}, which is not in the plan")]
    UnknownReference {
        step_id: StepId,
        parameter: String,
        target: StepId,
    },

    #[error("step {step_id}: parameter '{parameter}' references step {target}, which does not strictly precede it")]
    ForwardReference {
        step_id: StepId,
        parameter: String,
        target: StepId,
    },

    #[error("step {step_id}: dependsOn names step {target}, which is not in the plan")]
    DependencyNotInPlan { step_id: StepId, target: StepId },

    #[error("step {step_id}: dependsOn names step {target}, which does not strictly precede it")]
    ForwardDependency { step_id: StepId, target: StepId },
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A plan was rejected; carries every defect found.
#[derive(Debug, Error)]
#[error("plan '{plan_id}' failed validation: {}", summarize(.issues))]
pub struct PlanValidationError {
    pub plan_id: String,
    pub issues: Vec<ValidationIssue>,
}

/// Pure structural/semantic checks on a plan before it may run.
#[derive(Debug, Clone, Default)]
pub struct PlanValidator;

impl PlanValidator {
    pub fn new() -> Self {
        Self
    }

    /// Accept the plan or report every defect. No side effects.
    pub fn validate(&self, plan: &ExecutionPlan) -> Result<(), PlanValidationError> {
        let mut issues = Vec::new();

        if plan.id.trim().is_empty() {
            issues.push(ValidationIssue::EmptyPlanId);
        }
        if plan.user_request.trim().is_empty() {
            issues.push(ValidationIssue::EmptyUserRequest);
        }
        // An empty plan fails regardless of its status.
        if plan.steps.is_empty() {
            issues.push(ValidationIssue::NoSteps);
        }

        let mut seen: HashSet<StepId> = HashSet::new();
        let mut previous: Option<StepId> = None;
        for step in &plan.steps {
            let step_id = step.step_id();
            if step_id == 0 {
                issues.push(ValidationIssue::ZeroStepId);
            }
            if !seen.insert(step_id) {
                issues.push(ValidationIssue::DuplicateStepId(step_id));
            }
            if let Some(prev) = previous {
                if step_id <= prev {
                    issues.push(ValidationIssue::OutOfOrderStepId {
                        step_id,
                        previous: prev,
                    });
                }
            }
            previous = Some(step_id);
        }

        let known_ids: HashSet<StepId> = plan.steps.iter().map(|s| s.step_id()).collect();
        for step in &plan.steps {
            self.check_step(step, &known_ids, &mut issues);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            log::debug!(
                "plan '{}' rejected with {} validation issue(s)",
                plan.id,
                issues.len()
            );
            Err(PlanValidationError {
                plan_id: plan.id.clone(),
                issues,
            })
        }
    }

    fn check_step(
        &self,
        step: &PlanStep,
        known_ids: &HashSet<StepId>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        match step {
            PlanStep::FunctionCall(fc) => {
                if fc.function_name.trim().is_empty() {
                    issues.push(ValidationIssue::EmptyFunctionName {
                        step_id: fc.step_id,
                    });
                }

                // Sorted for deterministic issue ordering.
                let mut parameters: Vec<(&String, &ParameterValue)> =
                    fc.parameters.iter().collect();
                parameters.sort_by_key(|(name, _)| name.as_str());

                for (name, value) in parameters {
                    let raw = match value {
                        ParameterValue::Reference(raw) => raw,
                        ParameterValue::Literal(_) => continue,
                    };
                    match parse_reference(raw) {
                        None => issues.push(ValidationIssue::MalformedReference {
                            step_id: fc.step_id,
                            parameter: name.clone(),
                            reference: raw.clone(),
                        }),
                        Some(reference) => {
                            if !known_ids.contains(&reference.step_id) {
                                issues.push(ValidationIssue::UnknownReference {
                                    step_id: fc.step_id,
                                    parameter: name.clone(),
                                    target: reference.step_id,
                                });
                            } else if reference.step_id >= fc.step_id {
                                issues.push(ValidationIssue::ForwardReference {
                                    step_id: fc.step_id,
                                    parameter: name.clone(),
                                    target: reference.step_id,
                                });
                            }
                        }
                    }
                }

                if let Some(deps) = &fc.depends_on {
                    for target in deps {
                        if !known_ids.contains(target) {
                            issues.push(ValidationIssue::DependencyNotInPlan {
                                step_id: fc.step_id,
                                target: *target,
                            });
                        } else if *target >= fc.step_id {
                            issues.push(ValidationIssue::ForwardDependency {
                                step_id: fc.step_id,
                                target: *target,
                            });
                        }
                    }
                }
            }
            PlanStep::UserInput(ui) => {
                if ui.schema.fields.is_empty() {
                    issues.push(ValidationIssue::EmptySchema {
                        step_id: ui.step_id,
                    });
                }
            }
            PlanStep::Condition(c) => {
                if c.condition.trim().is_empty() {
                    issues.push(ValidationIssue::EmptyCondition { step_id: c.step_id });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        FieldType, FunctionCallStep, InputField, InputSchema, PlanStatus, UserInputStep,
    };
    use std::collections::HashMap;

    fn call_step(
        step_id: StepId,
        function_name: &str,
        parameters: Vec<(&str, ParameterValue)>,
    ) -> PlanStep {
        PlanStep::FunctionCall(FunctionCallStep {
            step_id,
            description: format!("call {}", function_name),
            function_name: function_name.to_string(),
            parameters: parameters
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            depends_on: None,
        })
    }

    fn plan_with(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan::new("test request", steps, PlanStatus::Executable)
    }

    #[test]
    fn accepts_a_well_formed_plan() {
        let plan = plan_with(vec![
            call_step(1, "add", vec![("a", ParameterValue::literal(3))]),
            call_step(
                2,
                "multiply",
                vec![("value", ParameterValue::reference("step.1.result"))],
            ),
        ]);
        assert!(PlanValidator::new().validate(&plan).is_ok());
    }

    #[test]
    fn rejects_empty_plans_regardless_of_status() {
        for status in [PlanStatus::Executable, PlanStatus::Incomplete] {
            let plan = ExecutionPlan::new("request", vec![], status);
            let err = PlanValidator::new().validate(&plan).unwrap_err();
            assert!(err.issues.contains(&ValidationIssue::NoSteps));
        }
    }

    #[test]
    fn rejects_empty_id_and_request() {
        let mut plan = plan_with(vec![call_step(1, "add", vec![])]);
        plan.id = String::new();
        plan.user_request = "  ".to_string();
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        assert!(err.issues.contains(&ValidationIssue::EmptyPlanId));
        assert!(err.issues.contains(&ValidationIssue::EmptyUserRequest));
    }

    #[test]
    fn rejects_forward_and_self_references() {
        let plan = plan_with(vec![
            call_step(
                1,
                "first",
                vec![("later", ParameterValue::reference("step.2.result"))],
            ),
            call_step(
                2,
                "second",
                vec![("own", ParameterValue::reference("step.2.result"))],
            ),
        ]);
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        assert!(err.issues.contains(&ValidationIssue::ForwardReference {
            step_id: 1,
            parameter: "later".to_string(),
            target: 2,
        }));
        assert!(err.issues.contains(&ValidationIssue::ForwardReference {
            step_id: 2,
            parameter: "own".to_string(),
            target: 2,
        }));
    }

    #[test]
    fn rejects_references_to_absent_steps() {
        let plan = plan_with(vec![call_step(
            1,
            "only",
            vec![("ghost", ParameterValue::reference("step.9.result"))],
        )]);
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        assert!(err.issues.contains(&ValidationIssue::UnknownReference {
            step_id: 1,
            parameter: "ghost".to_string(),
            target: 9,
        }));
    }

    #[test]
    fn rejects_malformed_reference_strings() {
        let plan = plan_with(vec![call_step(
            1,
            "only",
            vec![("bad", ParameterValue::reference("step.x.result"))],
        )]);
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        assert!(matches!(
            err.issues[0],
            ValidationIssue::MalformedReference { step_id: 1, .. }
        ));
    }

    #[test]
    fn rejects_duplicate_and_out_of_order_step_ids() {
        let plan = plan_with(vec![
            call_step(2, "a", vec![]),
            call_step(2, "b", vec![]),
            call_step(1, "c", vec![]),
        ]);
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        assert!(err.issues.contains(&ValidationIssue::DuplicateStepId(2)));
        assert!(err.issues.contains(&ValidationIssue::OutOfOrderStepId {
            step_id: 1,
            previous: 2,
        }));
    }

    #[test]
    fn gaps_in_step_ids_are_allowed() {
        let plan = plan_with(vec![
            call_step(1, "a", vec![]),
            call_step(5, "b", vec![("x", ParameterValue::reference("step.1.result"))]),
        ]);
        assert!(PlanValidator::new().validate(&plan).is_ok());
    }

    #[test]
    fn rejects_empty_required_fields_per_kind() {
        let plan = plan_with(vec![
            call_step(1, "  ", vec![]),
            PlanStep::UserInput(UserInputStep {
                step_id: 2,
                description: "ask".to_string(),
                schema: InputSchema::new(vec![]),
                output_name: None,
            }),
        ]);
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        assert!(err
            .issues
            .contains(&ValidationIssue::EmptyFunctionName { step_id: 1 }));
        assert!(err
            .issues
            .contains(&ValidationIssue::EmptySchema { step_id: 2 }));
    }

    #[test]
    fn rejects_bad_depends_on_targets() {
        let mut step = FunctionCallStep {
            step_id: 2,
            description: "call".to_string(),
            function_name: "f".to_string(),
            parameters: HashMap::new(),
            depends_on: Some(vec![2, 7]),
        };
        step.parameters.insert(
            "ok".to_string(),
            ParameterValue::reference("step.1.result"),
        );
        let plan = plan_with(vec![
            call_step(1, "a", vec![]),
            PlanStep::FunctionCall(step),
        ]);
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        assert!(err.issues.contains(&ValidationIssue::ForwardDependency {
            step_id: 2,
            target: 2,
        }));
        assert!(err.issues.contains(&ValidationIssue::DependencyNotInPlan {
            step_id: 2,
            target: 7,
        }));
    }

    #[test]
    fn user_input_schema_with_fields_passes() {
        let plan = plan_with(vec![PlanStep::UserInput(UserInputStep {
            step_id: 1,
            description: "ask".to_string(),
            schema: InputSchema::new(vec![InputField::new("city", FieldType::Text).required()]),
            output_name: Some("city_form".to_string()),
        })]);
        assert!(PlanValidator::new().validate(&plan).is_ok());
    }

    #[test]
    fn error_display_names_the_plan() {
        let plan = plan_with(vec![]);
        let err = PlanValidator::new().validate(&plan).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains(&plan.id));
        assert!(rendered.contains("no steps"));
    }
}
