//! Architect plan model: batches, steps, validation and splitting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Risk classification, bounding batch sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    /// Maximum steps allowed in a batch of this risk.
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::Low => 5,
            Self::Medium => 3,
            Self::High => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// What kind of work a step is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Edit or create source code.
    Code,
    /// Run a shell command.
    Command,
    /// Run a check whose outcome gates progress.
    Validation,
    /// A human has to do something.
    Manual,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Command => "command",
            Self::Validation => "validation",
            Self::Manual => "manual",
        }
    }
}

/// An atomic unit of developer work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    pub action_type: ActionType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_change: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default)]
    pub fallback_commands: Vec<String>,

    #[serde(default)]
    pub expect_exit_code: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output_pattern: Option<String>,

    #[serde(default)]
    pub risk_level: RiskLevel,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub is_test_step: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validates_step: Option<String>,

    #[serde(default)]
    pub requires_human_judgment: bool,

    /// Per-step command timeout; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Step {
    pub fn new(id: impl Into<String>, description: impl Into<String>, action: ActionType) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            action_type: action,
            file_path: None,
            code_change: None,
            command: None,
            cwd: None,
            fallback_commands: Vec::new(),
            expect_exit_code: 0,
            expected_output_pattern: None,
            risk_level: RiskLevel::default(),
            depends_on: Vec::new(),
            is_test_step: false,
            validates_step: None,
            requires_human_judgment: false,
            timeout_seconds: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }
}

/// A size-bounded grouping of steps forming one developer checkpoint unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_number: u32,
    #[serde(default)]
    pub risk_summary: RiskLevel,
    pub description: String,
    pub steps: Vec<Step>,
}

/// The Architect's output artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub batches: Vec<Batch>,

    #[serde(default)]
    pub tdd_approach: Option<String>,

    #[serde(default)]
    pub total_estimated_minutes: u32,
}

impl Plan {
    /// Structural validation: step ids unique across the plan, and
    /// `depends_on` references only steps that appear earlier.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for batch in &self.batches {
            for step in &batch.steps {
                if !seen.insert(step.id.as_str()) {
                    errors.push(format!("duplicate step id: {}", step.id));
                }
                for dep in &step.depends_on {
                    if !seen.contains(dep.as_str()) {
                        errors.push(format!(
                            "step {} depends on {}, which is not an earlier step",
                            step.id, dep
                        ));
                    }
                }
            }
        }

        if self.batches.is_empty() {
            errors.push("plan has no batches".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Enforce the risk-bounded batch size limits (low 5 / medium 3 /
    /// high 1). Oversized batches are split in place, preserving step
    /// order and labelling the parts; batch numbers are reassigned
    /// sequentially.
    pub fn split_oversized_batches(mut self) -> Self {
        let mut batches = Vec::with_capacity(self.batches.len());
        for batch in self.batches.drain(..) {
            let limit = batch.risk_summary.max_batch_size();
            if batch.steps.len() <= limit {
                batches.push(batch);
                continue;
            }

            let parts = batch.steps.len().div_ceil(limit);
            let mut steps = batch.steps.into_iter();
            for part in 0..parts {
                let chunk: Vec<Step> = steps.by_ref().take(limit).collect();
                if chunk.is_empty() {
                    break;
                }
                batches.push(Batch {
                    batch_number: 0,
                    risk_summary: batch.risk_summary,
                    description: format!(
                        "{} (part {}/{})",
                        batch.description,
                        part + 1,
                        parts
                    ),
                    steps: chunk,
                });
            }
        }

        for (index, batch) in batches.iter_mut().enumerate() {
            batch.batch_number = index as u32 + 1;
        }
        self.batches = batches;
        self
    }

    /// Look up a step anywhere in the plan.
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.batches
            .iter()
            .flat_map(|b| b.steps.iter())
            .find(|s| s.id == step_id)
    }

    /// All step ids, in execution order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.batches
            .iter()
            .flat_map(|b| b.steps.iter().map(|s| s.id.as_str()))
            .collect()
    }

    /// Transitive closure of steps that depend on `step_id`, directly or
    /// indirectly. Used for skip cascades.
    pub fn dependents_closure(&self, step_id: &str) -> HashSet<String> {
        let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();
        for batch in &self.batches {
            for step in &batch.steps {
                for dep in &step.depends_on {
                    dependents_of
                        .entry(dep.as_str())
                        .or_default()
                        .push(step.id.as_str());
                }
            }
        }

        let mut closure = HashSet::new();
        let mut frontier = vec![step_id];
        while let Some(current) = frontier.pop() {
            if let Some(children) = dependents_of.get(current) {
                for child in children {
                    if closure.insert(child.to_string()) {
                        frontier.push(child);
                    }
                }
            }
        }
        closure
    }
}

/// Step execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

/// Recorded outcome of one step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,

    /// Reviewer-driven revision round this result belongs to.
    #[serde(default)]
    pub revision_round: u32,

    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Truncated command output (see driver truncation rules).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default)]
    pub attempts: u32,
}

/// Recorded completion of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_number: u32,
    #[serde(default)]
    pub revision_round: u32,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step(id: &str) -> Step {
        Step::new(id, format!("step {}", id), ActionType::Command)
    }

    fn plan_with(batches: Vec<Batch>) -> Plan {
        Plan {
            goal: "test".into(),
            batches,
            tdd_approach: None,
            total_estimated_minutes: 10,
        }
    }

    #[test]
    fn validate_accepts_ordered_dependencies() {
        let plan = plan_with(vec![Batch {
            batch_number: 1,
            risk_summary: RiskLevel::Low,
            description: "b1".into(),
            steps: vec![
                step("s1"),
                step("s2").with_depends_on(vec!["s1".into()]),
            ],
        }]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_ids_and_forward_deps() {
        let plan = plan_with(vec![Batch {
            batch_number: 1,
            risk_summary: RiskLevel::Low,
            description: "b1".into(),
            steps: vec![
                step("s1").with_depends_on(vec!["s2".into()]),
                step("s2"),
                step("s2"),
            ],
        }]);
        let errors = plan.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("depends on s2")));
        assert!(errors.iter().any(|e| e.contains("duplicate step id")));
    }

    #[test]
    fn validate_rejects_empty_plan() {
        assert!(plan_with(vec![]).validate().is_err());
    }

    #[test]
    fn split_respects_limits_and_labels_parts() {
        let steps: Vec<Step> = (0..7).map(|i| step(&format!("s{}", i))).collect();
        let plan = plan_with(vec![Batch {
            batch_number: 1,
            risk_summary: RiskLevel::Medium,
            description: "big batch".into(),
            steps,
        }])
        .split_oversized_batches();

        assert_eq!(plan.batches.len(), 3);
        assert_eq!(plan.batches[0].steps.len(), 3);
        assert_eq!(plan.batches[1].steps.len(), 3);
        assert_eq!(plan.batches[2].steps.len(), 1);
        assert_eq!(plan.batches[0].description, "big batch (part 1/3)");
        assert_eq!(plan.batches[2].description, "big batch (part 3/3)");
        // Order preserved, numbers sequential.
        assert_eq!(plan.step_ids(), vec!["s0", "s1", "s2", "s3", "s4", "s5", "s6"]);
        assert_eq!(
            plan.batches.iter().map(|b| b.batch_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn split_leaves_conforming_batches_alone() {
        let plan = plan_with(vec![Batch {
            batch_number: 1,
            risk_summary: RiskLevel::High,
            description: "careful".into(),
            steps: vec![step("s1")],
        }])
        .split_oversized_batches();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].description, "careful");
    }

    #[test]
    fn dependents_closure_is_transitive() {
        let plan = plan_with(vec![Batch {
            batch_number: 1,
            risk_summary: RiskLevel::Low,
            description: "b".into(),
            steps: vec![
                step("s1"),
                step("s2").with_depends_on(vec!["s1".into()]),
                step("s3").with_depends_on(vec!["s2".into()]),
                step("s4"),
            ],
        }]);

        let closure = plan.dependents_closure("s1");
        assert!(closure.contains("s2"));
        assert!(closure.contains("s3"));
        assert!(!closure.contains("s4"));
        assert!(!closure.contains("s1"));
    }

    proptest! {
        #[test]
        fn split_never_exceeds_limit_and_preserves_order(
            sizes in proptest::collection::vec(1usize..12, 1..5),
            risk_index in 0usize..3,
        ) {
            let risk = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High][risk_index];
            let mut counter = 0;
            let batches: Vec<Batch> = sizes
                .iter()
                .enumerate()
                .map(|(i, size)| Batch {
                    batch_number: i as u32 + 1,
                    risk_summary: risk,
                    description: format!("batch {}", i),
                    steps: (0..*size)
                        .map(|_| {
                            counter += 1;
                            step(&format!("s{}", counter))
                        })
                        .collect(),
                })
                .collect();

            let original_ids: Vec<String> = batches
                .iter()
                .flat_map(|b| b.steps.iter().map(|s| s.id.clone()))
                .collect();

            let plan = plan_with(batches).split_oversized_batches();

            for batch in &plan.batches {
                prop_assert!(batch.steps.len() <= risk.max_batch_size());
            }
            let split_ids: Vec<String> =
                plan.step_ids().iter().map(|s| s.to_string()).collect();
            prop_assert_eq!(split_ids, original_ids);
        }
    }
}
