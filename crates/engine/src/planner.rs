//! Plan stage
//!
//! Turns a scenario into an execution plan: a risk tier, retry budget and
//! checkpoint flag per step, plus a static analysis of the scenario. Planning
//! never touches the browser and always produces the same plan for the same
//! scenario and policy.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use stepwright_common::{Action, ActionKind, Error, RiskRule, RiskTier, Scenario, Step};

// ============================================================================
// Risk policy
// ============================================================================

/// Authentication and irreversible actions
const DESTRUCTIVE_PATTERN: &str = r"(?i)\b(log\s*-?\s*in|sign\s*-?\s*in|log\s*-?\s*out|sign\s*-?\s*out|submit|delete|remove|destroy|pay|purchase|checkout|confirm|transfer|unsubscribe|deactivate)\b";

/// Credential-bearing inputs
const CREDENTIAL_PATTERN: &str = r"(?i)(password|passcode|passphrase|otp|one[\s-]?time|token|credential|secret|\bpin\b)";

#[derive(Debug, Clone)]
struct CompiledRule {
    action: Option<ActionKind>,
    pattern: Option<Regex>,
    tier: RiskTier,
    reason: String,
}

/// Ordered risk table; the first matching rule wins
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    rules: Vec<CompiledRule>,
}

impl RiskPolicy {
    pub fn builtin_rules() -> Vec<RiskRule> {
        let rule = |action, pattern: &str, reason: &str| RiskRule {
            action: Some(action),
            pattern: Some(pattern.to_string()),
            tier: RiskTier::High,
            reason: Some(reason.to_string()),
        };
        vec![
            rule(
                ActionKind::Click,
                DESTRUCTIVE_PATTERN,
                "click on an authentication or irreversible control",
            ),
            rule(
                ActionKind::Select,
                DESTRUCTIVE_PATTERN,
                "selection of an authentication or irreversible option",
            ),
            rule(ActionKind::Fill, CREDENTIAL_PATTERN, "credential input"),
        ]
    }

    /// Compile a rule table, falling back to the built-ins when it is empty
    pub fn from_rules(rules: &[RiskRule]) -> Result<Self, Error> {
        let builtin;
        let rules = if rules.is_empty() {
            builtin = Self::builtin_rules();
            &builtin
        } else {
            rules
        };

        let compiled = rules
            .iter()
            .map(|r| {
                let pattern = r
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| Error::InvalidConfig(format!("risk rule pattern: {}", e)))?;
                let reason = r.reason.clone().unwrap_or_else(|| match (&r.action, &r.pattern) {
                    (Some(a), Some(p)) => format!("{} matching {}", a, p),
                    (Some(a), None) => format!("{} step", a),
                    (None, Some(p)) => format!("matches {}", p),
                    (None, None) => "risk rule".to_string(),
                });
                Ok(CompiledRule {
                    action: r.action,
                    pattern,
                    tier: r.tier,
                    reason,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { rules: compiled })
    }

    fn default_tier(kind: ActionKind) -> RiskTier {
        match kind {
            ActionKind::Navigate | ActionKind::Assert | ActionKind::Wait | ActionKind::Capture => {
                RiskTier::Low
            }
            ActionKind::Fill | ActionKind::Click | ActionKind::Select => RiskTier::Medium,
        }
    }

    /// Tier for a step and the reason it was chosen
    pub fn classify(&self, step: &Step) -> (RiskTier, String) {
        let kind = step.kind();
        // Fill values are user data, not a description of the control.
        let parameter = match &step.action {
            Action::Fill { .. } => None,
            other => other.parameter(),
        };
        let haystack: Vec<&str> = step.target.texts().chain(parameter).collect();

        for rule in &self.rules {
            if rule.action.map_or(false, |a| a != kind) {
                continue;
            }
            let matched = match &rule.pattern {
                Some(re) => haystack.iter().any(|t| re.is_match(t)),
                None => true,
            };
            if matched {
                return (rule.tier, rule.reason.clone());
            }
        }
        (Self::default_tier(kind), format!("default for {}", kind))
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        // Built-in patterns are constants known to compile
        Self::from_rules(&[]).unwrap_or(Self { rules: Vec::new() })
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub index: usize,
    pub step: Step,
    pub risk: RiskTier,
    pub retry_budget: u32,
    pub reasons: Vec<String>,
    /// Screenshot before the first attempt
    pub checkpoint: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAnalysis {
    pub total_steps: usize,
    pub complexity_score: u32,
    pub estimated_duration_ms: u64,
    pub risk_counts: RiskCounts,
    /// Per-step observations: weak locators, very short texts, oracle-only targets
    pub notes: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub scenario: String,
    pub retry_count: u32,
    pub steps: Vec<PlannedStep>,
    pub analysis: PlanAnalysis,
}

impl ExecutionPlan {
    pub fn checkpoints(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter().filter(|s| s.checkpoint)
    }
}

/// Complexity above which splitting the scenario is recommended
const COMPLEXITY_SPLIT_THRESHOLD: u32 = 15;
const FORM_BATCH_THRESHOLD: usize = 5;
const ESTIMATED_STEP_MS: u64 = 1_000;

pub struct Planner {
    policy: RiskPolicy,
}

impl Planner {
    pub fn new(policy: RiskPolicy) -> Self {
        Self { policy }
    }

    pub fn plan(&self, scenario: &Scenario) -> ExecutionPlan {
        let retry_count = scenario.config.retry_count;
        let mut analysis = PlanAnalysis {
            total_steps: scenario.steps.len(),
            ..Default::default()
        };

        let steps: Vec<PlannedStep> = scenario
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let (risk, reason) = self.policy.classify(step);
                let notes = step_notes(step);
                let mut reasons = vec![reason];
                reasons.extend(notes.iter().cloned());

                match risk {
                    RiskTier::Low => analysis.risk_counts.low += 1,
                    RiskTier::Medium => analysis.risk_counts.medium += 1,
                    RiskTier::High => analysis.risk_counts.high += 1,
                }
                analysis.complexity_score += step_complexity(step);
                analysis.estimated_duration_ms += ESTIMATED_STEP_MS;
                analysis
                    .notes
                    .extend(notes.iter().map(|n| format!("step {}: {}", index, n)));

                PlannedStep {
                    index,
                    step: step.clone(),
                    risk,
                    retry_budget: risk.retry_budget(retry_count),
                    reasons,
                    checkpoint: risk == RiskTier::High,
                }
            })
            .collect();

        if analysis.complexity_score > COMPLEXITY_SPLIT_THRESHOLD {
            analysis
                .recommendations
                .push("split the scenario into smaller scenarios".to_string());
        }
        let fills = steps.iter().filter(|s| s.step.kind() == ActionKind::Fill).count();
        if fills > FORM_BATCH_THRESHOLD {
            analysis.recommendations.push(
                "many form fills: wait for the form to settle before filling".to_string(),
            );
        }
        if analysis.risk_counts.high > 0 {
            analysis.recommendations.push(format!(
                "{} high-risk step(s) run with a reduced retry budget and a checkpoint screenshot",
                analysis.risk_counts.high
            ));
        }

        debug!(
            scenario = %scenario.name,
            complexity = analysis.complexity_score,
            high = analysis.risk_counts.high,
            "Scenario analysed"
        );
        info!(scenario = %scenario.name, steps = steps.len(), "Execution plan ready");

        ExecutionPlan {
            scenario: scenario.name.clone(),
            retry_count,
            steps,
            analysis,
        }
    }
}

fn step_complexity(step: &Step) -> u32 {
    match step.kind() {
        ActionKind::Assert => 4,
        _ => 2,
    }
}

fn step_notes(step: &Step) -> Vec<String> {
    let mut notes = Vec::new();
    let target = &step.target;
    if step.action.needs_element() {
        if !target.has_deterministic() {
            notes.push("target relies on the locator oracle".to_string());
        } else if step.kind() == ActionKind::Fill
            && target.selector.is_none()
            && target.label.is_none()
        {
            notes.push("weak locator: prefer a label or selector".to_string());
        }
    }
    if step.kind() == ActionKind::Click {
        if let Some(text) = &target.text {
            if text.trim().chars().count() < 3 {
                notes.push("very short button text".to_string());
            }
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwright_common::{AssertCondition, TargetDescriptor};

    fn planner() -> Planner {
        Planner::new(RiskPolicy::default())
    }

    #[test]
    fn test_default_policy() {
        let policy = RiskPolicy::default();
        let cases = [
            (Step::navigate("/home"), RiskTier::Low),
            (
                Step::assert(
                    AssertCondition::UrlContains("/x".into()),
                    TargetDescriptor::default(),
                ),
                RiskTier::Low,
            ),
            (Step::fill(TargetDescriptor::label("Email"), "a@b.c"), RiskTier::Medium),
            (Step::fill(TargetDescriptor::placeholder("Password"), "x"), RiskTier::High),
            // The typed value is not part of the target
            (
                Step::fill(TargetDescriptor::label("Comment"), "my password is weak"),
                RiskTier::Medium,
            ),
            (Step::click(TargetDescriptor::text("Next")), RiskTier::Medium),
            (Step::click(TargetDescriptor::text("Sign in")), RiskTier::High),
            (Step::click(TargetDescriptor::text("Delete account")), RiskTier::High),
            (Step::click(TargetDescriptor::intent("the logout link")), RiskTier::High),
            (Step::click(TargetDescriptor::text("Payment history")), RiskTier::Medium),
            (Step::select(TargetDescriptor::label("Action"), "Remove"), RiskTier::High),
        ];
        for (step, tier) in cases {
            assert_eq!(policy.classify(&step).0, tier, "{}", step.summary());
        }
    }

    #[test]
    fn test_custom_rules_replace_builtins() {
        let policy = RiskPolicy::from_rules(&[
            RiskRule {
                action: Some(ActionKind::Navigate),
                pattern: Some("(?i)/admin".into()),
                tier: RiskTier::High,
                reason: None,
            },
            RiskRule {
                action: None,
                pattern: Some("(?i)archive".into()),
                tier: RiskTier::High,
                reason: Some("archiving".into()),
            },
        ])
        .unwrap();

        assert_eq!(policy.classify(&Step::navigate("/admin/users")).0, RiskTier::High);
        let (tier, reason) = policy.classify(&Step::click(TargetDescriptor::text("Archive")));
        assert_eq!(tier, RiskTier::High);
        assert_eq!(reason, "archiving");
        // Built-ins are gone
        assert_eq!(
            policy.classify(&Step::click(TargetDescriptor::text("Delete"))).0,
            RiskTier::Medium
        );
    }

    #[test]
    fn test_bad_pattern_is_configuration_error() {
        let err = RiskPolicy::from_rules(&[RiskRule {
            action: None,
            pattern: Some("(unclosed".into()),
            tier: RiskTier::High,
            reason: None,
        }])
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_budgets_and_checkpoints() {
        let mut scenario = Scenario::new(
            "budgets",
            vec![
                Step::navigate("/"),
                Step::click(TargetDescriptor::text("Delete account")),
            ],
        );
        scenario.config.retry_count = 3;
        let plan = planner().plan(&scenario);
        assert_eq!(plan.steps[0].retry_budget, 3);
        assert!(!plan.steps[0].checkpoint);
        assert_eq!(plan.steps[1].retry_budget, 2);
        assert!(plan.steps[1].checkpoint);
        assert_eq!(plan.checkpoints().count(), 1);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let scenario = Scenario::new(
            "same",
            vec![
                Step::navigate("/login"),
                Step::fill(TargetDescriptor::placeholder("Password"), "x"),
                Step::click(TargetDescriptor::text("OK")),
            ],
        );
        let p = planner();
        assert_eq!(p.plan(&scenario), p.plan(&scenario));
    }

    #[test]
    fn test_analysis() {
        let mut steps = vec![Step::navigate("/form")];
        for i in 0..6 {
            steps.push(Step::fill(TargetDescriptor::placeholder(format!("Field {}", i)), "v"));
        }
        steps.push(Step::click(TargetDescriptor::text("Go")));
        steps.push(Step::assert(
            AssertCondition::UrlContains("/done".into()),
            TargetDescriptor::default(),
        ));
        let plan = planner().plan(&Scenario::new("form", steps));
        let a = &plan.analysis;

        assert_eq!(a.total_steps, 9);
        assert_eq!(a.complexity_score, 8 * 2 + 4);
        assert_eq!(a.estimated_duration_ms, 9_000);
        assert_eq!(a.risk_counts, RiskCounts { low: 2, medium: 7, high: 0 });
        assert!(a.notes.iter().any(|n| n == "step 1: weak locator: prefer a label or selector"));
        assert!(a.notes.iter().any(|n| n == "step 7: very short button text"));
        assert_eq!(a.recommendations.len(), 2);
    }
}
