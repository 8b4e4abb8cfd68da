use crate::models::signal::{Direction, ExtractedSignal, TradeDecision};
use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn inclusive() -> bool {
    true
}

/// `min <= indicator <= max` (either bound may be made exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCondition {
    pub indicator: String,
    pub min: Decimal,
    pub max: Decimal,
    #[serde(default = "inclusive")]
    pub min_inclusive: bool,
    #[serde(default = "inclusive")]
    pub max_inclusive: bool,
}

impl RangeCondition {
    pub fn inclusive(indicator: &str, min: Decimal, max: Decimal) -> Self {
        Self {
            indicator: indicator.to_string(),
            min,
            max,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    pub fn contains(&self, value: Decimal) -> bool {
        let above = if self.min_inclusive { value >= self.min } else { value > self.min };
        let below = if self.max_inclusive { value <= self.max } else { value < self.max };
        above && below
    }

    /// Absent indicator never satisfies a condition.
    pub fn is_met(&self, signals: &ExtractedSignal) -> bool {
        signals.get(&self.indicator).is_some_and(|v| self.contains(v))
    }
}

/// One row of the threshold table: a conjunction of ranges and the trade it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    pub conditions: Vec<RangeCondition>,
    pub direction: Direction,
}

impl PolicyRule {
    pub fn matches(&self, signals: &ExtractedSignal) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.is_met(signals))
    }
}

/// Ordered threshold table. First matching rule wins; table order is the only tie-break.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    rules: Vec<PolicyRule>,
    instrument: String,
}

impl DecisionPolicy {
    pub fn new(rules: Vec<PolicyRule>, instrument: impl Into<String>) -> Self {
        Self {
            rules,
            instrument: instrument.into(),
        }
    }

    /// Static checks run at config validation.
    pub fn validate_rules(rules: &[PolicyRule]) -> Result<()> {
        anyhow::ensure!(!rules.is_empty(), "decision policy has no rules");
        for rule in rules {
            anyhow::ensure!(
                !rule.conditions.is_empty(),
                "policy rule {} has no conditions",
                rule.name
            );
            for c in &rule.conditions {
                anyhow::ensure!(
                    c.min <= c.max,
                    "policy rule {}: {} range is empty ({} > {})",
                    rule.name,
                    c.indicator,
                    c.min,
                    c.max
                );
            }
        }
        Ok(())
    }

    pub fn matching_rule(&self, signals: &ExtractedSignal) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.matches(signals))
    }

    pub fn decide(&self, signals: &ExtractedSignal, quantity: Decimal) -> Option<TradeDecision> {
        self.matching_rule(signals)
            .map(|rule| self.decision_for(rule, quantity))
    }

    pub fn decision_for(&self, rule: &PolicyRule, quantity: Decimal) -> TradeDecision {
        TradeDecision {
            instrument: self.instrument.clone(),
            direction: rule.direction,
            quantity,
            rule: rule.name.clone(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }
}
