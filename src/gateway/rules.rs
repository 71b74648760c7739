//! Rule evaluation engine
//!
//! Evaluates a tenant's rule set against one request. Each rule derives a
//! check value from the request (URL, path, query, method), applies one of
//! a closed set of operators, and combines with its neighbors in
//! disjunctive normal form: `or` (or the leading `none`) starts a new
//! group, `and` extends the current one, and the overall result is the OR
//! of each group's AND.
//!
//! Evaluation is a direct two-level fold over the processed rules. There
//! is no expression construction or interpretation step.

use crate::gateway::types::{Rule, RuleAttribute, RuleLogic, RuleOperator};
use http::{Method, Uri};

/// Result of evaluating a full rule set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleOutcome {
    pub passed: bool,
    /// Ids of every individually failing rule; populated only when the
    /// overall result is a failure.
    pub failed_rule_ids: Vec<u64>,
}

struct ProcessedRule {
    id: u64,
    logic: RuleLogic,
    passed: bool,
}

/// Evaluates one request against one tenant's rule set
pub struct RuleEngine {
    processed: Vec<ProcessedRule>,
}

impl RuleEngine {
    /// Derive every rule's check value from the request and evaluate its
    /// operator. The request is never consulted again after construction.
    pub fn new(rules: &[Rule], url: &Uri, method: &Method) -> Self {
        let processed = rules
            .iter()
            .map(|rule| ProcessedRule {
                id: rule.id,
                logic: rule.logic,
                passed: apply_operator(
                    rule.operator,
                    &derive_check_value(rule.attribute, url, method),
                    &rule.value.as_text(),
                ),
            })
            .collect();

        Self { processed }
    }

    /// Fold the processed rules into their grouped boolean result.
    ///
    /// An empty rule set fails: no admitting group exists.
    pub fn validate_all(&self) -> RuleOutcome {
        let mut groups: Vec<bool> = Vec::new();

        for (index, rule) in self.processed.iter().enumerate() {
            match rule.logic {
                RuleLogic::And if index > 0 => {
                    let current = groups
                        .last_mut()
                        .expect("a group exists for every non-leading rule");
                    *current = *current && rule.passed;
                }
                _ => groups.push(rule.passed),
            }
        }

        let passed = groups.iter().any(|group| *group);

        let failed_rule_ids = if passed {
            Vec::new()
        } else {
            self.processed
                .iter()
                .filter(|rule| !rule.passed)
                .map(|rule| rule.id)
                .collect()
        };

        RuleOutcome {
            passed,
            failed_rule_ids,
        }
    }
}

fn derive_check_value(attribute: RuleAttribute, url: &Uri, method: &Method) -> String {
    match attribute {
        RuleAttribute::FullUrl => url.to_string(),
        RuleAttribute::PathAndQuery => match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        },
        RuleAttribute::Path => url.path().to_string(),
        RuleAttribute::QueryString => url.query().unwrap_or_default().to_string(),
        RuleAttribute::Method => method.as_str().to_string(),
    }
}

fn apply_operator(operator: RuleOperator, check: &str, value: &str) -> bool {
    use RuleOperator::*;

    match operator {
        Equals => check == value,
        NotEquals => check != value,
        GreaterThan => numeric(check, value).is_some_and(|(c, v)| c > v),
        LessThan => numeric(check, value).is_some_and(|(c, v)| c < v),
        GreaterThanOrEqual => numeric(check, value).is_some_and(|(c, v)| c >= v),
        LessThanOrEqual => numeric(check, value).is_some_and(|(c, v)| c <= v),
        Contains => check.contains(value),
        IsIn => value.split(',').any(|item| item == check),
        IsNotIn => !value.split(',').any(|item| item == check),
        StartsWith => check.starts_with(value),
        EndsWith => check.ends_with(value),
        DoesNotStartWith => !check.starts_with(value),
        DoesNotEndWith => !check.ends_with(value),
        Exists => !check.is_empty(),
        DoesNotExist => check.is_empty(),
        Wildcard => wildcard(check, value),
    }
}

/// Non-numeric input on either side is a match failure, never an error.
fn numeric(check: &str, value: &str) -> Option<(f64, f64)> {
    Some((check.parse().ok()?, value.parse().ok()?))
}

/// `*` is a multi-character wildcard: the literal fragments between stars
/// must appear in the check value in order. Without a star this is plain
/// equality.
fn wildcard(check: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return check == pattern;
    }

    let mut position = 0;
    for fragment in pattern.split('*').filter(|fragment| !fragment.is_empty()) {
        match check[position..].find(fragment) {
            Some(offset) => position += offset + fragment.len(),
            None => return false,
        }
    }
    true
}
