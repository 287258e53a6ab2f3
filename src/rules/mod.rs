//! Built-in rule group.
//!
//! A small programmatic rule set that plugs into the engine through
//! [`RuleEvaluator`]: each rule selects variables, runs one operator over
//! the selected values and, on a match, records it and optionally
//! interrupts the transaction.
//!
//! ```ignore
//! let mut group = RuleGroup::new();
//! group.add(Rule::new(
//!     RuleMetadata::new(1001, Phase::RequestHeaders).with_msg("SQLi in %{matched_var_name}")?,
//!     "ARGS|REQUEST_COOKIES",
//!     "@pm union select",
//!     RuleAction::Deny(403),
//! )?);
//! let waf = Waf::with_rules(WafConfig::default(), group);
//! ```

mod metadata;
pub mod operators;

pub use metadata::{RuleMetadata, Severity};
pub use operators::{create_operator, parse_operator, Operator, OperatorMatch};

use crate::config::RuleEngineStatus;
use crate::engine::{Interruption, Phase, RuleEvaluator, Transaction};
use crate::error::{Error, Result};
use crate::variables::{MatchData, VariableSelector};
use std::sync::Arc;
use tracing::{debug, trace};

/// What a rule does when it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Record the match and continue.
    Pass,
    /// Interrupt with a status.
    Deny(u16),
    /// Interrupt by dropping the connection.
    Drop,
    /// Interrupt with a 302 to a URL.
    Redirect(String),
}

impl RuleAction {
    /// Whether the action interrupts the transaction.
    pub fn is_disruptive(&self) -> bool {
        !matches!(self, RuleAction::Pass)
    }

    fn interruption(&self, rule_id: u32) -> Option<Interruption> {
        match self {
            RuleAction::Pass => None,
            RuleAction::Deny(status) => Some(Interruption::deny(rule_id, *status)),
            RuleAction::Drop => Some(Interruption::drop_connection(rule_id)),
            RuleAction::Redirect(url) => Some(Interruption::redirect(rule_id, 302, url.as_str())),
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Id, phase and messages.
    pub metadata: Arc<RuleMetadata>,
    /// Variables the operator runs over.
    pub selectors: Vec<VariableSelector>,
    /// The operator.
    pub operator: Arc<dyn Operator>,
    /// Match when the operator does not.
    pub negated: bool,
    /// Action on match.
    pub action: RuleAction,
    /// Store operator captures in `TX:0`..`TX:9`.
    pub capture: bool,
}

impl Rule {
    /// Build a rule from a variable list (`ARGS|!ARGS:token`) and an
    /// operator expression (`@rx ^admin`, `!@streq GET`).
    pub fn new(
        metadata: RuleMetadata,
        variables: &str,
        operator: &str,
        action: RuleAction,
    ) -> Result<Self> {
        if metadata.id == 0 {
            return Err(Error::config("rule id must be non-zero"));
        }
        let selectors = VariableSelector::parse_list(variables)?;
        if selectors.is_empty() {
            return Err(Error::config(format!("rule {} selects no variables", metadata.id)));
        }
        let (negated, operator) = parse_operator(operator)?;
        Ok(Self {
            metadata: Arc::new(metadata),
            selectors,
            operator,
            negated,
            action,
            capture: false,
        })
    }

    /// Enable captures.
    pub fn with_capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Rule id.
    pub fn id(&self) -> u32 {
        self.metadata.id
    }

    /// Phase the rule runs in.
    pub fn phase(&self) -> Phase {
        self.metadata.phase
    }

    /// Run the rule. Returns the fields that matched.
    fn evaluate(&self, tx: &mut Transaction) -> Vec<MatchData> {
        let fields: Vec<MatchData> = self
            .selectors
            .iter()
            .flat_map(|selector| tx.get_field(selector))
            .collect();

        let previous = tx.capturing();
        tx.set_capture(self.capture);

        let mut matched = Vec::new();
        for field in fields {
            let result = self.operator.execute(&field.value);
            trace!(
                rule_id = self.id(),
                variable = %field.variable_name(),
                matched = result.matched,
                "operator executed"
            );
            if result.matched == self.negated {
                continue;
            }
            if self.capture && !self.negated {
                tx.reset_captures();
                for (i, capture) in result.captures.iter().enumerate() {
                    tx.capture_field(i, capture);
                }
            }
            matched.push(field);
        }

        tx.set_capture(previous);
        matched
    }
}

/// Rules grouped by phase, evaluated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RuleGroup {
    phases: [Vec<Rule>; 6],
}

impl RuleGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule to the end of its phase.
    pub fn add(&mut self, rule: Rule) -> &mut Self {
        self.phases[rule.phase().index()].push(rule);
        self
    }

    /// Rules of a phase.
    pub fn rules_for_phase(&self, phase: Phase) -> &[Rule] {
        &self.phases[phase.index()]
    }

    /// Total number of rules.
    pub fn len(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    /// Whether the group has no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleEvaluator for RuleGroup {
    /// Runs the phase's rules until one interrupts. In detection-only mode
    /// every rule runs and the first interruption is still reported, for
    /// the transaction to discard.
    fn evaluate(&self, phase: Phase, tx: &mut Transaction) -> Option<Interruption> {
        let enforcing = tx.config().rule_engine == RuleEngineStatus::On;
        let mut first = None;

        for rule in self.rules_for_phase(phase) {
            let matched = rule.evaluate(tx);
            if matched.is_empty() {
                continue;
            }
            debug!(
                tx_id = %tx.id(),
                rule_id = rule.id(),
                %phase,
                fields = matched.len(),
                "rule matched"
            );
            tx.match_rule(Arc::clone(&rule.metadata), rule.action.is_disruptive(), matched);

            if let Some(interruption) = rule.action.interruption(rule.id()) {
                if enforcing {
                    return Some(interruption);
                }
                first.get_or_insert(interruption);
            }
        }
        first
    }
}
