//! The seam between the transaction and whatever evaluates rules.

use super::interruption::Interruption;
use super::phase::Phase;
use super::transaction::Transaction;

/// Evaluates the rules of one phase against a transaction.
///
/// Implementations read variables through [`Transaction::get_field`],
/// report matches with [`Transaction::match_rule`] and return the
/// interruption the phase decided on, if any. The transaction decides
/// whether that interruption applies.
pub trait RuleEvaluator: Send + Sync {
    /// Evaluate one phase.
    fn evaluate(&self, phase: Phase, tx: &mut Transaction) -> Option<Interruption>;
}

impl<F> RuleEvaluator for F
where
    F: Fn(Phase, &mut Transaction) -> Option<Interruption> + Send + Sync,
{
    fn evaluate(&self, phase: Phase, tx: &mut Transaction) -> Option<Interruption> {
        self(phase, tx)
    }
}
