//! Body buffering and size limits.

mod buffer;

pub use buffer::BodyBuffer;

use crate::config::BodyLimitAction;

/// Result of checking a write against a body limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    /// Write every byte.
    Accept,
    /// Write only the first `n` bytes; the limit is reached.
    Truncate(usize),
    /// Write nothing and interrupt.
    Reject,
}

impl LimitDecision {
    /// Whether the limit was exceeded.
    pub fn exceeded(self) -> bool {
        !matches!(self, LimitDecision::Accept)
    }
}

/// Decide how much of `incoming` bytes fit after `current` bytes.
pub fn check_limit(
    current: usize,
    incoming: usize,
    limit: usize,
    action: BodyLimitAction,
) -> LimitDecision {
    if current.saturating_add(incoming) <= limit {
        return LimitDecision::Accept;
    }
    match action {
        BodyLimitAction::Reject => LimitDecision::Reject,
        BodyLimitAction::ProcessPartial => LimitDecision::Truncate(limit.saturating_sub(current)),
    }
}
