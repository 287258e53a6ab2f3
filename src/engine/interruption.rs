//! Interruptions: the decision to stop a transaction.

use serde::Serialize;
use std::fmt;

/// What the integrator should do with an interrupted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptionAction {
    /// Answer with an error status.
    Deny,
    /// Close the connection without answering.
    Drop,
    /// Redirect the client.
    Redirect,
}

impl InterruptionAction {
    /// Lower-case action name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::Drop => "drop",
            Self::Redirect => "redirect",
        }
    }
}

impl fmt::Display for InterruptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An interruption raised by a rule or by a body limit.
///
/// A transaction holds at most one and never replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interruption {
    /// Rule that raised it; `0` for engine limits.
    pub rule_id: u32,
    /// Action to take.
    pub action: InterruptionAction,
    /// HTTP status to answer with.
    pub status: u16,
    /// Redirect target or other action data.
    pub data: String,
}

impl Interruption {
    /// Deny with a status.
    pub fn deny(rule_id: u32, status: u16) -> Self {
        Self {
            rule_id,
            action: InterruptionAction::Deny,
            status,
            data: String::new(),
        }
    }

    /// Redirect to a URL.
    pub fn redirect(rule_id: u32, status: u16, url: impl Into<String>) -> Self {
        Self {
            rule_id,
            action: InterruptionAction::Redirect,
            status,
            data: url.into(),
        }
    }

    /// Drop the connection.
    pub fn drop_connection(rule_id: u32) -> Self {
        Self {
            rule_id,
            action: InterruptionAction::Drop,
            status: 0,
            data: String::new(),
        }
    }

    /// Format as a log entry.
    pub fn format_log(&self) -> String {
        let mut parts = vec![
            format!("[action {}]", self.action),
            format!("[status {}]", self.status),
        ];
        if self.rule_id != 0 {
            parts.push(format!("[id \"{}\"]", self.rule_id));
        }
        if !self.data.is_empty() {
            parts.push(format!("[data \"{}\"]", self.data));
        }
        parts.join(" ")
    }
}
