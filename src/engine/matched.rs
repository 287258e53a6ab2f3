//! Records of rules that matched during a transaction.

use crate::rules::RuleMetadata;
use crate::variables::MatchData;
use std::sync::Arc;

/// A rule that matched, with what it matched and its expanded messages.
#[derive(Debug, Clone)]
pub struct MatchedRule {
    /// The rule.
    pub rule: Arc<RuleMetadata>,
    /// Expanded `msg`.
    pub message: String,
    /// Expanded `logdata`.
    pub data: String,
    /// Fields that matched.
    pub match_data: Vec<MatchData>,
    /// Whether the rule carried a disruptive action.
    pub disruptive: bool,
    /// Transaction id.
    pub transaction_id: String,
    /// Request URI at match time.
    pub uri: String,
    /// Client address.
    pub client_ip: String,
    /// Server address.
    pub server_ip: String,
}

impl MatchedRule {
    /// Format as an error log line, as emitted for a response `status`.
    pub fn error_log(&self, status: u16) -> String {
        let mut parts = Vec::new();

        if !self.client_ip.is_empty() {
            parts.push(format!("[client \"{}\"]", self.client_ip));
        }

        if self.disruptive {
            parts.push(format!(
                "Access denied with code {} (phase {}).",
                status,
                self.rule.phase.number()
            ));
        } else {
            parts.push("Warning.".to_string());
        }

        if let Some(md) = self.match_data.first() {
            parts.push(format!(
                "Matched \"{}\" at {}.",
                md.value,
                md.variable_name()
            ));
        }

        parts.push(self.rule.format_log());

        if !self.message.is_empty() {
            parts.push(format!("[msg \"{}\"]", self.message));
        }

        if !self.data.is_empty() {
            parts.push(format!("[data \"{}\"]", self.data));
        }

        if !self.server_ip.is_empty() {
            parts.push(format!("[hostname \"{}\"]", self.server_ip));
        }

        parts.push(format!("[uri \"{}\"]", self.uri));
        parts.push(format!("[unique_id \"{}\"]", self.transaction_id));

        parts.join(" ")
    }
}
