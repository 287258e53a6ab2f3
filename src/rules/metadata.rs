//! Rule identity and reporting metadata (id, msg, severity, tag, ...).

use crate::engine::Phase;
use crate::error::{Error, Result};
use crate::macros::Macro;
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Syslog-style severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

const SEVERITIES: [Severity; 8] = [
    Severity::Emergency,
    Severity::Alert,
    Severity::Critical,
    Severity::Error,
    Severity::Warning,
    Severity::Notice,
    Severity::Info,
    Severity::Debug,
];

impl Severity {
    /// Upper-case name as written in logs.
    pub fn name(self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Severity {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        SEVERITIES
            .get(usize::from(level))
            .copied()
            .ok_or_else(|| Error::config(format!("invalid severity: {}", level)))
    }
}

impl FromStr for Severity {
    type Err = Error;

    /// Accepts a level (`2`) or a name (`critical`).
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(level) = s.parse::<u8>() {
            return Severity::try_from(level);
        }
        SEVERITIES
            .into_iter()
            .find(|sev| sev.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::config(format!("invalid severity: {}", s)))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a rule is and how it reports a match.
#[derive(Debug, Clone, Default)]
pub struct RuleMetadata {
    /// Rule id.
    pub id: u32,
    /// Phase the rule runs in.
    pub phase: Phase,
    /// Message template.
    pub msg: Option<Macro>,
    /// Log data template.
    pub logdata: Option<Macro>,
    /// Severity.
    pub severity: Option<Severity>,
    /// Tags.
    pub tags: Vec<String>,
    /// Revision.
    pub rev: Option<String>,
    /// Rule set version.
    pub ver: Option<String>,
    /// Maturity (1-9).
    pub maturity: Option<u8>,
    /// Accuracy (1-9).
    pub accuracy: Option<u8>,
}

impl RuleMetadata {
    /// Metadata for a rule id in a phase.
    pub fn new(id: u32, phase: Phase) -> Self {
        Self {
            id,
            phase,
            ..Default::default()
        }
    }

    /// Set the message template.
    pub fn with_msg(mut self, template: &str) -> Result<Self> {
        self.msg = Some(Macro::new(template)?);
        Ok(self)
    }

    /// Set the log data template.
    pub fn with_logdata(mut self, template: &str) -> Result<Self> {
        self.logdata = Some(Macro::new(template)?);
        Ok(self)
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Static fields as `[key "value"]` pairs for error logs.
    pub fn format_log(&self) -> String {
        let mut out = format!("[id \"{}\"]", self.id);
        let optional = [
            ("rev", self.rev.clone()),
            ("severity", self.severity.map(|s| s.name().to_string())),
            ("ver", self.ver.clone()),
            ("maturity", self.maturity.map(|m| m.to_string())),
            ("accuracy", self.accuracy.map(|a| a.to_string())),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                let _ = write!(out, " [{} \"{}\"]", key, value);
            }
        }
        for tag in &self.tags {
            let _ = write!(out, " [tag \"{}\"]", tag);
        }
        out
    }
}
