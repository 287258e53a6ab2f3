//! Engine configuration.

use crate::error::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default hard limit for request bodies (128 MiB).
pub const DEFAULT_REQUEST_BODY_LIMIT: usize = 134_217_728;
/// Default in-memory threshold for request bodies (128 KiB).
pub const DEFAULT_REQUEST_BODY_IN_MEMORY_LIMIT: usize = 131_072;
/// Default hard limit for response bodies (512 KiB).
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 524_288;

/// Whether rules run, and whether their interruptions apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RuleEngineStatus {
    /// Rules run and may interrupt.
    #[default]
    On,
    /// Rules run; interruptions are logged and discarded.
    DetectionOnly,
    /// Rules never run.
    Off,
}

impl FromStr for RuleEngineStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "detectiononly" => Ok(Self::DetectionOnly),
            "off" => Ok(Self::Off),
            _ => Err(Error::config(format!("invalid rule engine status: {s:?}"))),
        }
    }
}

impl fmt::Display for RuleEngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "On",
            Self::DetectionOnly => "DetectionOnly",
            Self::Off => "Off",
        })
    }
}

/// Whether transactions produce audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AuditEngineStatus {
    /// Audit every transaction.
    On,
    /// Never audit.
    #[default]
    Off,
    /// Audit transactions whose response status is relevant.
    RelevantOnly,
}

impl FromStr for AuditEngineStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "relevantonly" => Ok(Self::RelevantOnly),
            _ => Err(Error::config(format!("invalid audit engine status: {s:?}"))),
        }
    }
}

impl fmt::Display for AuditEngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "On",
            Self::Off => "Off",
            Self::RelevantOnly => "RelevantOnly",
        })
    }
}

/// Connection-level engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionEngine {
    /// Enabled.
    #[default]
    On,
    /// Disabled.
    Off,
    /// Detect without acting.
    DetectOnly,
}

impl FromStr for ConnectionEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "detectonly" | "detectiononly" => Ok(Self::DetectOnly),
            _ => Err(Error::config(format!("invalid connection engine status: {s:?}"))),
        }
    }
}

impl fmt::Display for ConnectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "On",
            Self::Off => "Off",
            Self::DetectOnly => "DetectOnly",
        })
    }
}

/// What happens when a body exceeds its hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BodyLimitAction {
    /// Keep the body up to the limit and evaluate it.
    ProcessPartial,
    /// Interrupt the transaction.
    Reject,
}

impl FromStr for BodyLimitAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "processpartial" => Ok(Self::ProcessPartial),
            "reject" => Ok(Self::Reject),
            _ => Err(Error::config(format!("invalid body limit action: {s:?}"))),
        }
    }
}

impl fmt::Display for BodyLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProcessPartial => "ProcessPartial",
            Self::Reject => "Reject",
        })
    }
}

/// One section of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuditLogPart {
    /// Transaction header (mandatory).
    Header = 0,
    /// Request headers.
    RequestHeaders = 1,
    /// Request body.
    RequestBody = 2,
    /// Response headers before the final response.
    IntermediaryResponseHeaders = 3,
    /// Intended response body.
    IntermediaryResponseBody = 4,
    /// Response headers.
    ResponseHeaders = 5,
    /// Final response body.
    ResponseBody = 6,
    /// Audit trailer.
    Trailer = 7,
    /// Request body without file contents.
    RequestBodyAlternative = 8,
    /// Uploaded files.
    UploadedFiles = 9,
    /// Matched rules.
    RulesMatched = 10,
    /// Final boundary (mandatory).
    EndMarker = 11,
}

impl AuditLogPart {
    /// Part for a letter.
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c.to_ascii_uppercase() {
            'A' => Self::Header,
            'B' => Self::RequestHeaders,
            'C' => Self::RequestBody,
            'D' => Self::IntermediaryResponseHeaders,
            'E' => Self::IntermediaryResponseBody,
            'F' => Self::ResponseHeaders,
            'G' => Self::ResponseBody,
            'H' => Self::Trailer,
            'I' => Self::RequestBodyAlternative,
            'J' => Self::UploadedFiles,
            'K' => Self::RulesMatched,
            'Z' => Self::EndMarker,
            _ => return None,
        })
    }

    /// Letter of the part.
    pub fn as_char(self) -> char {
        match self {
            Self::EndMarker => 'Z',
            other => (b'A' + other as u8) as char,
        }
    }
}

/// Set of audit record sections, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditLogParts(u16);

impl AuditLogParts {
    /// No parts.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether a part is included.
    pub fn contains(self, part: AuditLogPart) -> bool {
        self.0 & (1 << part as u16) != 0
    }

    /// Include a part.
    pub fn insert(&mut self, part: AuditLogPart) {
        self.0 |= 1 << part as u16;
    }
}

impl Default for AuditLogParts {
    fn default() -> Self {
        let mut parts = Self::empty();
        for c in "ABCFHZ".chars() {
            if let Some(part) = AuditLogPart::from_char(c) {
                parts.insert(part);
            }
        }
        parts
    }
}

impl FromStr for AuditLogParts {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = Self::empty();
        for c in s.chars() {
            let part = AuditLogPart::from_char(c).ok_or_else(|| Error::InvalidAuditLogParts {
                parts: s.to_string(),
                part: c,
            })?;
            parts.insert(part);
        }
        Ok(parts)
    }
}

impl fmt::Display for AuditLogParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in "ABCDEFGHIJKZ".chars() {
            if let Some(part) = AuditLogPart::from_char(c) {
                if self.contains(part) {
                    write!(f, "{c}")?;
                }
            }
        }
        Ok(())
    }
}

/// Engine settings. Transactions take a copy at creation and may override
/// it for themselves.
#[derive(Debug, Clone)]
pub struct WafConfig {
    /// Rule engine status.
    pub rule_engine: RuleEngineStatus,
    /// Audit engine status.
    pub audit_engine: AuditEngineStatus,
    /// Connection engine status.
    pub connection_engine: ConnectionEngine,
    /// Buffer and evaluate request bodies.
    pub request_body_access: bool,
    /// Hard limit for request bodies.
    pub request_body_limit: usize,
    /// Request bytes kept in memory before spilling to disk.
    pub request_body_in_memory_limit: usize,
    /// Action when the request body limit is exceeded.
    pub request_body_limit_action: BodyLimitAction,
    /// Buffer and evaluate response bodies.
    pub response_body_access: bool,
    /// Hard limit for response bodies.
    pub response_body_limit: usize,
    /// Action when the response body limit is exceeded.
    pub response_body_limit_action: BodyLimitAction,
    /// Response content types whose body is exposed to rules.
    pub response_body_mime_types: Vec<String>,
    /// Populate `REQUEST_BODY` even without a matching body processor.
    pub force_request_body_variable: bool,
    /// Separator between urlencoded arguments.
    pub argument_separator: String,
    /// Directory for body spill files; the system default when unset.
    pub tmp_dir: Option<PathBuf>,
    /// Sections included in audit records.
    pub audit_log_parts: AuditLogParts,
    /// Response statuses audited under `RelevantOnly`.
    pub audit_log_relevant_status: Option<Regex>,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            rule_engine: RuleEngineStatus::On,
            audit_engine: AuditEngineStatus::Off,
            connection_engine: ConnectionEngine::On,
            request_body_access: false,
            request_body_limit: DEFAULT_REQUEST_BODY_LIMIT,
            request_body_in_memory_limit: DEFAULT_REQUEST_BODY_IN_MEMORY_LIMIT,
            request_body_limit_action: BodyLimitAction::Reject,
            response_body_access: false,
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            response_body_limit_action: BodyLimitAction::ProcessPartial,
            response_body_mime_types: vec!["text/html".to_string(), "text/plain".to_string()],
            force_request_body_variable: false,
            argument_separator: "&".to_string(),
            tmp_dir: None,
            audit_log_parts: AuditLogParts::default(),
            audit_log_relevant_status: None,
        }
    }
}

impl WafConfig {
    /// Set the relevant-status pattern from a string.
    pub fn set_audit_log_relevant_status(&mut self, pattern: &str) -> Result<()> {
        let re = Regex::new(pattern).map_err(|e| Error::RegexCompile {
            pattern: pattern.to_string(),
            source: e,
        })?;
        self.audit_log_relevant_status = Some(re);
        Ok(())
    }

    /// Whether a response content type is listed for body inspection.
    pub fn is_response_mime_type(&self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        self.response_body_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime))
    }
}
