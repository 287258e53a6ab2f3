//! # zentinel-waf
//!
//! Pure Rust WAF transaction engine.
//!
//! The crate threads one HTTP exchange through the WAF processing phases:
//! it ingests connection data, the request line, headers and bodies into
//! named variable collections, asks a rule evaluator for a decision at
//! every phase boundary and keeps the first interruption it is given.
//!
//! ## Features
//!
//! - Phase state machine with exactly-once evaluation and sticky interruptions
//! - Variable collections with case rules, key patterns, exclusions and counts
//! - Size-limited body buffering with disk spill, reject or partial processing
//! - `%{variable.key}` macro expansion
//! - URL-encoded and multipart request body processors
//! - Audit records and a pooled, thread-safe engine
//!
//! ## Quick Start
//!
//! ```ignore
//! use zentinel_waf::{Phase, Rule, RuleAction, RuleGroup, RuleMetadata, Waf, WafConfig};
//!
//! let mut rules = RuleGroup::new();
//! rules.add(Rule::new(
//!     RuleMetadata::new(1001, Phase::RequestHeaders),
//!     "ARGS",
//!     "@pm union select",
//!     RuleAction::Deny(403),
//! )?);
//! let waf = Waf::with_rules(WafConfig::default(), rules);
//!
//! let mut tx = waf.new_transaction();
//! tx.process_connection("10.0.0.1", 51234, "10.0.0.2", 443);
//! tx.process_uri("/search?q=1+union+select", "GET", "HTTP/1.1");
//! tx.add_request_header("Host", "example.com");
//! if let Some(it) = tx.process_request_headers() {
//!     println!("blocked: status={}", it.status);
//! }
//! tx.process_logging()?;
//! tx.close()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod body;
pub mod bodyprocessors;
pub mod config;
pub mod engine;
pub mod error;
pub mod macros;
pub mod rules;
pub mod variables;

// Re-export main types at crate root
pub use config::{
    AuditEngineStatus, AuditLogParts, BodyLimitAction, ConnectionEngine, RuleEngineStatus,
    WafConfig,
};
pub use engine::{
    ArgumentKind, AuditLog, AuditLogger, Interruption, InterruptionAction, MatchedRule, Phase,
    RuleEvaluator, Transaction, Waf,
};
pub use error::{Error, Result};
pub use macros::Macro;
pub use rules::{Rule, RuleAction, RuleGroup, RuleMetadata, Severity};
pub use variables::{Variable, VariableSelector};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
