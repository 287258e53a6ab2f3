//! zentinel-waf CLI tool.

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use zentinel_waf::{
    AuditEngineStatus, AuditLog, AuditLogger, BodyLimitAction, Error, Macro, Phase, Result, Rule,
    RuleAction, RuleEngineStatus, RuleGroup, RuleMetadata, Transaction, Waf, WafConfig,
};

#[derive(Parser)]
#[command(name = "zentinel-waf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a raw HTTP request file through a transaction
    Inspect {
        /// Path to the raw request (request line, headers, blank line, body)
        request: PathBuf,

        /// Rule engine status (on, off, detectiononly)
        #[arg(long, default_value = "on")]
        rule_engine: RuleEngineStatus,

        /// Buffer and decode the request body
        #[arg(long)]
        body_access: bool,

        /// Request body limit in bytes
        #[arg(long)]
        body_limit: Option<usize>,

        /// Action when the body limit is exceeded (reject, processpartial)
        #[arg(long, default_value = "reject")]
        limit_action: BodyLimitAction,

        /// Deny rule as "ID PHASE VARIABLES OPERATOR", e.g. "1001 2 ARGS @pm union select"
        #[arg(short, long)]
        deny: Vec<String>,

        /// Macro to expand after processing, e.g. "%{request_headers.host}"
        #[arg(short, long)]
        expand: Vec<String>,

        /// Print the audit record
        #[arg(long)]
        audit: bool,
    },

    /// Check that a macro template parses
    Macro {
        /// Template to check
        template: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            request,
            rule_engine,
            body_access,
            body_limit,
            limit_action,
            deny,
            expand,
            audit,
        } => {
            let mut config = WafConfig {
                rule_engine,
                request_body_access: body_access,
                request_body_limit_action: limit_action,
                audit_engine: if audit {
                    AuditEngineStatus::On
                } else {
                    AuditEngineStatus::Off
                },
                ..Default::default()
            };
            if let Some(limit) = body_limit {
                config.request_body_limit = limit;
            }
            inspect(&request, config, &deny, &expand)
        }
        Commands::Macro { template } => check_macro(&template),
    }
}

/// Parse `"ID PHASE VARIABLES OPERATOR..."` into a deny rule.
fn parse_deny_rule(definition: &str) -> Result<Rule> {
    let mut parts = definition.trim().splitn(4, ' ');
    let (Some(id), Some(phase), Some(variables), Some(operator)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::config(format!(
            "deny rule needs \"ID PHASE VARIABLES OPERATOR\": {:?}",
            definition
        )));
    };
    let id: u32 = id
        .parse()
        .map_err(|_| Error::config(format!("invalid rule id: {}", id)))?;
    let phase: Phase = phase.parse()?;

    let metadata = RuleMetadata::new(id, phase).with_msg("Matched %{matched_var_name}")?;
    Rule::new(metadata, variables, operator, RuleAction::Deny(403))
}

/// Prints audit records to stdout, one JSON object per line.
struct StdoutAuditLogger;

impl AuditLogger for StdoutAuditLogger {
    fn write(&self, log: &AuditLog) -> Result<()> {
        write_audit(&mut std::io::stdout().lock(), log)
    }
}

fn write_audit(out: &mut impl Write, log: &AuditLog) -> Result<()> {
    let audit_error = |message: String| Error::AuditLog { message };
    let json = serde_json::to_string(log).map_err(|e| audit_error(e.to_string()))?;
    writeln!(out, "{}", json).map_err(|e| audit_error(e.to_string()))
}

fn inspect(path: &Path, config: WafConfig, deny: &[String], expand: &[String]) -> Result<()> {
    info!("Inspecting request from {:?}", path);

    let mut rules = RuleGroup::new();
    for definition in deny {
        rules.add(parse_deny_rule(definition)?);
    }
    let templates = expand
        .iter()
        .map(|t| Macro::new(t))
        .collect::<Result<Vec<_>>>()?;

    let waf = Waf::with_rules(config, rules);
    waf.set_audit_logger(StdoutAuditLogger);

    let mut tx = waf.new_transaction();
    let file = File::open(path)?;
    let result = tx.parse_request_reader(file);
    report(&tx, &templates);
    tx.process_logging()?;
    tx.close()?;
    result.map(|_| ())
}

fn report(tx: &Transaction, templates: &[Macro]) {
    match tx.interruption() {
        Some(it) => {
            println!("BLOCKED (phase {})", tx.last_phase().map_or(0, Phase::number));
            println!("  Status: {}", it.status);
            println!("  Rule: {}", it.rule_id);
            println!("  Action: {}", it.action);
        }
        None => println!("ALLOWED"),
    }

    for matched in tx.matched_rules() {
        println!("  {}", matched.error_log(tx.interruption().map_or(0, |it| it.status)));
    }
    for template in templates {
        println!("  {} = {}", template, template.expand(tx));
    }
}

fn check_macro(template: &str) -> Result<()> {
    let parsed = Macro::new(template)?;
    if parsed.is_expandable() {
        println!("OK: {}", parsed);
    } else {
        println!("OK (no placeholders): {}", parsed);
    }
    Ok(())
}
