//! Audit records.
//!
//! The transaction decides whether to audit and assembles an [`AuditLog`]
//! holding the sections selected by [`AuditLogParts`]; an [`AuditLogger`]
//! writes it wherever it likes.

use super::interruption::Interruption;
use super::transaction::Transaction;
use crate::bodyprocessors::BodyProcessorKind;
use crate::config::{AuditLogPart, AuditLogParts};
use crate::error::Result;
use crate::variables::{Collection, Variable, VariableStore};
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;
use std::collections::BTreeMap;

/// Receives finished audit records.
pub trait AuditLogger: Send + Sync {
    /// Write one record.
    fn write(&self, log: &AuditLog) -> Result<()>;
}

/// Headers by lower-cased name.
pub type AuditHeaders = BTreeMap<String, Vec<String>>;

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    /// Sections included, as letters.
    pub parts: String,
    /// Transaction data.
    pub transaction: AuditTransaction,
    /// Matched rule messages (part K).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<AuditMessage>,
}

/// Transaction section of an audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditTransaction {
    /// Transaction id.
    pub id: String,
    /// Transaction start.
    pub timestamp: DateTime<Utc>,
    /// Client address.
    pub client_ip: String,
    /// Client port.
    pub client_port: u16,
    /// Server address.
    pub host_ip: String,
    /// Server port.
    pub host_port: u16,
    /// Request data.
    pub request: AuditRequest,
    /// Response data.
    pub response: AuditResponse,
    /// Interruption, when the transaction was stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,
}

/// Request section of an audit record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditRequest {
    /// Method.
    pub method: String,
    /// URI as received.
    pub uri: String,
    /// Protocol.
    pub protocol: String,
    /// Headers (part B).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<AuditHeaders>,
    /// Body (part C, or part I without file contents).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Uploaded files (part J).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<AuditFile>>,
}

/// Response section of an audit record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditResponse {
    /// Status code.
    pub status: u16,
    /// Protocol.
    pub protocol: String,
    /// Headers (parts D and F).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<AuditHeaders>,
    /// Body (parts E and G).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// An uploaded file.
#[derive(Debug, Clone, Serialize)]
pub struct AuditFile {
    /// Form field.
    pub field: String,
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// A matched rule in an audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditMessage {
    /// Formatted log line.
    pub message: String,
    /// Rule details.
    pub data: AuditMessageData,
}

/// Rule details of an audit message.
#[derive(Debug, Clone, Serialize)]
pub struct AuditMessageData {
    /// Rule id.
    pub id: u32,
    /// Expanded message.
    pub msg: String,
    /// Expanded log data.
    pub data: String,
    /// Severity name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Revision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
}

fn headers(store: &VariableStore, variable: Variable) -> AuditHeaders {
    let mut out = AuditHeaders::new();
    for field in store.collection(variable).find_all() {
        out.entry(field.key.to_ascii_lowercase())
            .or_default()
            .push(field.value);
    }
    out
}

fn files(store: &VariableStore) -> Vec<AuditFile> {
    let sizes = store.collection(Variable::FilesSizes);
    store
        .collection(Variable::Files)
        .find_all()
        .into_iter()
        .map(|field| {
            let size = sizes
                .get(&field.value)
                .first()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            AuditFile {
                field: field.key,
                name: field.value,
                size,
            }
        })
        .collect()
}

/// Part I: multipart bodies are replaced by their form fields, urlencoded;
/// any other body is kept as is.
fn request_body_without_files(tx: &Transaction) -> Result<Option<String>> {
    let store = tx.variables();
    if store.scalar(Variable::ReqbodyProcessor) == BodyProcessorKind::Multipart.name() {
        let fields = store
            .collection(Variable::ArgsPost)
            .find_all()
            .into_iter()
            .map(|f| {
                format!(
                    "{}={}",
                    utf8_percent_encode(&f.key, NON_ALPHANUMERIC),
                    utf8_percent_encode(&f.value, NON_ALPHANUMERIC)
                )
            })
            .collect::<Vec<_>>();
        return Ok(Some(fields.join("&")));
    }
    if tx.request_body().is_empty() {
        return Ok(None);
    }
    let body = tx.request_body().read_to_vec(tx.config().request_body_limit)?;
    Ok(Some(String::from_utf8_lossy(&body).into_owned()))
}

fn port(store: &VariableStore, variable: Variable) -> u16 {
    store.scalar(variable).parse().unwrap_or(0)
}

/// Assemble the audit record of a transaction.
pub(crate) fn build(tx: &Transaction, parts: AuditLogParts) -> Result<AuditLog> {
    let store = tx.variables();
    let status = port(store, Variable::ResponseStatus);

    let mut request = AuditRequest {
        method: store.scalar(Variable::RequestMethod).to_string(),
        uri: store.scalar(Variable::RequestUriRaw).to_string(),
        protocol: store.scalar(Variable::RequestProtocol).to_string(),
        ..Default::default()
    };
    if parts.contains(AuditLogPart::RequestHeaders) {
        request.headers = Some(headers(store, Variable::RequestHeaders));
    }
    if parts.contains(AuditLogPart::RequestBody) && !tx.request_body().is_empty() {
        let limit = tx.config().request_body_limit;
        let body = tx.request_body().read_to_vec(limit)?;
        request.body = Some(String::from_utf8_lossy(&body).into_owned());
    } else if parts.contains(AuditLogPart::RequestBodyAlternative) {
        request.body = request_body_without_files(tx)?;
    }
    if parts.contains(AuditLogPart::UploadedFiles) {
        request.files = Some(files(store));
    }

    let mut response = AuditResponse {
        status,
        protocol: store.scalar(Variable::ResponseProtocol).to_string(),
        ..Default::default()
    };
    if parts.contains(AuditLogPart::ResponseHeaders)
        || parts.contains(AuditLogPart::IntermediaryResponseHeaders)
    {
        response.headers = Some(headers(store, Variable::ResponseHeaders));
    }
    let response_body = parts.contains(AuditLogPart::ResponseBody)
        || parts.contains(AuditLogPart::IntermediaryResponseBody);
    if response_body && !tx.response_body().is_empty() {
        let limit = tx.config().response_body_limit;
        let body = tx.response_body().read_to_vec(limit)?;
        response.body = Some(String::from_utf8_lossy(&body).into_owned());
    }

    let messages = if parts.contains(AuditLogPart::RulesMatched) {
        tx.matched_rules()
            .iter()
            .map(|mr| AuditMessage {
                message: mr.error_log(status),
                data: AuditMessageData {
                    id: mr.rule.id,
                    msg: mr.message.clone(),
                    data: mr.data.clone(),
                    severity: mr.rule.severity.map(|s| s.name().to_string()),
                    tags: mr.rule.tags.clone(),
                    rev: mr.rule.rev.clone(),
                    ver: mr.rule.ver.clone(),
                },
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(AuditLog {
        parts: parts.to_string(),
        transaction: AuditTransaction {
            id: tx.id().to_string(),
            timestamp: tx.timestamp(),
            client_ip: store.scalar(Variable::RemoteAddr).to_string(),
            client_port: port(store, Variable::RemotePort),
            host_ip: store.scalar(Variable::ServerAddr).to_string(),
            host_port: port(store, Variable::ServerPort),
            request,
            response,
            interruption: tx.interruption().cloned(),
        },
        messages,
    })
}
