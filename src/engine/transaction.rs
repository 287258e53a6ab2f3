//! Transaction processing.
//!
//! A [`Transaction`] follows one HTTP exchange through the processing
//! phases. The integrator feeds it connection data, the request line,
//! headers and bodies, and checks for an [`Interruption`] after each
//! `process_*` call. Once an interruption is attached it never changes and
//! every later `process_*` call returns it without doing anything else.

use super::audit::{self, AuditLog};
use super::interruption::Interruption;
use super::matched::MatchedRule;
use super::phase::Phase;
use super::{PooledState, Waf};
use crate::body::{check_limit, BodyBuffer, LimitDecision};
use crate::bodyprocessors::urlencoded::{decode_component, has_invalid_encoding, parse_query};
use crate::bodyprocessors::BodyProcessorKind;
use crate::config::{AuditEngineStatus, RuleEngineStatus, WafConfig};
use crate::error::{Error, Result};
use crate::rules::RuleMetadata;
use crate::variables::{Collection, MatchData, Variable, VariableSelector, VariableStore};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use std::io::{self, BufRead, BufReader, Read};
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Number of capture slots (`TX:0` to `TX:9`).
pub const CAPTURE_SLOTS: usize = 10;

const READ_CHUNK: usize = 8192;

/// Origin of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    /// Query string argument.
    Get,
    /// Body argument.
    Post,
    /// Path argument.
    Path,
}

impl ArgumentKind {
    fn variable(self) -> Variable {
        match self {
            ArgumentKind::Get => Variable::ArgsGet,
            ArgumentKind::Post => Variable::ArgsPost,
            ArgumentKind::Path => Variable::ArgsPath,
        }
    }
}

/// Body direction, for the shared write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Request,
    Response,
}

/// Path part of a request target, dropping the scheme and authority of
/// absolute-form targets.
fn request_path(target: &str) -> &str {
    match target.find("://") {
        Some(pos) => {
            let after = &target[pos + 3..];
            after.find('/').map_or("/", |p| &after[p..])
        }
        None => target,
    }
}

/// A single HTTP transaction.
pub struct Transaction {
    id: String,
    waf: Waf,
    config: WafConfig,
    variables: VariableStore,
    request_body: BodyBuffer,
    response_body: BodyBuffer,
    matched_rules: Vec<MatchedRule>,
    interruption: Option<Interruption>,
    last_phase: Option<Phase>,
    capture: bool,
    timestamp: DateTime<Utc>,
    released: bool,
}

impl Transaction {
    pub(crate) fn new(waf: Waf, id: String, config: WafConfig, state: PooledState) -> Self {
        let PooledState {
            mut variables,
            request_body,
            response_body,
            matched_rules,
        } = state;
        variables.set_scalar(Variable::UniqueId, id.as_str());
        debug!(tx_id = %id, "transaction started");

        Self {
            id,
            waf,
            config,
            variables,
            request_body,
            response_body,
            matched_rules,
            interruption: None,
            last_phase: None,
            capture: false,
            timestamp: Utc::now(),
            released: false,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time the transaction started.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The engine this transaction belongs to.
    pub fn waf(&self) -> &Waf {
        &self.waf
    }

    /// Settings in effect for this transaction.
    pub fn config(&self) -> &WafConfig {
        &self.config
    }

    /// Override settings for this transaction only.
    ///
    /// The body buffers are set up when the transaction starts, so
    /// `request_body_in_memory_limit` and `tmp_dir` changed here are not
    /// seen by them. Use [`Transaction::set_body_spill`] for those.
    pub fn config_mut(&mut self) -> &mut WafConfig {
        &mut self.config
    }

    /// Change where and when body buffers spill to disk for this
    /// transaction. Applies to bytes written after the call.
    pub fn set_body_spill(&mut self, request_in_memory_limit: usize, tmp_dir: Option<PathBuf>) {
        self.config.request_body_in_memory_limit = request_in_memory_limit;
        self.config.tmp_dir = tmp_dir;
        self.request_body
            .configure(request_in_memory_limit, self.config.tmp_dir.clone());
        self.response_body
            .configure(self.config.response_body_limit, self.config.tmp_dir.clone());
    }

    /// Override the rule engine status for this transaction only.
    pub fn set_rule_engine(&mut self, status: RuleEngineStatus) {
        self.config.rule_engine = status;
    }

    /// Whether rules are disabled for this transaction.
    pub fn is_rule_engine_off(&self) -> bool {
        self.config.rule_engine == RuleEngineStatus::Off
    }

    /// Enable or disable capture slots.
    pub fn set_capture(&mut self, capture: bool) {
        self.capture = capture;
    }

    /// Whether capture slots are enabled.
    pub fn capturing(&self) -> bool {
        self.capture
    }

    /// The variable store.
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// The variable store, for evaluators that set variables.
    pub fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    /// Buffered request body.
    pub fn request_body(&self) -> &BodyBuffer {
        &self.request_body
    }

    /// Buffered response body.
    pub fn response_body(&self) -> &BodyBuffer {
        &self.response_body
    }

    /// The interruption, if any.
    pub fn interruption(&self) -> Option<&Interruption> {
        self.interruption.as_ref()
    }

    /// Check if there's an interruption.
    pub fn is_interrupted(&self) -> bool {
        self.interruption.is_some()
    }

    /// Highest phase evaluated so far; `None` before any.
    pub fn last_phase(&self) -> Option<Phase> {
        self.last_phase
    }

    /// Rules matched so far, in match order.
    pub fn matched_rules(&self) -> &[MatchedRule] {
        &self.matched_rules
    }

    fn preexisting(&self, operation: &str) -> Option<Interruption> {
        let interruption = self.interruption.as_ref()?;
        error!(
            tx_id = %self.id,
            "Calling {} but there is a preexisting interruption", operation
        );
        Some(interruption.clone())
    }

    fn already_evaluated(&self, phase: Phase) -> bool {
        self.last_phase.map_or(false, |last| phase <= last)
    }

    /// The only place an interruption gets attached.
    fn interrupt(&mut self, interruption: Interruption) {
        if self.interruption.is_some() {
            return;
        }
        match self.config.rule_engine {
            RuleEngineStatus::On => {
                warn!(
                    tx_id = %self.id,
                    rule_id = interruption.rule_id,
                    status = interruption.status,
                    action = %interruption.action,
                    "transaction interrupted"
                );
                self.interruption = Some(interruption);
            }
            RuleEngineStatus::DetectionOnly => {
                info!(
                    tx_id = %self.id,
                    rule_id = interruption.rule_id,
                    status = interruption.status,
                    "interruption not applied in detection-only mode"
                );
            }
            RuleEngineStatus::Off => {}
        }
    }

    fn evaluate_phase(&mut self, phase: Phase) -> Option<Interruption> {
        if self.already_evaluated(phase) {
            debug!(tx_id = %self.id, %phase, "phase already evaluated");
            return self.interruption.clone();
        }
        self.last_phase = Some(phase);

        if let Some(evaluator) = self.waf.evaluator() {
            debug!(tx_id = %self.id, %phase, "evaluating phase");
            if let Some(interruption) = evaluator.evaluate(phase, self) {
                self.interrupt(interruption);
            }
        }
        self.interruption.clone()
    }

    /// Record the connection endpoints.
    pub fn process_connection(
        &mut self,
        client_ip: &str,
        client_port: u16,
        server_ip: &str,
        server_port: u16,
    ) {
        self.variables.set_scalar(Variable::RemoteAddr, client_ip);
        self.variables
            .set_scalar(Variable::RemotePort, client_port.to_string());
        self.variables.set_scalar(Variable::ServerAddr, server_ip);
        self.variables
            .set_scalar(Variable::ServerPort, server_port.to_string());

        if !self.is_rule_engine_off() && self.last_phase.is_none() {
            self.last_phase = Some(Phase::Connection);
        }
    }

    /// Record the request line.
    ///
    /// Sets the request line variables and one `ARGS_GET` entry per query
    /// parameter. Fragments are dropped; for absolute-form targets only the
    /// path feeds `REQUEST_FILENAME` and `REQUEST_BASENAME`.
    pub fn process_uri(&mut self, uri: &str, method: &str, protocol: &str) {
        let vars = &mut self.variables;
        vars.set_scalar(Variable::RequestMethod, method);
        vars.set_scalar(Variable::RequestProtocol, protocol);
        vars.set_scalar(Variable::RequestUriRaw, uri);
        vars.set_scalar(
            Variable::RequestLine,
            format!("{} {} {}", method, uri, protocol),
        );

        let without_fragment = uri.split_once('#').map_or(uri, |(before, _)| before);
        vars.set_scalar(Variable::RequestUri, without_fragment);

        let (target, query) = match without_fragment.split_once('?') {
            Some((target, query)) => (target, query),
            None => (without_fragment, ""),
        };

        let filename = percent_decode_str(request_path(target))
            .decode_utf8_lossy()
            .into_owned();
        let basename = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        vars.set_scalar(Variable::RequestFilename, filename);
        vars.set_scalar(Variable::RequestBasename, basename);
        vars.set_scalar(Variable::QueryString, query);

        if has_invalid_encoding(query) {
            vars.set_scalar(Variable::UrlencodedError, "1");
        }
        for (key, value) in parse_query(query, &self.config.argument_separator) {
            vars.add(Variable::ArgsGet, &key, value);
        }
    }

    /// Add an argument.
    pub fn add_argument(&mut self, kind: ArgumentKind, key: &str, value: &str) {
        self.variables.add(kind.variable(), key, value);
    }

    /// Add a request header.
    ///
    /// `Cookie` headers are split into `REQUEST_COOKIES`; `Content-Type`
    /// selects the request body processor.
    pub fn add_request_header(&mut self, name: &str, value: &str) {
        if name.is_empty() {
            return;
        }
        self.variables.add(Variable::RequestHeaders, name, value);

        if name.eq_ignore_ascii_case("content-type") {
            if let Some(processor) = BodyProcessorKind::from_content_type(value) {
                self.variables
                    .set_scalar(Variable::ReqbodyProcessor, processor.name());
            }
        } else if name.eq_ignore_ascii_case("cookie") {
            for cookie in value.split(';') {
                let (key, val) = cookie.split_once('=').unwrap_or((cookie, ""));
                let key = key.trim();
                if !key.is_empty() {
                    self.variables
                        .add(Variable::RequestCookies, key, decode_component(val.trim()));
                }
            }
        }
    }

    /// Add a response header.
    pub fn add_response_header(&mut self, name: &str, value: &str) {
        if name.is_empty() {
            return;
        }
        self.variables.add(Variable::ResponseHeaders, name, value);

        if name.eq_ignore_ascii_case("content-type") {
            self.variables
                .set_scalar(Variable::ResponseContentType, value.trim());
        } else if name.eq_ignore_ascii_case("content-length") {
            self.variables
                .set_scalar(Variable::ResponseContentLength, value.trim());
        }
    }

    /// Read a whole request (request line, headers, body) from a stream
    /// and run it through the request phases.
    pub fn parse_request_reader<R: Read>(&mut self, reader: R) -> Result<Option<Interruption>> {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        reader.read_line(&mut line)?;
        let request_line = line.trim_end_matches(['\r', '\n']);
        let mut parts = request_line.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(uri), Some(protocol)) if !method.is_empty() && !uri.is_empty() => {
                self.process_uri(uri, method, protocol);
            }
            _ => {
                return Err(Error::RequestLine {
                    line: request_line.to_string(),
                })
            }
        }

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            let header = line.trim_end_matches(['\r', '\n']);
            if read == 0 || header.is_empty() {
                break;
            }
            let (name, value) = header.split_once(':').ok_or_else(|| Error::RequestHeader {
                line: header.to_string(),
            })?;
            self.add_request_header(name.trim(), value.trim());
        }

        if let Some(interruption) = self.process_request_headers() {
            return Ok(Some(interruption));
        }

        let (interruption, _) = self.read_request_body_from(&mut reader)?;
        if interruption.is_some() {
            return Ok(interruption);
        }

        self.process_request_body()
    }

    /// Evaluate the request headers phase.
    pub fn process_request_headers(&mut self) -> Option<Interruption> {
        if self.is_rule_engine_off() {
            return None;
        }
        if let Some(interruption) = self.preexisting("process_request_headers") {
            return Some(interruption);
        }
        self.evaluate_phase(Phase::RequestHeaders)
    }

    fn body_access(&self, direction: Direction) -> bool {
        match direction {
            Direction::Request => self.config.request_body_access,
            Direction::Response => self.config.response_body_access,
        }
    }

    /// Write one chunk through the body limit of a direction.
    fn write_body_chunk(
        &mut self,
        direction: Direction,
        data: &[u8],
    ) -> Result<(Option<Interruption>, usize)> {
        let (buffer, limit, action, flag, status) = match direction {
            Direction::Request => (
                &mut self.request_body,
                self.config.request_body_limit,
                self.config.request_body_limit_action,
                Variable::InboundDataError,
                413,
            ),
            Direction::Response => (
                &mut self.response_body,
                self.config.response_body_limit,
                self.config.response_body_limit_action,
                Variable::OutboundDataError,
                500,
            ),
        };

        // Nothing is buffered once the limit has been exceeded.
        if self.variables.scalar(flag) == "1" {
            return Ok((None, 0));
        }
        let decision = check_limit(buffer.len(), data.len(), limit, action);
        let accepted: &[u8] = match decision {
            LimitDecision::Accept => data,
            LimitDecision::Truncate(n) => &data[..n],
            LimitDecision::Reject => &[],
        };
        let written = buffer.write(accepted)?;

        if decision.exceeded() {
            self.variables.set_scalar(flag, "1");
            debug!(tx_id = %self.id, limit, ?direction, "body limit reached");
        }
        if decision == LimitDecision::Reject {
            self.interrupt(Interruption::deny(0, status));
            return Ok((self.interruption.clone(), 0));
        }
        Ok((None, written))
    }

    fn write_body(
        &mut self,
        direction: Direction,
        operation: &str,
        data: &[u8],
    ) -> Result<(Option<Interruption>, usize)> {
        if self.is_rule_engine_off() || !self.body_access(direction) {
            return Ok((None, 0));
        }
        if let Some(interruption) = self.preexisting(operation) {
            return Ok((Some(interruption), 0));
        }
        self.write_body_chunk(direction, data)
    }

    fn read_body_from<R: Read>(
        &mut self,
        direction: Direction,
        operation: &str,
        mut reader: R,
    ) -> Result<(Option<Interruption>, usize)> {
        if self.is_rule_engine_off() || !self.body_access(direction) {
            return Ok((None, 0));
        }
        if let Some(interruption) = self.preexisting(operation) {
            return Ok((Some(interruption), 0));
        }

        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let (interruption, written) = self.write_body_chunk(direction, &chunk[..read])?;
            total += written;
            if interruption.is_some() {
                return Ok((interruption, total));
            }
            if written < read {
                break;
            }
        }
        Ok((None, total))
    }

    /// Buffer request body bytes.
    ///
    /// Returns the interruption (if the limit rejected the write) and the
    /// number of bytes accepted. Does nothing when body access is off.
    pub fn write_request_body(&mut self, data: &[u8]) -> Result<(Option<Interruption>, usize)> {
        self.write_body(Direction::Request, "write_request_body", data)
    }

    /// Buffer request body bytes from a reader until it is exhausted or the
    /// limit is reached.
    pub fn read_request_body_from<R: Read>(
        &mut self,
        reader: R,
    ) -> Result<(Option<Interruption>, usize)> {
        self.read_body_from(Direction::Request, "read_request_body_from", reader)
    }

    fn request_processor(&mut self) -> Option<BodyProcessorKind> {
        let selected =
            BodyProcessorKind::from_name(self.variables.scalar(Variable::ReqbodyProcessor));
        if selected.is_none() && self.config.force_request_body_variable {
            self.variables
                .set_scalar(Variable::ReqbodyProcessor, BodyProcessorKind::Urlencoded.name());
            return Some(BodyProcessorKind::Urlencoded);
        }
        selected
    }

    /// Decode the buffered request body and evaluate the request body phase.
    ///
    /// A body the selected processor cannot decode sets `REQBODY_ERROR` and
    /// `REQBODY_ERROR_MSG`; the phase is still evaluated so rules can react,
    /// and the decoding error is returned.
    pub fn process_request_body(&mut self) -> Result<Option<Interruption>> {
        if self.is_rule_engine_off() {
            return Ok(None);
        }
        if let Some(interruption) = self.preexisting("process_request_body") {
            return Ok(Some(interruption));
        }
        if self.already_evaluated(Phase::RequestBody) {
            return Ok(self.interruption.clone());
        }
        if !self.config.request_body_access {
            return Ok(self.evaluate_phase(Phase::RequestBody));
        }

        let limit = self.config.request_body_limit;
        if self.request_body.len() > limit {
            self.variables.set_scalar(Variable::InboundDataError, "1");
            self.request_body.truncate(limit)?;
        }
        let body = self.request_body.read_to_vec(limit)?;
        self.variables
            .set_scalar(Variable::RequestBodyLength, body.len().to_string());

        let mut failure = None;
        if let Some(processor) = self.request_processor() {
            let content_type = self
                .variables
                .collection(Variable::RequestHeaders)
                .get("content-type")
                .first()
                .map(|s| s.to_string())
                .unwrap_or_default();
            let separator = self.config.argument_separator.clone();
            debug!(tx_id = %self.id, %processor, bytes = body.len(), "processing request body");
            if let Err(e) =
                processor.process_request(&body, &content_type, &separator, &mut self.variables)
            {
                warn!(tx_id = %self.id, %processor, error = %e, "failed to process request body");
                self.variables.set_scalar(Variable::ReqbodyError, "1");
                self.variables
                    .set_scalar(Variable::ReqbodyErrorMsg, e.to_string());
                failure = Some(e);
            }
        }

        let interruption = self.evaluate_phase(Phase::RequestBody);
        match failure {
            Some(e) => Err(e),
            None => Ok(interruption),
        }
    }

    /// Record the response status line and evaluate the response headers
    /// phase.
    pub fn process_response_headers(
        &mut self,
        status: u16,
        protocol: &str,
    ) -> Option<Interruption> {
        if self.is_rule_engine_off() {
            return None;
        }
        if let Some(interruption) = self.preexisting("process_response_headers") {
            return Some(interruption);
        }
        if self.already_evaluated(Phase::ResponseHeaders) {
            return self.interruption.clone();
        }
        self.variables
            .set_scalar(Variable::ResponseStatus, status.to_string());
        self.variables
            .set_scalar(Variable::ResponseProtocol, protocol);
        self.evaluate_phase(Phase::ResponseHeaders)
    }

    /// Buffer response body bytes. Mirrors [`write_request_body`](Self::write_request_body).
    pub fn write_response_body(&mut self, data: &[u8]) -> Result<(Option<Interruption>, usize)> {
        self.write_body(Direction::Response, "write_response_body", data)
    }

    /// Buffer response body bytes from a reader.
    pub fn read_response_body_from<R: Read>(
        &mut self,
        reader: R,
    ) -> Result<(Option<Interruption>, usize)> {
        self.read_body_from(Direction::Response, "read_response_body_from", reader)
    }

    /// Whether the response content type is listed for body inspection.
    pub fn is_response_body_processable(&self) -> bool {
        let content_type = self.variables.scalar(Variable::ResponseContentType);
        !content_type.is_empty() && self.config.is_response_mime_type(content_type)
    }

    /// Expose the buffered response body and evaluate the response body
    /// phase.
    pub fn process_response_body(&mut self) -> Result<Option<Interruption>> {
        if self.is_rule_engine_off() {
            return Ok(None);
        }
        if let Some(interruption) = self.preexisting("process_response_body") {
            return Ok(Some(interruption));
        }
        if self.already_evaluated(Phase::ResponseBody) {
            return Ok(self.interruption.clone());
        }
        if !self.config.response_body_access || !self.is_response_body_processable() {
            return Ok(self.evaluate_phase(Phase::ResponseBody));
        }

        let limit = self.config.response_body_limit;
        if self.response_body.len() > limit {
            self.variables.set_scalar(Variable::OutboundDataError, "1");
            self.response_body.truncate(limit)?;
        }
        let body = self.response_body.read_to_vec(limit)?;
        self.variables.set_scalar(
            Variable::ResponseBody,
            String::from_utf8_lossy(&body).into_owned(),
        );
        Ok(self.evaluate_phase(Phase::ResponseBody))
    }

    /// Evaluate the logging phase and write the audit record if the
    /// transaction is relevant. Does not close the transaction.
    pub fn process_logging(&mut self) -> Result<()> {
        if !self.is_rule_engine_off() && self.interruption.is_none() {
            self.evaluate_phase(Phase::Logging);
        }

        if !self.is_audit_relevant() {
            return Ok(());
        }
        let Some(logger) = self.waf.audit_logger() else {
            debug!(tx_id = %self.id, "no audit logger configured");
            return Ok(());
        };
        let log = self.audit_log()?;
        logger.write(&log)
    }

    fn is_audit_relevant(&self) -> bool {
        match self.config.audit_engine {
            AuditEngineStatus::On => true,
            AuditEngineStatus::Off => false,
            AuditEngineStatus::RelevantOnly => {
                let status = self.variables.scalar(Variable::ResponseStatus);
                self.config
                    .audit_log_relevant_status
                    .as_ref()
                    .map_or(false, |re| re.is_match(status))
            }
        }
    }

    /// Assemble the audit record for the current state.
    pub fn audit_log(&self) -> Result<AuditLog> {
        audit::build(self, self.config.audit_log_parts)
    }

    /// Record a rule match.
    ///
    /// Updates `MATCHED_VAR` and `MATCHED_VAR_NAME` to the last match,
    /// appends every match to `MATCHED_VARS`, expands the rule's messages and
    /// hands the record to the engine's error callback.
    pub fn match_rule(
        &mut self,
        rule: Arc<RuleMetadata>,
        disruptive: bool,
        match_data: Vec<MatchData>,
    ) {
        for md in &match_data {
            let name = md.variable_name();
            self.variables.set_scalar(Variable::MatchedVar, md.value.as_str());
            self.variables
                .set_scalar(Variable::MatchedVarName, name.as_str());
            self.variables
                .add(Variable::MatchedVars, &name, md.value.as_str());
        }

        if let Some(severity) = rule.severity {
            let current = self.variables.scalar(Variable::HighestSeverity).parse::<u8>().ok();
            if current.map_or(true, |c| severity.level() < c) {
                self.variables
                    .set_scalar(Variable::HighestSeverity, severity.level().to_string());
            }
        }

        let message = rule
            .msg
            .as_ref()
            .map(|m| m.expand(self))
            .unwrap_or_default();
        let data = rule
            .logdata
            .as_ref()
            .map(|m| m.expand(self))
            .unwrap_or_default();

        let matched = MatchedRule {
            rule,
            message,
            data,
            match_data,
            disruptive,
            transaction_id: self.id.clone(),
            uri: self.variables.scalar(Variable::RequestUri).to_string(),
            client_ip: self.variables.scalar(Variable::RemoteAddr).to_string(),
            server_ip: self.variables.scalar(Variable::ServerAddr).to_string(),
        };
        debug!(tx_id = %self.id, rule_id = matched.rule.id, "rule matched");

        if let Some(callback) = self.waf.error_callback() {
            callback(&matched);
        }
        self.matched_rules.push(matched);
    }

    /// Select fields of a variable.
    pub fn get_field(&self, selector: &VariableSelector) -> Vec<MatchData> {
        selector.select(&self.variables)
    }

    /// Store a capture in slot `index` (`TX:<index>`). Ignored unless
    /// capturing is enabled.
    pub fn capture_field(&mut self, index: usize, value: &str) {
        if !self.capture || index >= CAPTURE_SLOTS {
            return;
        }
        if let Some(tx) = self.variables.map_mut(Variable::Tx) {
            tx.set(&index.to_string(), vec![value.to_string()]);
        }
    }

    /// Clear every capture slot.
    pub fn reset_captures(&mut self) {
        if let Some(tx) = self.variables.map_mut(Variable::Tx) {
            for i in 0..CAPTURE_SLOTS {
                tx.set(&i.to_string(), vec![String::new()]);
            }
        }
    }

    /// Release the transaction. Scrubs every per-request field and hands the
    /// allocations back to the engine.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut state = PooledState {
            variables: mem::replace(&mut self.variables, VariableStore::detached()),
            request_body: mem::replace(&mut self.request_body, BodyBuffer::new(0, None)),
            response_body: mem::replace(&mut self.response_body, BodyBuffer::new(0, None)),
            matched_rules: mem::take(&mut self.matched_rules),
        };
        state.variables.reset();
        state.matched_rules.clear();
        let request = state.request_body.reset();
        let response = state.response_body.reset();

        self.interruption = None;
        self.last_phase = None;
        self.capture = false;
        self.waf.recycle(state);
        debug!(tx_id = %self.id, "transaction closed");

        request?;
        response?;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(tx_id = %self.id, error = %e, "failed to release transaction");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("last_phase", &self.last_phase)
            .field("interruption", &self.interruption)
            .field("matched_rules", &self.matched_rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BodyLimitAction;
    use crate::engine::AuditLogger;
    use crate::macros::Macro;
    use crate::rules::Severity;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RAW_REQUEST: &str = "POST /testurl.php?id=123&b=456 HTTP/1.1\r\n\
Host: www.test.com:80\r\n\
Cookie: test=123\r\n\
Content-Type: application/x-www-form-urlencoded\r\n\
X-Test-Header: test456\r\n\
Content-Length: 13\r\n\
\r\n\
testfield=456";

    fn make_transaction(waf: &Waf) -> Transaction {
        let mut tx = waf.new_transaction();
        tx.config_mut().request_body_access = true;
        tx.parse_request_reader(RAW_REQUEST.as_bytes()).unwrap();
        tx
    }

    fn expand(tx: &Transaction, template: &str) -> String {
        Macro::new(template).unwrap().expand(tx)
    }

    fn validate_macros(tx: &Transaction, expected: &[(&str, &str)]) {
        for (template, want) in expected {
            assert_eq!(&expand(tx, template), want, "expanding {}", template);
        }
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_errors<T>(f: impl FnOnce() -> T) -> (T, String) {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::ERROR)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8_lossy(&capture.0.lock()).into_owned();
        (out, logs)
    }

    #[derive(Default)]
    struct RecordingLogger(Arc<Mutex<Vec<AuditLog>>>);

    impl AuditLogger for RecordingLogger {
        fn write(&self, log: &AuditLog) -> Result<()> {
            self.0.lock().push(log.clone());
            Ok(())
        }
    }

    fn with_body_access(config: WafConfig) -> WafConfig {
        WafConfig {
            request_body_access: true,
            ..config
        }
    }

    #[test]
    fn test_request_setters() {
        let waf = Waf::default();
        let tx = make_transaction(&waf);
        validate_macros(
            &tx,
            &[
                ("%{request_headers.x-test-header}", "test456"),
                ("%{request_method}", "POST"),
                ("%{ARGS_GET.id}", "123"),
                ("%{request_cookies.test}", "123"),
                ("%{args_post.testfield}", "456"),
                ("%{args.testfield}", "456"),
                ("%{request_line}", "POST /testurl.php?id=123&b=456 HTTP/1.1"),
                ("%{query_string}", "id=123&b=456"),
                ("%{request_filename}", "/testurl.php"),
                ("%{request_basename}", "testurl.php"),
                ("%{request_protocol}", "HTTP/1.1"),
                ("%{request_uri}", "/testurl.php?id=123&b=456"),
                ("%{request_uri_raw}", "/testurl.php?id=123&b=456"),
                ("%{request_body_length}", "13"),
                ("%{reqbody_processor}", "URLENCODED"),
            ],
        );
        assert_eq!(tx.last_phase(), Some(Phase::RequestBody));
    }

    #[test]
    fn test_multipart_request() {
        let boundary = "---------------------------9051914041544843365972754266";
        let body = [
            format!("--{boundary}"),
            "Content-Disposition: form-data; name=\"text\"".to_string(),
            String::new(),
            "test-value".to_string(),
            format!("--{boundary}"),
            "Content-Disposition: form-data; name=\"file1\"; filename=\"a.html\"".to_string(),
            "Content-Type: text/html".to_string(),
            String::new(),
            "<!DOCTYPE html><title>Content of a.html.</title>".to_string(),
            String::new(),
            format!("--{boundary}--"),
        ]
        .join("\r\n");
        let request = format!(
            "POST / HTTP/1.1\r\nHost: localhost:8000\r\nContent-Type: multipart/form-data; boundary={boundary}\r\nContent-Length: {}\r\n\r\n{body}\r\n",
            body.len()
        );

        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.config_mut().request_body_access = true;
        tx.config_mut().request_body_limit = 9_999_999;
        assert!(tx.parse_request_reader(request.as_bytes()).unwrap().is_none());

        validate_macros(
            &tx,
            &[
                ("%{args_post.text}", "test-value"),
                ("%{files}", "a.html"),
                ("%{files_names}", "file1"),
                ("%{files_sizes.a.html}", "50"),
                ("%{files_combined_size}", "50"),
                ("%{reqbody_processor}", "MULTIPART"),
            ],
        );
    }

    #[test]
    fn test_malformed_multipart_sets_error() {
        let waf = Waf::new(with_body_access(WafConfig::default()));
        let mut tx = waf.new_transaction();
        tx.add_request_header("Content-Type", "multipart/form-data; boundary=abc");
        tx.write_request_body(b"no boundary in here").unwrap();
        let err = tx.process_request_body().unwrap_err();
        assert!(matches!(err, Error::RequestBody { .. }));
        assert_eq!(tx.variables().scalar(Variable::ReqbodyError), "1");
        assert!(!tx.variables().scalar(Variable::ReqbodyErrorMsg).is_empty());
        assert!(tx.interruption().is_none());
        assert_eq!(tx.last_phase(), Some(Phase::RequestBody));
    }

    #[test]
    fn test_malformed_request_line_and_header() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        assert!(matches!(
            tx.parse_request_reader("GARBAGE\r\n\r\n".as_bytes()),
            Err(Error::RequestLine { .. })
        ));

        let mut tx = waf.new_transaction();
        assert!(matches!(
            tx.parse_request_reader("GET / HTTP/1.1\r\nno colon here\r\n\r\n".as_bytes()),
            Err(Error::RequestHeader { .. })
        ));
    }

    fn write_in_chunks(
        tx: &mut Transaction,
        chunks: &[&str],
        reader: bool,
    ) -> Option<Interruption> {
        let mut last = None;
        for chunk in chunks {
            let (it, _) = if reader {
                tx.read_request_body_from(chunk.as_bytes()).unwrap()
            } else {
                tx.write_request_body(chunk.as_bytes()).unwrap()
            };
            last = it;
        }
        last
    }

    #[test]
    fn test_write_request_body_limits() {
        let body = "some=result&second=data";
        let third = body.len() / 3;
        let chunkings: Vec<Vec<&str>> = vec![
            vec![body],
            vec![&body[..third], &body[third..2 * third], &body[2 * third..]],
        ];
        let cases = [
            (body.len() + 2, BodyLimitAction::Reject, false),
            (body.len() - 3, BodyLimitAction::Reject, true),
            (body.len() - 3, BodyLimitAction::ProcessPartial, false),
        ];

        for (limit, action, should_interrupt) in cases {
            for reader in [false, true] {
                for chunks in &chunkings {
                    let waf = Waf::new(WafConfig {
                        request_body_access: true,
                        request_body_limit: limit,
                        request_body_in_memory_limit: limit,
                        request_body_limit_action: action,
                        ..Default::default()
                    });
                    let mut tx = waf.new_transaction();
                    tx.add_request_header("content-type", "application/x-www-form-urlencoded");
                    assert!(tx.process_request_headers().is_none());

                    let it = write_in_chunks(&mut tx, chunks, reader);
                    assert!(tx.request_body().len() <= limit);

                    if should_interrupt {
                        let it = it.expect("expected an interruption");
                        assert_eq!(it.status, 413);
                        assert_eq!(tx.variables().scalar(Variable::InboundDataError), "1");
                    } else {
                        assert!(tx.process_request_body().unwrap().is_none());
                        assert_eq!(
                            tx.variables().collection(Variable::ArgsPost).get("some"),
                            vec!["result"]
                        );
                    }
                    tx.close().unwrap();
                }
            }
        }
    }

    #[test]
    fn test_partial_processing_sets_flag_and_truncates() {
        let waf = Waf::new(WafConfig {
            request_body_access: true,
            request_body_limit: 5,
            request_body_limit_action: BodyLimitAction::ProcessPartial,
            ..Default::default()
        });
        let mut tx = waf.new_transaction();
        let (it, n) = tx.write_request_body(b"abcdefgh").unwrap();
        assert!(it.is_none());
        assert_eq!(n, 5);
        assert_eq!(tx.variables().scalar(Variable::InboundDataError), "1");

        let (it, n) = tx.write_request_body(b"ij").unwrap();
        assert!(it.is_none());
        assert_eq!(n, 0);
        assert_eq!(tx.request_body().read_to_vec(100).unwrap(), b"abcde");
    }

    #[test]
    fn test_write_request_body_on_limit_reached() {
        for (action, preexisting) in [
            (BodyLimitAction::Reject, Some(Interruption::deny(123, 403))),
            (BodyLimitAction::ProcessPartial, None),
        ] {
            for reader in [false, true] {
                let waf = Waf::new(WafConfig {
                    request_body_access: true,
                    request_body_limit: 2,
                    request_body_in_memory_limit: 2,
                    request_body_limit_action: action,
                    ..Default::default()
                });
                let mut tx = waf.new_transaction();
                tx.request_body.write(b"ab").unwrap();
                tx.interruption = preexisting.clone();

                let (it, n) = if reader {
                    tx.read_request_body_from("c".as_bytes()).unwrap()
                } else {
                    tx.write_request_body(b"c").unwrap()
                };
                assert_eq!(it, preexisting);
                assert_eq!(n, 0);
            }
        }
    }

    #[test]
    fn test_write_request_body_is_noop_when_not_accessible() {
        for (engine, access) in [(RuleEngineStatus::Off, true), (RuleEngineStatus::On, false)] {
            let waf = Waf::new(WafConfig {
                rule_engine: engine,
                request_body_access: access,
                ..Default::default()
            });
            let mut tx = waf.new_transaction();
            assert_eq!(tx.write_request_body(b"abc").unwrap(), (None, 0));
            assert_eq!(tx.read_request_body_from("abc".as_bytes()).unwrap(), (None, 0));
            assert!(tx.request_body().is_empty());
        }

        let mut tx = Waf::default().new_transaction();
        tx.interrupt(Interruption::deny(1, 403));
        assert!(tx.is_interrupted());
        assert_eq!(tx.write_request_body(b"abc").unwrap(), (None, 0));
        assert_eq!(tx.read_request_body_from("abc".as_bytes()).unwrap(), (None, 0));
        assert!(tx.request_body().is_empty());
    }

    #[test]
    fn test_no_evaluation_when_engine_off() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let waf = Waf::with_rules(
            WafConfig {
                rule_engine: RuleEngineStatus::Off,
                ..Default::default()
            },
            move |_phase: Phase, _tx: &mut Transaction| {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            },
        );

        let mut tx = waf.new_transaction();
        assert!(tx.is_rule_engine_off());
        tx.process_connection("127.0.0.1", 80, "127.0.0.2", 8080);
        tx.process_uri("/", "GET", "HTTP/1.1");
        assert!(tx.process_request_headers().is_none());
        assert!(tx.process_request_body().unwrap().is_none());
        assert!(tx.process_response_headers(200, "HTTP/1.1").is_none());
        assert!(tx.process_response_body().unwrap().is_none());
        tx.process_logging().unwrap();

        assert_eq!(tx.last_phase(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tx.variables().scalar(Variable::RemoteAddr), "127.0.0.1");
        assert_eq!(tx.variables().scalar(Variable::RequestMethod), "GET");
    }

    #[test]
    fn test_processors_idempotency() {
        let expected = Interruption::deny(123, 403);
        let cases: Vec<(&str, Box<dyn Fn(&mut Transaction) -> Option<Interruption>>)> = vec![
            (
                "process_request_headers",
                Box::new(|tx: &mut Transaction| tx.process_request_headers()),
            ),
            (
                "process_request_body",
                Box::new(|tx: &mut Transaction| tx.process_request_body().unwrap()),
            ),
            (
                "process_response_headers",
                Box::new(|tx: &mut Transaction| tx.process_response_headers(200, "HTTP/1")),
            ),
            (
                "process_response_body",
                Box::new(|tx: &mut Transaction| tx.process_response_body().unwrap()),
            ),
            (
                "write_request_body",
                Box::new(|tx: &mut Transaction| tx.write_request_body(b"abc").unwrap().0),
            ),
        ];

        let waf = Waf::default();
        for (operation, call) in cases {
            let mut tx = waf.new_transaction();
            tx.interruption = Some(expected.clone());
            let (it, logs) = capture_errors(|| call(&mut tx));

            assert_eq!(it.as_ref(), Some(&expected), "{}", operation);
            assert_eq!(logs.lines().count(), 1, "{}: {}", operation, logs);
            assert!(logs.contains(&format!(
                "Calling {} but there is a preexisting interruption",
                operation
            )));
            assert_eq!(tx.last_phase(), None);
        }
    }

    #[test]
    fn test_interruption_is_sticky() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let waf = Waf::with_rules(WafConfig::default(), move |phase: Phase, _tx: &mut Transaction| {
            counter.fetch_add(1, Ordering::SeqCst);
            match phase {
                Phase::RequestHeaders => Some(Interruption::deny(1, 403)),
                _ => Some(Interruption::deny(2, 406)),
            }
        });

        let mut tx = waf.new_transaction();
        let first = tx.process_request_headers().unwrap();
        assert_eq!(first.rule_id, 1);

        let (again, logs) = capture_errors(|| tx.process_response_headers(200, "HTTP/1.1"));
        assert_eq!(again, Some(first.clone()));
        assert_eq!(logs.lines().count(), 1);
        assert_eq!(tx.interruption(), Some(&first));
        assert_eq!(tx.variables().scalar(Variable::ResponseStatus), "");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_phases_evaluate_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let waf = Waf::with_rules(
            WafConfig::default(),
            move |_phase: Phase, _tx: &mut Transaction| {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            },
        );

        let mut tx = waf.new_transaction();
        tx.process_connection("10.0.0.1", 1234, "10.0.0.2", 80);
        assert_eq!(tx.last_phase(), Some(Phase::Connection));
        tx.process_request_headers();
        tx.process_request_headers();
        tx.process_request_body().unwrap();
        tx.process_request_body().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(tx.last_phase(), Some(Phase::RequestBody));

        tx.process_response_headers(200, "HTTP/1.1");
        tx.process_request_headers();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(tx.last_phase(), Some(Phase::ResponseHeaders));
    }

    #[test]
    fn test_detection_only_discards_interruptions() {
        let waf = Waf::with_rules(
            WafConfig {
                rule_engine: RuleEngineStatus::DetectionOnly,
                ..Default::default()
            },
            |_phase: Phase, tx: &mut Transaction| {
                let rule = Arc::new(RuleMetadata::new(7, Phase::RequestHeaders));
                tx.match_rule(rule, true, Vec::new());
                Some(Interruption::deny(7, 403))
            },
        );
        let mut tx = waf.new_transaction();
        assert!(tx.process_request_headers().is_none());
        assert_eq!(tx.matched_rules().len(), 1);
        assert_eq!(tx.last_phase(), Some(Phase::RequestHeaders));
    }

    #[test]
    fn test_response_header() {
        let waf = Waf::default();
        let mut tx = make_transaction(&waf);
        tx.add_response_header("content-type", "test");
        tx.add_response_header("Content-Length", "10");
        assert_eq!(tx.variables().scalar(Variable::ResponseContentType), "test");
        assert_eq!(tx.variables().scalar(Variable::ResponseContentLength), "10");
        assert!(tx.process_response_headers(200, "OK").is_none());
        assert_eq!(tx.variables().scalar(Variable::ResponseStatus), "200");
    }

    #[test]
    fn test_response_body() {
        let waf = Waf::default();
        let mut tx = make_transaction(&waf);
        tx.config_mut().response_body_access = true;
        tx.add_response_header("content-type", "text/plain");
        tx.response_body.write(b"test123").unwrap();
        tx.process_response_body().unwrap();
        assert_eq!(tx.variables().scalar(Variable::ResponseBody), "test123");
        tx.close().unwrap();
    }

    #[test]
    fn test_response_body_not_processable() {
        let waf = Waf::new(WafConfig {
            response_body_access: true,
            ..Default::default()
        });
        let mut tx = waf.new_transaction();
        tx.add_response_header("content-type", "application/octet-stream");
        tx.write_response_body(b"binary").unwrap();
        tx.process_response_body().unwrap();
        assert_eq!(tx.variables().scalar(Variable::ResponseBody), "");
        assert_eq!(tx.last_phase(), Some(Phase::ResponseBody));
    }

    #[test]
    fn test_phase4_magic() {
        let waf = Waf::new(WafConfig {
            response_body_access: true,
            response_body_limit: 3,
            ..Default::default()
        });

        let mut tx = waf.new_transaction();
        tx.add_response_header("content-type", "text/html");
        tx.response_body.write(b"more bytes").unwrap();
        tx.process_response_body().unwrap();
        assert_eq!(tx.variables().scalar(Variable::OutboundDataError), "1");
        assert_eq!(tx.variables().scalar(Variable::ResponseBody), "mor");

        let mut tx = waf.new_transaction();
        tx.add_response_header("content-type", "text/html");
        let (it, n) = tx.write_response_body(b"more bytes").unwrap();
        assert!(it.is_none());
        assert_eq!(n, 3);
        tx.process_response_body().unwrap();
        assert_eq!(tx.variables().scalar(Variable::OutboundDataError), "1");
        assert_eq!(tx.variables().scalar(Variable::ResponseBody), "mor");
    }

    #[test]
    fn test_response_body_reject() {
        let waf = Waf::new(WafConfig {
            response_body_access: true,
            response_body_limit: 3,
            response_body_limit_action: BodyLimitAction::Reject,
            ..Default::default()
        });
        let mut tx = waf.new_transaction();
        tx.add_response_header("content-type", "text/html");
        let (it, n) = tx.write_response_body(b"more bytes").unwrap();
        assert_eq!(it.map(|i| i.status), Some(500));
        assert_eq!(n, 0);
        assert_eq!(tx.variables().scalar(Variable::OutboundDataError), "1");
    }

    #[test]
    fn test_audit_log_fields() {
        let waf = Waf::default();
        let mut tx = make_transaction(&waf);
        tx.config_mut().audit_log_parts = "ABCDEFGHIJK".parse().unwrap();
        tx.add_request_header("test", "test");
        tx.add_response_header("test", "test");
        let rule = Arc::new(
            RuleMetadata::new(131, Phase::RequestHeaders)
                .with_msg("id %{unique_id}")
                .unwrap(),
        );
        tx.match_rule(
            rule,
            false,
            vec![MatchData::new(Variable::UniqueId, "", tx.id().to_string())],
        );
        assert_eq!(tx.matched_rules()[0].rule.id, 131);

        let log = tx.audit_log().unwrap();
        assert_eq!(log.transaction.id, tx.id());
        assert_eq!(log.messages[0].data.id, 131);
        assert_eq!(log.messages[0].data.msg, format!("id {}", tx.id()));
        assert_eq!(
            log.transaction.request.headers.as_ref().unwrap()["test"][0],
            "test"
        );
        assert_eq!(
            log.transaction.response.headers.as_ref().unwrap()["test"][0],
            "test"
        );
        assert_eq!(
            log.transaction.request.body.as_deref(),
            Some("testfield=456")
        );

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["parts"], "ABCDEFGHIJK");
        assert_eq!(json["transaction"]["request"]["method"], "POST");
        assert_eq!(json["messages"][0]["data"]["id"], 131);
    }

    fn audit_with(tx: &mut Transaction, parts: &str) -> AuditLog {
        tx.config_mut().audit_log_parts = parts.parse().unwrap();
        tx.audit_log().unwrap()
    }

    #[test]
    fn test_audit_parts_select_sections() {
        let waf = Waf::default();
        let mut tx = make_transaction(&waf);
        tx.config_mut().response_body_access = true;
        tx.add_response_header("Content-Type", "text/html");
        tx.write_response_body(b"<html>").unwrap();

        let log = audit_with(&mut tx, "AZ");
        assert!(log.transaction.request.headers.is_none());
        assert!(log.transaction.request.body.is_none());
        assert!(log.transaction.response.headers.is_none());
        assert!(log.transaction.response.body.is_none());

        let log = audit_with(&mut tx, "ABZ");
        assert!(log.transaction.request.headers.is_some());

        let log = audit_with(&mut tx, "ACZ");
        assert_eq!(log.transaction.request.body.as_deref(), Some("testfield=456"));

        let log = audit_with(&mut tx, "ADZ");
        assert_eq!(
            log.transaction.response.headers.as_ref().unwrap()["content-type"][0],
            "text/html"
        );

        let log = audit_with(&mut tx, "AEZ");
        assert_eq!(log.transaction.response.body.as_deref(), Some("<html>"));

        let log = audit_with(&mut tx, "AFZ");
        assert!(log.transaction.response.headers.is_some());
        assert!(log.transaction.response.body.is_none());

        let log = audit_with(&mut tx, "AGZ");
        assert_eq!(log.transaction.response.body.as_deref(), Some("<html>"));
        assert!(log.transaction.response.headers.is_none());

        let log = audit_with(&mut tx, "AIZ");
        assert_eq!(log.transaction.request.body.as_deref(), Some("testfield=456"));

        let log = audit_with(&mut tx, "AJZ");
        assert_eq!(log.transaction.request.files.as_deref().map(<[_]>::len), Some(0));

        let log = audit_with(&mut tx, "AKZ");
        assert!(log.messages.is_empty());
        assert_eq!(log.parts, "AKZ");
    }

    #[test]
    fn test_audit_alternative_body_drops_files() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.add_request_header("Content-Type", "multipart/form-data; boundary=abc");
        tx.add_argument(ArgumentKind::Post, "text", "test value");
        tx.variables_mut().add(Variable::Files, "file1", "a.html");

        let log = audit_with(&mut tx, "AIZ");
        assert_eq!(log.transaction.request.body.as_deref(), Some("text=test%20value"));
        assert!(log.transaction.request.files.is_none());
    }

    #[test]
    fn test_default_audit_parts_omit_messages() {
        let waf = Waf::default();
        let mut tx = make_transaction(&waf);
        tx.match_rule(Arc::new(RuleMetadata::new(1, Phase::RequestHeaders)), false, Vec::new());
        let log = tx.audit_log().unwrap();
        assert!(log.messages.is_empty());
        assert!(log.transaction.request.headers.is_some());
        assert!(log.transaction.request.files.is_none());
        let json = serde_json::to_string(&log).unwrap();
        assert!(!json.contains("\"messages\""));
    }

    #[test]
    fn test_audit_engine_decisions() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let waf = Waf::default();
        waf.set_audit_logger(RecordingLogger(Arc::clone(&records)));

        let mut tx = make_transaction(&waf);
        tx.process_logging().unwrap();
        assert!(records.lock().is_empty());

        tx.config_mut().audit_engine = AuditEngineStatus::On;
        tx.process_logging().unwrap();
        assert_eq!(records.lock().len(), 1);

        let mut tx = make_transaction(&waf);
        tx.config_mut().audit_engine = AuditEngineStatus::RelevantOnly;
        tx.config_mut().set_audit_log_relevant_status("(403)").unwrap();
        tx.process_response_headers(200, "HTTP/1.1");
        tx.process_logging().unwrap();
        assert_eq!(records.lock().len(), 1);

        let mut tx = make_transaction(&waf);
        tx.config_mut().audit_engine = AuditEngineStatus::RelevantOnly;
        tx.config_mut().set_audit_log_relevant_status("(403)").unwrap();
        tx.variables_mut().set_scalar(Variable::ResponseStatus, "403");
        tx.process_logging().unwrap();
        assert_eq!(records.lock().len(), 2);
        assert_eq!(tx.last_phase(), Some(Phase::Logging));
    }

    #[test]
    fn test_logging_skips_rules_after_interruption() {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        let waf = Waf::with_rules(
            WafConfig {
                audit_engine: AuditEngineStatus::On,
                ..Default::default()
            },
            move |phase: Phase, _tx: &mut Transaction| {
                seen.lock().push(phase);
                (phase == Phase::RequestHeaders).then(|| Interruption::deny(1, 403))
            },
        );
        let records = Arc::new(Mutex::new(Vec::new()));
        waf.set_audit_logger(RecordingLogger(Arc::clone(&records)));

        let mut tx = waf.new_transaction();
        assert!(tx.process_request_headers().is_some());
        let (result, logs) = capture_errors(|| tx.process_logging());
        result.unwrap();
        assert!(logs.is_empty());
        assert_eq!(*phases.lock(), vec![Phase::RequestHeaders]);
        let records = records.lock();
        assert_eq!(
            records[0].transaction.interruption.as_ref().map(|i| i.rule_id),
            Some(1)
        );
    }

    #[test]
    fn test_reset_capture() {
        let waf = Waf::default();
        let mut tx = make_transaction(&waf);

        tx.capture_field(5, "ignored");
        assert!(tx.variables().collection(Variable::Tx).get("5").is_empty());

        tx.set_capture(true);
        tx.capture_field(5, "test");
        assert_eq!(tx.variables().collection(Variable::Tx).get("5"), vec!["test"]);
        tx.reset_captures();
        assert_eq!(tx.variables().collection(Variable::Tx).get("5"), vec![""]);
        tx.close().unwrap();
    }

    #[test]
    fn test_error_callback() {
        let waf = Waf::default();
        let buffer = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&buffer);
        waf.set_error_callback(move |mr: &MatchedRule| {
            *sink.lock() = mr.error_log(403);
        });

        let mut tx = waf.new_transaction();
        tx.match_rule(
            Arc::new(RuleMetadata::new(1, Phase::RequestHeaders)),
            true,
            vec![MatchData::new(Variable::UniqueId, "", tx.id().to_string())],
        );
        assert!(buffer.lock().contains(tx.id()));
    }

    #[test]
    fn test_header_setters() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.add_request_header("cookie", "abc=def;hij=klm");
        tx.add_request_header("test1", "test2");
        let vars = tx.variables();
        assert_eq!(vars.collection(Variable::RequestCookies).get("abc"), vec!["def"]);
        assert_eq!(vars.collection(Variable::RequestCookies).get("hij"), vec!["klm"]);
        assert_eq!(
            vars.collection(Variable::RequestHeaders).get("cookie"),
            vec!["abc=def;hij=klm"]
        );
        assert!(vars
            .collection(Variable::RequestHeadersNames)
            .get("cookie")
            .contains(&"cookie"));
        assert!(vars
            .collection(Variable::RequestCookiesNames)
            .get("abc")
            .contains(&"abc"));
    }

    #[test]
    fn test_forced_request_body_variable() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.config_mut().request_body_access = true;
        tx.config_mut().force_request_body_variable = true;
        tx.add_request_header("content-type", "text/plain");
        tx.add_request_header("content-length", "7");
        tx.request_body.write(b"test123").unwrap();
        tx.process_request_body().unwrap();
        assert_eq!(tx.variables().scalar(Variable::RequestBody), "test123");
        assert_eq!(tx.variables().scalar(Variable::ReqbodyProcessor), "URLENCODED");

        let mut tx = waf.new_transaction();
        tx.config_mut().request_body_access = true;
        tx.request_body.write(b"test").unwrap();
        tx.process_request_body().unwrap();
        assert_ne!(tx.variables().scalar(Variable::RequestBody), "test");
    }

    #[test]
    fn test_get_field() {
        let waf = Waf::default();
        let tx = make_transaction(&waf);

        let sel = VariableSelector::new(Variable::RequestHeaders)
            .with_key("ho.*")
            .with_key_regex("ho.*")
            .unwrap();
        let fields = tx.get_field(&sel);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].value, "www.test.com:80");
        assert_eq!(tx.get_field(&sel.clone().counted())[0].value, "1");

        let mut literal = sel.clone().counted();
        literal.key_regex = None;
        assert_eq!(tx.get_field(&literal)[0].value, "0");

        literal.key = None;
        assert_eq!(tx.get_field(&literal)[0].value, "5");

        assert_eq!(tx.get_field(&VariableSelector::new(Variable::Args)).len(), 3);
    }

    #[test]
    fn test_get_field_exceptions() {
        let waf = Waf::default();
        let tx = make_transaction(&waf);
        let base = VariableSelector::new(Variable::RequestHeaders)
            .with_key_regex("ho.*")
            .unwrap();

        assert!(tx.get_field(&base.clone().except("host")).is_empty());
        let fields = tx.get_field(&base);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].value, "www.test.com:80");
        assert!(tx
            .get_field(&base.clone().except_regex("ho.*").unwrap())
            .is_empty());

        let all = VariableSelector::new(Variable::RequestHeaders);
        assert_eq!(tx.get_field(&all.clone().except("cookie")).len(), 4);
        assert!(tx.get_field(&all.except_regex(".*").unwrap()).is_empty());
    }

    #[test]
    fn test_transaction_pool() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.match_rule(Arc::new(RuleMetadata::new(1234, Phase::RequestHeaders)), false, Vec::new());
        tx.interruption = Some(Interruption::deny(1234, 403));
        for i in 0..1000 {
            tx.close().unwrap();
            tx = waf.new_transaction();
            assert!(tx.matched_rules().is_empty(), "rules leaked after {} rounds", i + 1);
            assert!(tx.interruption().is_none());
            assert_eq!(tx.last_phase(), None);
            assert_eq!(tx.variables().scalar(Variable::UniqueId), tx.id());
            tx.add_request_header("X-Round", &i.to_string());
            assert_eq!(
                tx.variables().collection(Variable::RequestHeaders).len(),
                1
            );
        }
        assert_eq!(waf.pooled(), 0);
    }

    #[test]
    fn test_close_removes_spill_files() {
        let dir = tempfile::tempdir().unwrap();
        let waf = Waf::new(WafConfig {
            request_body_access: true,
            request_body_in_memory_limit: 4,
            tmp_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let mut tx = waf.new_transaction();
        tx.write_request_body(b"spilled to disk").unwrap();
        assert!(tx.request_body().is_spilled());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        tx.close().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_set_body_spill_reconfigures_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let waf = Waf::new(WafConfig {
            request_body_access: true,
            ..Default::default()
        });
        let mut tx = waf.new_transaction();
        tx.set_body_spill(4, Some(dir.path().to_path_buf()));
        tx.write_request_body(b"spilled to disk").unwrap();
        assert!(tx.request_body().is_spilled());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(tx.config().request_body_in_memory_limit, 4);
        tx.close().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_variables_match() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        let rule = Arc::new(
            RuleMetadata::new(1, Phase::RequestHeaders).with_severity(Severity::Warning),
        );
        tx.match_rule(
            rule,
            false,
            vec![MatchData::new(Variable::ArgsNames, "sample", "samplevalue")],
        );
        let vars = tx.variables();
        assert_eq!(vars.scalar(Variable::MatchedVar), "samplevalue");
        assert_eq!(vars.scalar(Variable::MatchedVarName), "ARGS_NAMES:sample");
        assert_eq!(
            vars.collection(Variable::MatchedVars).get("ARGS_NAMES:sample"),
            vec!["samplevalue"]
        );
        assert_eq!(vars.scalar(Variable::HighestSeverity), "4");

        let critical = Arc::new(
            RuleMetadata::new(2, Phase::RequestHeaders).with_severity(Severity::Critical),
        );
        tx.match_rule(
            critical,
            false,
            vec![MatchData::new(Variable::ArgsGet, "id", "1")],
        );
        let vars = tx.variables();
        assert_eq!(vars.scalar(Variable::HighestSeverity), "2");
        assert_eq!(vars.collection(Variable::MatchedVars).len(), 2);
        assert_eq!(vars.scalar(Variable::MatchedVarName), "ARGS_GET:id");
    }

    #[test]
    fn test_process_connection() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.process_connection("127.0.0.1", 80, "127.0.0.2", 8080);
        assert_eq!(tx.variables().scalar(Variable::RemoteAddr), "127.0.0.1");
        assert_eq!(tx.variables().scalar(Variable::RemotePort), "80");
        assert_eq!(tx.variables().scalar(Variable::ServerPort), "8080");
        assert!(tx.interruption().is_none());
    }

    #[test]
    fn test_add_argument() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.add_argument(ArgumentKind::Get, "test", "testvalue");
        tx.add_argument(ArgumentKind::Post, "ptest", "ptestvalue");
        tx.add_argument(ArgumentKind::Path, "ptest2", "ptestvalue");
        let vars = tx.variables();
        assert_eq!(vars.collection(Variable::ArgsGet).get("test"), vec!["testvalue"]);
        assert_eq!(vars.collection(Variable::ArgsPost).get("ptest"), vec!["ptestvalue"]);
        assert_eq!(vars.collection(Variable::ArgsPath).get("ptest2"), vec!["ptestvalue"]);
        assert_eq!(vars.collection(Variable::Args).len(), 3);
    }

    #[test]
    fn test_process_uri() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        let uri = "http://example.com/path/to/file.html?query=string&other=value";
        tx.process_uri(uri, "GET", "HTTP/1.1");
        let vars = tx.variables();
        assert_eq!(vars.scalar(Variable::RequestUri), uri);
        assert_eq!(vars.scalar(Variable::RequestFilename), "/path/to/file.html");
        assert_eq!(vars.scalar(Variable::RequestBasename), "file.html");
        assert_eq!(vars.scalar(Variable::QueryString), "query=string&other=value");
        let args = vars.collection(Variable::Args);
        assert_eq!(args.find_all().len(), 2);
        assert_eq!(args.find_string("other")[0].value, "value");
    }

    #[test]
    fn test_process_uri_fragment_and_encoding() {
        let waf = Waf::default();
        let mut tx = waf.new_transaction();
        tx.process_uri("/a%20b/c.php?q=x+y&bad=%zz#frag", "GET", "HTTP/1.1");
        let vars = tx.variables();
        assert_eq!(vars.scalar(Variable::RequestUri), "/a%20b/c.php?q=x+y&bad=%zz");
        assert_eq!(vars.scalar(Variable::RequestUriRaw), "/a%20b/c.php?q=x+y&bad=%zz#frag");
        assert_eq!(vars.scalar(Variable::RequestFilename), "/a b/c.php");
        assert_eq!(vars.collection(Variable::ArgsGet).get("q"), vec!["x y"]);
        assert_eq!(vars.scalar(Variable::UrlencodedError), "1");
    }

    #[test]
    fn test_macro_against_transaction() {
        let waf = Waf::default();
        let mut tx = make_transaction(&waf);
        tx.variables_mut()
            .map_mut(Variable::Tx)
            .unwrap()
            .set("some", vec!["secretly".to_string()]);
        assert_eq!(expand(&tx, "%{unique_id}"), tx.id());
        assert_eq!(
            expand(&tx, "some complex text %{tx.some} wrapped in m"),
            "some complex text secretly wrapped in m"
        );
        assert_eq!(
            expand(&tx, "some complex text %{tx.some} wrapped in m %{tx.some}"),
            "some complex text secretly wrapped in m secretly"
        );
    }

    #[test]
    fn test_detection_only_limit_reject_is_not_applied() {
        let waf = Waf::new(WafConfig {
            rule_engine: RuleEngineStatus::DetectionOnly,
            request_body_access: true,
            request_body_limit: 2,
            ..Default::default()
        });
        let mut tx = waf.new_transaction();
        let (it, n) = tx.write_request_body(b"abc").unwrap();
        assert!(it.is_none());
        assert_eq!(n, 0);
        assert_eq!(tx.variables().scalar(Variable::InboundDataError), "1");
    }

    #[test]
    fn test_detection_only_refuses_writes_after_limit() {
        let waf = Waf::new(WafConfig {
            rule_engine: RuleEngineStatus::DetectionOnly,
            request_body_access: true,
            request_body_limit: 5,
            request_body_limit_action: BodyLimitAction::Reject,
            ..Default::default()
        });
        let mut tx = waf.new_transaction();
        assert_eq!(tx.write_request_body(b"abc").unwrap(), (None, 3));
        assert_eq!(tx.write_request_body(b"defg").unwrap(), (None, 0));
        assert_eq!(tx.write_request_body(b"hi").unwrap(), (None, 0));
        assert_eq!(tx.read_request_body_from("hi".as_bytes()).unwrap(), (None, 0));
        assert_eq!(tx.request_body().len(), 3);
        assert_eq!(tx.request_body().read_to_vec(16).unwrap(), b"abc");
        assert!(tx.interruption().is_none());
    }

    #[test]
    fn test_headers_map_by_name() {
        let waf = Waf::default();
        let tx = make_transaction(&waf);
        let names: HashMap<_, _> = tx
            .variables()
            .collection(Variable::RequestHeaders)
            .find_all()
            .into_iter()
            .map(|f| (f.key, f.value))
            .collect();
        assert_eq!(names["Content-Length"], "13");
    }
}
